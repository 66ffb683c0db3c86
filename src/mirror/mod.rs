// src/mirror/mod.rs
//! Remote snapshot mirror (best-effort backup of the key inventory).

pub mod gist_mirror;
