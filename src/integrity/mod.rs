// src/integrity/mod.rs
//! Key integrity layer (HMAC signing and verification).

pub mod guard;
