// src/store/mod.rs
//! Authoritative local persistence layer.

pub mod key_store;
