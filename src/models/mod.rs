// src/models/mod.rs
//! Data structures shared across the system.

pub mod actor;
pub mod key;
