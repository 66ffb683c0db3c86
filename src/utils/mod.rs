// src/utils/mod.rs
//! Helper functions and process configuration.

pub mod config;
pub mod serialization;
