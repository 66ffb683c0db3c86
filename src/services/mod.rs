// src/services/mod.rs
//! Business logic and the HTTP command surface.

pub mod api_server;
pub mod redemption;
pub mod role_assigner;
