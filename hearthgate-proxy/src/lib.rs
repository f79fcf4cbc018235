//! hearthgate HTTP edge proxy.
//!
//! This crate contains the axum server, admin routes and HTTP-specific
//! infrastructure. Caching, rate limiting and fallback policy live in
//! `hearthgate-core`.

pub mod admin;
pub mod error;
pub mod logging_layer;
pub mod ports;
pub mod server;
