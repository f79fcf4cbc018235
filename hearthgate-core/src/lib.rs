//! Caching and fallback core of the hearthgate edge proxy.
//!
//! hearthgate sits between voice-assistant fulfillment callers (Google
//! Assistant, Alexa) and a smart-home controller reachable through an
//! unreliable tunnel. This crate holds everything that does not depend on
//! the HTTP server:
//!
//! - [`rate_limiter`]: per-client sliding-window admission
//! - [`cache`]: enumeration results (TTL) and last-known endpoint state
//! - [`upstream`]: bounded-latency calls to the controller
//! - [`dialect`]: Google and Alexa request adapters
//! - [`router`]: the caching/fallback policy tying the above together
//! - [`events`]: webhook notifications through a bounded queue
//! - [`audit`]: one JSON line per handled request
//! - [`admin`] and [`settings`]: credential-checked controls
//! - [`config`]: environment configuration
//!
//! All state lives in process memory and is rebuilt after a restart.

pub mod admin;
pub mod audit;
pub mod cache;
pub mod config;
pub mod dialect;
pub mod error;
pub mod events;
pub mod rate_limiter;
pub mod router;
pub mod settings;
pub mod upstream;

pub use error::{ConfigError, EdgeError};
