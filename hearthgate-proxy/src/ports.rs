//! Listening port selection.
//!
//! hearthgate serves dialect, admin and passthrough traffic from a single
//! port so the proxy fits behind one ingress rule.
//!
//! # Environment Variables
//!
//! - `HEARTHGATE_PORT` (default: 8081)

/// Default listening port.
pub const DEFAULT_EDGE_PORT: u16 = 8081;

/// Get the listening port from environment or default.
///
/// Unparseable or zero values fall back to [`DEFAULT_EDGE_PORT`].
///
/// ```rust
/// use hearthgate_proxy::ports::edge_port;
///
/// let port = edge_port();
/// assert!(port > 0);
/// ```
pub fn edge_port() -> u16 {
    std::env::var("HEARTHGATE_PORT")
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .filter(|&p: &u16| p > 0)
        .unwrap_or(DEFAULT_EDGE_PORT)
}
