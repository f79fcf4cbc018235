//! Administrative control surface.
//!
//! A single shared credential pair guards the mutating operations (cache
//! clearing, toggling remote access). Read-only views stay open so
//! dashboards and ingress checks can poll them.
//!
//! When no credential pair is configured the gate is open: the proxy is
//! then expected to sit behind an ingress that does its own checking.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::cache::{ClearedCounts, FreshnessCache};
use crate::settings::{RemoteAccessCell, RemoteAccessState};

/// Username/password pair for HTTP Basic authentication.
#[derive(Clone)]
pub struct AdminCredentials {
    username: String,
    password_digest: [u8; 32],
}

impl AdminCredentials {
    pub fn new(username: impl Into<String>, password: impl AsRef<[u8]>) -> Self {
        Self {
            username: username.into(),
            password_digest: digest(password.as_ref()),
        }
    }

    fn matches(&self, username: &str, password: &str) -> bool {
        // Fixed-length digests only, never the raw strings.
        let user_ok = digest(username.as_bytes()) == digest(self.username.as_bytes());
        let pass_ok = digest(password.as_bytes()) == self.password_digest;
        user_ok & pass_ok
    }
}

impl std::fmt::Debug for AdminCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

fn digest(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Credential-checked access to the cache and remote-access setting.
pub struct AdminGate {
    credentials: Option<AdminCredentials>,
    cache: Arc<FreshnessCache>,
    remote_access: Arc<RemoteAccessCell>,
}

impl AdminGate {
    pub fn new(
        credentials: Option<AdminCredentials>,
        cache: Arc<FreshnessCache>,
        remote_access: Arc<RemoteAccessCell>,
    ) -> Self {
        if credentials.is_none() {
            warn!("No admin credentials configured, admin endpoints are unauthenticated");
        }
        Self {
            credentials,
            cache,
            remote_access,
        }
    }

    /// Check an `Authorization` header value.
    ///
    /// Always `true` when no credentials are configured.
    pub fn authenticate(&self, authorization: Option<&str>) -> bool {
        let Some(ref credentials) = self.credentials else {
            return true;
        };
        let Some((username, password)) = authorization.and_then(parse_basic) else {
            return false;
        };
        credentials.matches(&username, &password)
    }

    /// Empty both caches. Callers must authenticate first.
    pub fn clear_caches(&self) -> ClearedCounts {
        let cleared = self.cache.clear_all();
        info!(
            enumeration = cleared.enumeration,
            state = cleared.state,
            "Caches cleared"
        );
        cleared
    }

    /// Toggle remote access. Callers must authenticate first.
    pub fn set_remote_access(&self, enabled: bool) -> RemoteAccessState {
        let state = self.remote_access.set(enabled);
        info!(enabled, "Remote access setting changed");
        state
    }

    pub fn get_remote_access(&self) -> RemoteAccessState {
        self.remote_access.load()
    }

    /// Whether an ingress should admit a remote request.
    ///
    /// Protocol-upgrade requests (WebSocket) are always admitted so live
    /// sessions survive the toggle.
    pub fn check_remote_access(&self, is_upgrade: bool) -> bool {
        is_upgrade || self.remote_access.load().enabled
    }
}

/// Decode `Basic <base64(user:pass)>`.
fn parse_basic(header: &str) -> Option<(String, String)> {
    let (scheme, encoded) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}
