//! Process-wide runtime settings.

use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Snapshot of the remote-access toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RemoteAccessState {
    pub enabled: bool,
    pub updated_at: DateTime<Utc>,
}

/// Lock-free cell holding the remote-access toggle.
///
/// Readers never block; a write swaps in a whole new snapshot so `enabled`
/// and `updated_at` are always observed together.
pub struct RemoteAccessCell {
    inner: ArcSwap<RemoteAccessState>,
}

impl RemoteAccessCell {
    pub fn new(enabled: bool) -> Self {
        Self {
            inner: ArcSwap::from_pointee(RemoteAccessState {
                enabled,
                updated_at: Utc::now(),
            }),
        }
    }

    pub fn load(&self) -> RemoteAccessState {
        **self.inner.load()
    }

    /// Replace the setting and return the new snapshot.
    pub fn set(&self, enabled: bool) -> RemoteAccessState {
        let state = RemoteAccessState {
            enabled,
            updated_at: Utc::now(),
        };
        self.inner.store(Arc::new(state));
        state
    }
}
