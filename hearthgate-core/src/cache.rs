//! Freshness cache for enumeration results and last-known endpoint state.
//!
//! Two stores share one exclusive lock:
//!
//! - **Enumeration**: keyed by caller identity, expires after a TTL. An
//!   expired entry is indistinguishable from a missing one.
//! - **State**: keyed by endpoint id, never expires. An entry means "the last
//!   successful read returned this".
//!
//! The shared lock lets [`FreshnessCache::clear_all`] empty both stores in a
//! single critical section. The lock is never held across an await point.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};

// ============================================================================
// Entries
// ============================================================================

/// Response of a successful enumeration call, stored verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumerationPayload {
    /// Raw upstream response body.
    pub body: Bytes,
    /// Number of endpoints the response listed.
    pub device_count: usize,
}

#[derive(Debug, Clone)]
struct EnumerationEntry {
    payload: EnumerationPayload,
    stored_at: Instant,
    /// `None` when the TTL runs past what `Instant` can represent.
    expires_at: Option<Instant>,
}

impl EnumerationEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|expires_at| now < expires_at)
    }
}

#[derive(Debug, Clone)]
struct StateEntry {
    state: Value,
    updated_at: DateTime<Utc>,
    refreshed_at: Instant,
}

/// A state read from the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedState {
    /// Attribute set as last returned by upstream.
    pub state: Value,
    /// When the entry was written.
    pub updated_at: DateTime<Utc>,
    /// Always `true` for values read from the cache.
    pub cached: bool,
}

impl CachedState {
    /// Render the state with the offline markers merged in.
    ///
    /// Object states gain `cached: true` and `cachedAt`; anything else is
    /// wrapped under a `state` key first.
    pub fn marked(&self) -> Value {
        let mut object = match &self.state {
            Value::Object(map) => map.clone(),
            other => {
                let mut map = Map::new();
                map.insert("state".to_string(), other.clone());
                map
            }
        };
        object.insert("cached".to_string(), Value::Bool(self.cached));
        object.insert(
            "cachedAt".to_string(),
            Value::String(
                self.updated_at
                    .to_rfc3339_opts(SecondsFormat::Millis, true),
            ),
        );
        Value::Object(object)
    }
}

/// Entry counts removed by [`FreshnessCache::clear_all`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ClearedCounts {
    /// Enumeration entries removed.
    pub enumeration: usize,
    /// State entries removed.
    pub state: usize,
}

impl ClearedCounts {
    /// Total entries removed.
    pub fn total(&self) -> usize {
        self.enumeration + self.state
    }
}

/// Snapshot of cache occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStats {
    /// Enumeration entries held, including expired ones not yet superseded.
    pub enumeration_entries: usize,
    /// Enumeration entries still within their TTL.
    pub enumeration_live: usize,
    /// State entries held.
    pub state_entries: usize,
    /// Mean age of enumeration entries in seconds.
    pub enumeration_avg_age_secs: f64,
    /// Mean age of state entries in seconds.
    pub state_avg_age_secs: f64,
}

// ============================================================================
// Cache
// ============================================================================

#[derive(Default)]
struct Stores {
    enumeration: HashMap<String, EnumerationEntry>,
    state: HashMap<String, StateEntry>,
}

/// In-memory cache shared by every request task.
#[derive(Default)]
pub struct FreshnessCache {
    stores: Mutex<Stores>,
}

impl FreshnessCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an enumeration payload for `key` valid for `ttl`.
    pub fn put_enumeration(&self, key: &str, payload: EnumerationPayload, ttl: Duration) {
        self.put_enumeration_at(key, payload, ttl, Instant::now());
    }

    /// Store an enumeration payload as if written at `now`.
    pub fn put_enumeration_at(
        &self,
        key: &str,
        payload: EnumerationPayload,
        ttl: Duration,
        now: Instant,
    ) {
        let entry = EnumerationEntry {
            payload,
            stored_at: now,
            expires_at: now.checked_add(ttl),
        };
        self.stores.lock().enumeration.insert(key.to_string(), entry);
    }

    /// Fetch a live enumeration payload for `key`.
    pub fn get_enumeration(&self, key: &str) -> Option<EnumerationPayload> {
        self.get_enumeration_at(key, Instant::now())
    }

    /// Fetch a live enumeration payload as observed at `now`.
    pub fn get_enumeration_at(&self, key: &str, now: Instant) -> Option<EnumerationPayload> {
        let stores = self.stores.lock();
        stores
            .enumeration
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.payload.clone())
    }

    /// Replace the state for one endpoint.
    pub fn put_state(&self, id: &str, state: Value) {
        let now = Instant::now();
        let updated_at = Utc::now();
        self.stores.lock().state.insert(
            id.to_string(),
            StateEntry {
                state,
                updated_at,
                refreshed_at: now,
            },
        );
    }

    /// Replace the state for every endpoint in `states`. Other entries are
    /// left untouched.
    pub fn bulk_put_state(&self, states: HashMap<String, Value>) {
        if states.is_empty() {
            return;
        }
        let now = Instant::now();
        let updated_at = Utc::now();
        let mut stores = self.stores.lock();
        for (id, state) in states {
            stores.state.insert(
                id,
                StateEntry {
                    state,
                    updated_at,
                    refreshed_at: now,
                },
            );
        }
    }

    /// Last known state of one endpoint.
    pub fn get_state(&self, id: &str) -> Option<CachedState> {
        self.stores.lock().state.get(id).map(to_cached)
    }

    /// Last known states for the subset of `ids` that have entries.
    ///
    /// Results keep the first-seen order of `ids`; duplicates collapse.
    pub fn get_states<S: AsRef<str>>(&self, ids: &[S]) -> Vec<(String, CachedState)> {
        let stores = self.stores.lock();
        let mut found: Vec<(String, CachedState)> = Vec::new();
        for id in ids {
            let id = id.as_ref();
            if found.iter().any(|(seen, _)| seen == id) {
                continue;
            }
            if let Some(entry) = stores.state.get(id) {
                found.push((id.to_string(), to_cached(entry)));
            }
        }
        found
    }

    /// Empty both stores atomically.
    pub fn clear_all(&self) -> ClearedCounts {
        let mut stores = self.stores.lock();
        let counts = ClearedCounts {
            enumeration: stores.enumeration.len(),
            state: stores.state.len(),
        };
        stores.enumeration.clear();
        stores.state.clear();
        counts
    }

    /// Occupancy and age snapshot.
    pub fn stats(&self) -> CacheStats {
        self.stats_at(Instant::now())
    }

    /// Occupancy and age snapshot as observed at `now`.
    pub fn stats_at(&self, now: Instant) -> CacheStats {
        let stores = self.stores.lock();

        let enumeration_live = stores
            .enumeration
            .values()
            .filter(|e| e.is_live(now))
            .count();

        CacheStats {
            enumeration_entries: stores.enumeration.len(),
            enumeration_live,
            state_entries: stores.state.len(),
            enumeration_avg_age_secs: average_age(
                stores.enumeration.values().map(|e| e.stored_at),
                now,
            ),
            state_avg_age_secs: average_age(stores.state.values().map(|e| e.refreshed_at), now),
        }
    }
}

fn to_cached(entry: &StateEntry) -> CachedState {
    CachedState {
        state: entry.state.clone(),
        updated_at: entry.updated_at,
        cached: true,
    }
}

fn average_age(instants: impl Iterator<Item = Instant>, now: Instant) -> f64 {
    let (count, total) = instants.fold((0u32, Duration::ZERO), |(n, sum), at| {
        (n + 1, sum + now.saturating_duration_since(at))
    });
    if count == 0 {
        0.0
    } else {
        total.as_secs_f64() / f64::from(count)
    }
}
