//! Per-request audit trail.
//!
//! Every request that reaches a dialect endpoint produces exactly one JSON
//! line, including rejected and malformed ones. The default sink is a
//! `tracing_appender` non-blocking stdout writer: if the log consumer stalls,
//! lines are dropped rather than slowing down fulfillment.

use std::io::Write;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;
use tracing_appender::non_blocking::WorkerGuard;

use crate::dialect::{Dialect, Operation};

/// Device ids beyond this many are left out of a record.
pub const MAX_AUDIT_DEVICE_IDS: usize = 5;

/// Where the answer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheState {
    /// Forwarded to upstream (or rejected before any lookup).
    Live,
    /// Served from the enumeration cache.
    Cached,
    /// Degraded answer from the state cache during an outage.
    OfflineFallback,
}

/// One audit line.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    /// Always `"request"`.
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub dialect: Dialect,
    pub operation: Operation,
    pub intent: String,
    pub client_ip: String,
    pub duration_ms: u64,
    pub cache_state: CacheState,
    /// Caller request id, `"unknown"` when absent.
    pub request_id: String,
    /// HTTP status returned to the caller.
    pub status: u16,
    /// Error code when the request failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
    /// Endpoints listed by an enumeration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_count: Option<usize>,
    /// First few endpoint ids named by a read or execute.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub device_ids: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl AuditRecord {
    /// A record for `dialect` with every optional field empty.
    pub fn new(dialect: Dialect, client_ip: impl Into<String>) -> Self {
        Self {
            kind: "request",
            dialect,
            operation: Operation::Unclassified,
            intent: "unknown".to_string(),
            client_ip: client_ip.into(),
            duration_ms: 0,
            cache_state: CacheState::Live,
            request_id: "unknown".to_string(),
            status: 200,
            error: None,
            device_count: None,
            device_ids: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    /// Keep at most [`MAX_AUDIT_DEVICE_IDS`] ids.
    pub fn set_device_ids(&mut self, ids: &[String]) {
        self.device_ids = ids.iter().take(MAX_AUDIT_DEVICE_IDS).cloned().collect();
    }
}

/// Writes audit records as JSON lines.
pub struct AuditLogger {
    enabled: bool,
    sink: Mutex<Box<dyn Write + Send>>,
}

impl AuditLogger {
    /// Audit to stdout through a non-blocking writer.
    ///
    /// The returned guard flushes pending lines on drop and must be held for
    /// the life of the process.
    pub fn stdout(enabled: bool) -> (Self, WorkerGuard) {
        let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
        (Self::with_writer(enabled, writer), guard)
    }

    /// Audit to an arbitrary writer.
    pub fn with_writer(enabled: bool, writer: impl Write + Send + 'static) -> Self {
        Self {
            enabled,
            sink: Mutex::new(Box::new(writer)),
        }
    }

    /// A logger that writes nothing.
    pub fn disabled() -> Self {
        Self::with_writer(false, std::io::sink())
    }

    /// Whether records are written.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Emit one record. Serialization and write errors are absorbed.
    pub fn record(&self, record: &AuditRecord) {
        if !self.enabled {
            return;
        }

        let mut line = match serde_json::to_vec(record) {
            Ok(line) => line,
            Err(e) => {
                debug!(error = %e, "Failed to serialize audit record");
                return;
            }
        };
        line.push(b'\n');

        let mut sink = self.sink.lock();
        if let Err(e) = sink.write_all(&line).and_then(|()| sink.flush()) {
            debug!(error = %e, "Failed to write audit record");
        }
    }
}
