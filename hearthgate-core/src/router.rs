//! Intent-aware caching/fallback policy.
//!
//! One policy serves both dialects:
//!
//! | Operation | Cache | Outage behaviour |
//! |---|---|---|
//! | Enumerate | served from the enumeration cache while fresh | error |
//! | ReadState | always upstream first, successful reads refresh the state cache | serve cached states |
//! | Execute | never | error |
//! | Unclassified | never | error |
//!
//! Every request, whatever its fate, produces exactly one audit record and
//! at most one event notification. Locks are only taken inside the cache and
//! limiter calls, never across the upstream await.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::Utc;
use http::{Method, StatusCode};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::audit::{AuditLogger, AuditRecord, CacheState};
use crate::cache::{EnumerationPayload, FreshnessCache};
use crate::dialect::{Dialect, InboundCall, Operation};
use crate::error::EdgeError;
use crate::events::{EdgeEvent, EventNotifier};
use crate::rate_limiter::{Admission, SlidingWindowLimiter};
use crate::upstream::{PassthroughResponse, RelayHeaders, UpstreamCaller, UpstreamOutcome};

/// Router tuning.
#[derive(Debug, Clone, Copy)]
pub struct RouterConfig {
    /// Lifetime of a cached enumeration.
    pub enumeration_ttl: Duration,
    /// Largest accepted inbound body.
    pub max_body_bytes: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            enumeration_ttl: Duration::from_secs(300),
            max_body_bytes: 1024 * 1024,
        }
    }
}

/// An inbound dialect request as delivered by the HTTP layer.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    /// Request body, or why it could not be read.
    pub body: Result<Bytes, String>,
    /// Rate-limit identity of the caller.
    pub client_ip: String,
    /// Inbound `Authorization` header.
    pub authorization: Option<String>,
}

/// A successful answer.
#[derive(Debug, Clone)]
pub struct EdgeResponse {
    pub status: StatusCode,
    /// JSON body.
    pub body: Bytes,
    pub cache_state: CacheState,
}

impl EdgeResponse {
    fn live(status: StatusCode, body: Bytes) -> Self {
        Self {
            status,
            body,
            cache_state: CacheState::Live,
        }
    }
}

/// Orchestrates limiter, cache, upstream, notifier and audit for each call.
pub struct EdgeRouter {
    cache: Arc<FreshnessCache>,
    limiter: Arc<SlidingWindowLimiter>,
    upstream: Arc<dyn UpstreamCaller>,
    notifier: EventNotifier,
    audit: Arc<AuditLogger>,
    config: RouterConfig,
}

impl EdgeRouter {
    pub fn new(
        cache: Arc<FreshnessCache>,
        limiter: Arc<SlidingWindowLimiter>,
        upstream: Arc<dyn UpstreamCaller>,
        notifier: EventNotifier,
        audit: Arc<AuditLogger>,
        config: RouterConfig,
    ) -> Self {
        Self {
            cache,
            limiter,
            upstream,
            notifier,
            audit,
            config,
        }
    }

    pub fn config(&self) -> RouterConfig {
        self.config
    }

    /// Handle one dialect request end to end.
    ///
    /// # Errors
    ///
    /// Any [`EdgeError`]; the error has already been audited.
    pub async fn handle(
        &self,
        dialect: Dialect,
        request: InboundRequest,
    ) -> Result<EdgeResponse, EdgeError> {
        let started = Instant::now();
        let mut record = AuditRecord::new(dialect, request.client_ip.clone());

        let result = self.process(dialect, request, &mut record).await;

        record.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        record.timestamp = Utc::now();
        match &result {
            Ok(response) => {
                record.status = response.status.as_u16();
                record.cache_state = response.cache_state;
            }
            Err(e) => {
                record.status = e.status_code().as_u16();
                record.error = Some(e.error_code());
            }
        }
        self.audit.record(&record);

        result
    }

    /// Relay a non-dialect request to upstream untouched.
    pub async fn passthrough(
        &self,
        method: Method,
        path_and_query: &str,
        body: Bytes,
        headers: RelayHeaders<'_>,
    ) -> PassthroughResponse {
        self.upstream
            .passthrough(method, path_and_query, body, headers)
            .await
    }

    async fn process(
        &self,
        dialect: Dialect,
        request: InboundRequest,
        record: &mut AuditRecord,
    ) -> Result<EdgeResponse, EdgeError> {
        if let Admission::Rejected { retry_after } = self.limiter.admit(&request.client_ip) {
            warn!(
                client = %request.client_ip,
                dialect = dialect.as_str(),
                "Rate limit exceeded"
            );
            return Err(EdgeError::RateLimited {
                retry_after_secs: retry_after.as_secs(),
            });
        }

        let body = request
            .body
            .map_err(|details| EdgeError::MalformedRequest { details })?;
        if body.len() > self.config.max_body_bytes {
            return Err(EdgeError::MalformedRequest {
                details: format!(
                    "body of {} bytes exceeds {} byte limit",
                    body.len(),
                    self.config.max_body_bytes
                ),
            });
        }

        let call = dialect.parse(body, request.authorization.as_deref())?;

        record.operation = call.operation;
        record.intent.clone_from(&call.intent);
        if let Some(ref id) = call.request_id {
            record.request_id.clone_from(id);
        }
        if matches!(call.operation, Operation::ReadState | Operation::Execute) {
            record.set_device_ids(&call.endpoint_ids);
        }

        debug!(
            dialect = dialect.as_str(),
            operation = call.operation.as_str(),
            intent = %call.intent,
            endpoints = call.endpoint_ids.len(),
            "Classified inbound request"
        );

        match call.operation {
            Operation::Enumerate => self.enumerate(dialect, &call, record).await,
            Operation::ReadState => self.read_state(dialect, &call).await,
            Operation::Execute => self.execute(dialect, &call).await,
            Operation::Unclassified => self.forward_unclassified(dialect, &call).await,
        }
    }

    async fn forward(&self, dialect: Dialect, call: &InboundCall) -> UpstreamOutcome {
        self.upstream
            .call(
                dialect.upstream_path(),
                call.body.clone(),
                call.authorization.as_deref(),
            )
            .await
    }

    async fn enumerate(
        &self,
        dialect: Dialect,
        call: &InboundCall,
        record: &mut AuditRecord,
    ) -> Result<EdgeResponse, EdgeError> {
        if let Some(payload) = self.cache.get_enumeration(&call.caller_identity) {
            debug!(
                dialect = dialect.as_str(),
                devices = payload.device_count,
                "Enumeration served from cache"
            );
            record.device_count = Some(payload.device_count);
            return Ok(EdgeResponse {
                status: StatusCode::OK,
                body: payload.body,
                cache_state: CacheState::Cached,
            });
        }

        let response = self.forward(dialect, call).await.into_result()?;
        let device_count = dialect.enumeration_count(&response.json);

        self.cache.put_enumeration(
            &call.caller_identity,
            EnumerationPayload {
                body: response.body.clone(),
                device_count,
            },
            self.config.enumeration_ttl,
        );
        record.device_count = Some(device_count);

        info!(
            dialect = dialect.as_str(),
            devices = device_count,
            ttl_secs = self.config.enumeration_ttl.as_secs(),
            "Enumeration cached"
        );
        self.notifier.notify(
            EdgeEvent::Enumerate,
            json!({
                "dialect": dialect.as_str(),
                "caller": call.caller_identity,
                "device_count": device_count,
            }),
        );

        Ok(EdgeResponse::live(response.status, response.body))
    }

    async fn read_state(
        &self,
        dialect: Dialect,
        call: &InboundCall,
    ) -> Result<EdgeResponse, EdgeError> {
        let outcome = self.forward(dialect, call).await;

        if !outcome.is_outage() {
            let response = outcome.into_result()?;
            let states = dialect.extract_states(&response.json);
            debug!(
                dialect = dialect.as_str(),
                refreshed = states.len(),
                "State cache refreshed"
            );
            self.cache.bulk_put_state(states);
            return Ok(EdgeResponse::live(response.status, response.body));
        }

        let cached = self.cache.get_states(&call.endpoint_ids);
        if cached.is_empty() {
            warn!(
                dialect = dialect.as_str(),
                requested = call.endpoint_ids.len(),
                "Upstream unavailable and no cached state to fall back on"
            );
            return Err(EdgeError::NoFallbackAvailable {
                requested: call.endpoint_ids.len(),
            });
        }

        warn!(
            dialect = dialect.as_str(),
            requested = call.endpoint_ids.len(),
            served = cached.len(),
            "Returning cached states (offline fallback)"
        );

        let fallback = dialect.build_fallback(call, &cached);
        let served: Vec<&str> = cached.iter().map(|(id, _)| id.as_str()).collect();
        self.notifier.notify(
            EdgeEvent::OfflineFallback,
            json!({
                "dialect": dialect.as_str(),
                "device_ids": call.endpoint_ids,
                "served_ids": served,
            }),
        );

        Ok(EdgeResponse {
            status: StatusCode::OK,
            body: Bytes::from(fallback.to_string()),
            cache_state: CacheState::OfflineFallback,
        })
    }

    async fn execute(&self, dialect: Dialect, call: &InboundCall) -> Result<EdgeResponse, EdgeError> {
        let response = self.forward(dialect, call).await.into_result()?;
        self.notifier
            .notify(EdgeEvent::Execute, dialect.execute_event_data(call));
        Ok(EdgeResponse::live(response.status, response.body))
    }

    async fn forward_unclassified(
        &self,
        dialect: Dialect,
        call: &InboundCall,
    ) -> Result<EdgeResponse, EdgeError> {
        warn!(
            dialect = dialect.as_str(),
            intent = %call.intent,
            "Unrecognized intent, forwarding without caching"
        );
        let response = self.forward(dialect, call).await.into_result()?;
        Ok(EdgeResponse::live(response.status, response.body))
    }
}
