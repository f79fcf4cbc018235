//! Inbound protocol dialects.
//!
//! Google-style fulfillment bodies and Alexa-style directives share one
//! caching/fallback policy. Everything that differs between them (where the
//! intent lives, how the caller is identified, which ids are requested, what
//! a degraded answer looks like) is supplied by the adapter selected through
//! [`Dialect`].

mod alexa;
mod google;

use std::collections::HashMap;

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;

use crate::cache::CachedState;
use crate::error::EdgeError;

/// Logical operation an inbound call maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// List every endpoint the caller can control. Cached per caller.
    Enumerate,
    /// Read current attributes of specific endpoints. Falls back offline.
    ReadState,
    /// Change endpoint state. Never cached.
    Execute,
    /// Anything else. Forwarded untouched.
    Unclassified,
}

impl Operation {
    /// Stable lowercase name used in logs and audit records.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Enumerate => "enumerate",
            Operation::ReadState => "read_state",
            Operation::Execute => "execute",
            Operation::Unclassified => "unclassified",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed inbound fulfillment request.
#[derive(Debug, Clone)]
pub struct InboundCall {
    /// Classified operation.
    pub operation: Operation,
    /// Dialect-level intent name as sent by the caller.
    pub intent: String,
    /// Key for the enumeration cache.
    pub caller_identity: String,
    /// Endpoint ids named by the request (ReadState and Execute).
    pub endpoint_ids: Vec<String>,
    /// Caller-supplied request/message id.
    pub request_id: Option<String>,
    /// `Authorization` value to send upstream.
    pub authorization: Option<String>,
    /// Raw inbound body, forwarded unchanged.
    pub body: Bytes,
    /// Parsed inbound body.
    pub json: Value,
}

/// Supported inbound dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    /// `inputs[0].intent` driven, identified by `agentUserId`.
    Google,
    /// `directive.header` driven, identified by a hash of the bearer token.
    Alexa,
}

impl Dialect {
    /// Short name used in logs, audit records and events.
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Google => "google",
            Dialect::Alexa => "alexa",
        }
    }

    /// Path the body is forwarded to on the downstream controller.
    pub fn upstream_path(&self) -> &'static str {
        match self {
            Dialect::Google => "/api/google_assistant",
            Dialect::Alexa => "/api/alexa",
        }
    }

    /// Parse and classify an inbound body.
    ///
    /// # Errors
    ///
    /// [`EdgeError::MalformedRequest`] when the body is not a JSON object.
    pub fn parse(&self, body: Bytes, authorization: Option<&str>) -> Result<InboundCall, EdgeError> {
        let json: Value =
            serde_json::from_slice(&body).map_err(|e| EdgeError::MalformedRequest {
                details: format!("body is not valid JSON: {e}"),
            })?;
        if !json.is_object() {
            return Err(EdgeError::MalformedRequest {
                details: "body must be a JSON object".to_string(),
            });
        }

        Ok(match self {
            Dialect::Google => google::parse(body, json, authorization),
            Dialect::Alexa => alexa::parse(body, json, authorization),
        })
    }

    /// Build the degraded ReadState answer from cached entries.
    ///
    /// `cached` is never empty when called by the router.
    pub fn build_fallback(&self, call: &InboundCall, cached: &[(String, CachedState)]) -> Value {
        match self {
            Dialect::Google => google::build_fallback(call, cached),
            Dialect::Alexa => alexa::build_fallback(call, cached),
        }
    }

    /// Per-endpoint states carried by a successful ReadState response.
    pub fn extract_states(&self, response: &Value) -> HashMap<String, Value> {
        match self {
            Dialect::Google => google::extract_states(response),
            Dialect::Alexa => alexa::extract_states(response),
        }
    }

    /// Number of endpoints listed by a successful Enumerate response.
    pub fn enumeration_count(&self, response: &Value) -> usize {
        match self {
            Dialect::Google => google::enumeration_count(response),
            Dialect::Alexa => alexa::enumeration_count(response),
        }
    }

    /// Payload of the `execute` notification.
    pub fn execute_event_data(&self, call: &InboundCall) -> Value {
        match self {
            Dialect::Google => google::execute_event_data(call),
            Dialect::Alexa => alexa::execute_event_data(call),
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// String at a JSON pointer, if present.
fn str_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(Value::as_str)
}

/// Length of the array at a JSON pointer, zero when absent.
fn array_len_at(value: &Value, pointer: &str) -> usize {
    value
        .pointer(pointer)
        .and_then(Value::as_array)
        .map_or(0, Vec::len)
}
