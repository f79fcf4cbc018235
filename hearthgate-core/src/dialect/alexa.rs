//! Alexa smart-home skill directives.
//!
//! Classification uses `directive.header.namespace` and `name`:
//! `Alexa.Discovery`/`Discover` enumerates, `Alexa`/`ReportState` reads
//! state, and any `*Controller` namespace executes.
//!
//! Alexa carries no stable user id in the directive, so the caller identity
//! is the SHA-256 of the account-linking bearer token. The raw token is never
//! used as a cache key or logged.

use std::collections::HashMap;

use bytes::Bytes;
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};

use super::{InboundCall, Operation, array_len_at, str_at};
use crate::cache::CachedState;

const ANONYMOUS: &str = "anonymous";

pub(super) fn parse(body: Bytes, json: Value, authorization: Option<&str>) -> InboundCall {
    let namespace = str_at(&json, "/directive/header/namespace");
    let name = str_at(&json, "/directive/header/name");

    let operation = match (namespace, name) {
        (Some("Alexa.Discovery"), Some("Discover")) => Operation::Enumerate,
        (Some("Alexa"), Some("ReportState")) => Operation::ReadState,
        (Some(ns), _) if ns.ends_with("Controller") => Operation::Execute,
        _ => Operation::Unclassified,
    };

    let intent = match (namespace, name) {
        (Some(ns), Some(n)) => format!("{ns}.{n}"),
        (Some(ns), None) => ns.to_string(),
        _ => "unknown".to_string(),
    };

    let scope_token = str_at(&json, "/directive/endpoint/scope/token")
        .or_else(|| str_at(&json, "/directive/payload/scope/token"))
        .or_else(|| str_at(&json, "/directive/payload/grantee/token"))
        .filter(|t| !t.is_empty());

    let token = scope_token.or_else(|| authorization.and_then(bearer_token));
    let caller_identity = token.map_or_else(|| ANONYMOUS.to_string(), hash_token);

    // The controller authenticates with the linked-account token. Alexa puts
    // it in the directive, not in a header.
    let upstream_authorization = match (authorization, scope_token) {
        (Some(auth), _) => Some(auth.to_string()),
        (None, Some(token)) => Some(format!("Bearer {token}")),
        (None, None) => None,
    };

    let endpoint_ids = match operation {
        Operation::ReadState | Operation::Execute => {
            str_at(&json, "/directive/endpoint/endpointId")
                .map(|id| vec![id.to_string()])
                .unwrap_or_default()
        }
        _ => Vec::new(),
    };

    InboundCall {
        operation,
        intent,
        caller_identity,
        endpoint_ids,
        request_id: str_at(&json, "/directive/header/messageId").map(str::to_string),
        authorization: upstream_authorization,
        body,
        json,
    }
}

fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A `StateReport` event built from the cached entry of the requested
/// endpoint.
pub(super) fn build_fallback(call: &InboundCall, cached: &[(String, CachedState)]) -> Value {
    let mut header = Map::new();
    header.insert("namespace".into(), "Alexa".into());
    header.insert("name".into(), "StateReport".into());
    header.insert("payloadVersion".into(), "3".into());
    header.insert(
        "messageId".into(),
        uuid::Uuid::new_v4().to_string().into(),
    );
    if let Some(token) = str_at(&call.json, "/directive/header/correlationToken") {
        header.insert("correlationToken".into(), token.into());
    }

    let endpoint = match cached.first() {
        Some((id, _)) => json!({ "endpointId": id }),
        None => Value::Object(Map::new()),
    };

    let context = cached
        .first()
        .map(|(_, state)| state.marked())
        .unwrap_or_else(|| json!({"properties": []}));

    json!({
        "event": {
            "header": header,
            "endpoint": endpoint,
            "payload": {},
        },
        "context": context,
    })
}

/// Only `StateReport` responses carry reportable properties.
pub(super) fn extract_states(response: &Value) -> HashMap<String, Value> {
    let mut states = HashMap::new();
    if str_at(response, "/event/header/name") != Some("StateReport") {
        return states;
    }
    let id = str_at(response, "/event/endpoint/endpointId");
    let properties = response.pointer("/context/properties");
    if let (Some(id), Some(properties)) = (id, properties) {
        states.insert(id.to_string(), json!({ "properties": properties }));
    }
    states
}

pub(super) fn enumeration_count(response: &Value) -> usize {
    array_len_at(response, "/event/payload/endpoints")
}

pub(super) fn execute_event_data(call: &InboundCall) -> Value {
    json!({
        "dialect": "alexa",
        "namespace": str_at(&call.json, "/directive/header/namespace"),
        "name": str_at(&call.json, "/directive/header/name"),
        "device_ids": call.endpoint_ids,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Dialect;
    use chrono::Utc;

    fn directive(namespace: &str, name: &str, endpoint: Value) -> Value {
        json!({
            "directive": {
                "header": {
                    "namespace": namespace,
                    "name": name,
                    "messageId": "msg-1",
                    "correlationToken": "corr-1",
                    "payloadVersion": "3"
                },
                "endpoint": endpoint,
                "payload": {}
            }
        })
    }

    fn parse_json(value: Value, authorization: Option<&str>) -> InboundCall {
        Dialect::Alexa
            .parse(Bytes::from(value.to_string()), authorization)
            .expect("valid body")
    }

    #[test]
    fn test_discovery_identity_from_payload_scope() {
        let body = json!({
            "directive": {
                "header": {"namespace": "Alexa.Discovery", "name": "Discover", "messageId": "m"},
                "payload": {"scope": {"type": "BearerToken", "token": "secret-token"}}
            }
        });
        let call = parse_json(body, None);

        assert_eq!(call.operation, Operation::Enumerate);
        assert_eq!(call.intent, "Alexa.Discovery.Discover");
        assert_eq!(call.caller_identity, hash_token("secret-token"));
        assert_eq!(call.caller_identity.len(), 64);
        assert!(!call.caller_identity.contains("secret"));
        assert_eq!(call.authorization.as_deref(), Some("Bearer secret-token"));
    }

    #[test]
    fn test_report_state_reads_endpoint() {
        let call = parse_json(
            directive(
                "Alexa",
                "ReportState",
                json!({"endpointId": "light-1", "scope": {"token": "t"}}),
            ),
            None,
        );
        assert_eq!(call.operation, Operation::ReadState);
        assert_eq!(call.endpoint_ids, vec!["light-1"]);
        assert_eq!(call.request_id.as_deref(), Some("msg-1"));
    }

    #[test]
    fn test_controller_namespace_executes() {
        for ns in ["Alexa.PowerController", "Alexa.BrightnessController"] {
            let call = parse_json(directive(ns, "TurnOn", json!({"endpointId": "e"})), None);
            assert_eq!(call.operation, Operation::Execute, "{ns}");
        }
        let call = parse_json(directive("Alexa.Authorization", "AcceptGrant", json!({})), None);
        assert_eq!(call.operation, Operation::Unclassified);
    }

    #[test]
    fn test_identity_falls_back_to_header_then_anonymous() {
        let body = directive("Alexa.Discovery", "Discover", json!({}));
        let call = parse_json(body.clone(), Some("Bearer header-token"));
        assert_eq!(call.caller_identity, hash_token("header-token"));
        assert_eq!(call.authorization.as_deref(), Some("Bearer header-token"));

        let call = parse_json(body, None);
        assert_eq!(call.caller_identity, ANONYMOUS);
        assert!(call.authorization.is_none());
    }

    #[test]
    fn test_existing_authorization_header_is_kept() {
        let call = parse_json(
            directive("Alexa", "ReportState", json!({"endpointId": "e", "scope": {"token": "scope"}})),
            Some("Bearer other"),
        );
        assert_eq!(call.authorization.as_deref(), Some("Bearer other"));
        assert_eq!(call.caller_identity, hash_token("scope"));
    }

    #[test]
    fn test_fallback_is_state_report() {
        let call = parse_json(
            directive("Alexa", "ReportState", json!({"endpointId": "light-1"})),
            None,
        );
        let cached = vec![(
            "light-1".to_string(),
            CachedState {
                state: json!({"properties": [{"namespace": "Alexa.PowerController",
                                              "name": "powerState", "value": "ON"}]}),
                updated_at: Utc::now(),
                cached: true,
            },
        )];

        let fallback = build_fallback(&call, &cached);
        let header = &fallback["event"]["header"];
        assert_eq!(header["name"], "StateReport");
        assert_eq!(header["correlationToken"], "corr-1");
        assert_ne!(header["messageId"], "msg-1");
        assert_eq!(fallback["event"]["endpoint"]["endpointId"], "light-1");
        assert_eq!(fallback["context"]["cached"], true);
        assert_eq!(fallback["context"]["properties"][0]["value"], "ON");
    }

    #[test]
    fn test_extract_states_from_state_report() {
        let response = json!({
            "event": {
                "header": {"namespace": "Alexa", "name": "StateReport"},
                "endpoint": {"endpointId": "light-1"},
                "payload": {}
            },
            "context": {"properties": [{"name": "powerState", "value": "OFF"}]}
        });
        let states = extract_states(&response);
        assert_eq!(
            states["light-1"],
            json!({"properties": [{"name": "powerState", "value": "OFF"}]})
        );

        let error_response = json!({
            "event": {"header": {"name": "ErrorResponse"}, "endpoint": {"endpointId": "light-1"}}
        });
        assert!(extract_states(&error_response).is_empty());
    }

    #[test]
    fn test_discovery_count() {
        let response = json!({"event": {"payload": {"endpoints": [{}, {}, {}]}}});
        assert_eq!(enumeration_count(&response), 3);
    }
}
