//! Google Assistant smart-home fulfillment.
//!
//! Intents: `action.devices.SYNC` (enumerate), `action.devices.QUERY`
//! (read state), `action.devices.EXECUTE` (execute).

use std::collections::HashMap;

use bytes::Bytes;
use serde_json::{Map, Value, json};

use super::{InboundCall, Operation, array_len_at, str_at};
use crate::cache::CachedState;

const SYNC: &str = "action.devices.SYNC";
const QUERY: &str = "action.devices.QUERY";
const EXECUTE: &str = "action.devices.EXECUTE";

pub(super) fn parse(body: Bytes, json: Value, authorization: Option<&str>) -> InboundCall {
    let intent = str_at(&json, "/inputs/0/intent").unwrap_or("unknown").to_string();

    let operation = match intent.as_str() {
        SYNC => Operation::Enumerate,
        QUERY => Operation::ReadState,
        EXECUTE => Operation::Execute,
        _ => Operation::Unclassified,
    };

    let endpoint_ids = match operation {
        Operation::ReadState => query_device_ids(&json),
        Operation::Execute => execute_device_ids(&json),
        _ => Vec::new(),
    };

    InboundCall {
        operation,
        intent,
        caller_identity: str_at(&json, "/agentUserId").unwrap_or("default").to_string(),
        endpoint_ids,
        request_id: str_at(&json, "/requestId").map(str::to_string),
        authorization: authorization.map(str::to_string),
        body,
        json,
    }
}

/// `inputs[0].payload.devices[].id`
fn query_device_ids(json: &Value) -> Vec<String> {
    json.pointer("/inputs/0/payload/devices")
        .and_then(Value::as_array)
        .map(|devices| ids_of(devices))
        .unwrap_or_default()
}

/// `inputs[0].payload.commands[].devices[].id`, first occurrence order.
fn execute_device_ids(json: &Value) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    let commands = json
        .pointer("/inputs/0/payload/commands")
        .and_then(Value::as_array);
    for command in commands.into_iter().flatten() {
        let devices = command.get("devices").and_then(Value::as_array);
        for id in devices.map(|d| ids_of(d)).unwrap_or_default() {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
    }
    ids
}

fn ids_of(devices: &[Value]) -> Vec<String> {
    devices
        .iter()
        .filter_map(|d| d.get("id").and_then(Value::as_str))
        .map(str::to_string)
        .collect()
}

pub(super) fn build_fallback(call: &InboundCall, cached: &[(String, CachedState)]) -> Value {
    let devices: Map<String, Value> = cached
        .iter()
        .map(|(id, state)| (id.clone(), state.marked()))
        .collect();

    json!({
        "requestId": call.request_id,
        "payload": { "devices": devices },
    })
}

/// `payload.devices` is an object keyed by device id in QUERY responses.
pub(super) fn extract_states(response: &Value) -> HashMap<String, Value> {
    response
        .pointer("/payload/devices")
        .and_then(Value::as_object)
        .map(|devices| {
            devices
                .iter()
                .map(|(id, state)| (id.clone(), state.clone()))
                .collect()
        })
        .unwrap_or_default()
}

pub(super) fn enumeration_count(response: &Value) -> usize {
    array_len_at(response, "/payload/devices")
}

/// Commands with any `challenge` (PIN or acknowledgement) removed.
pub(super) fn execute_event_data(call: &InboundCall) -> Value {
    let mut commands = call
        .json
        .pointer("/inputs/0/payload/commands")
        .cloned()
        .unwrap_or_else(|| Value::Array(Vec::new()));
    if let Value::Array(commands) = &mut commands {
        commands.iter_mut().for_each(strip_challenges);
    }
    json!({
        "dialect": "google",
        "device_ids": call.endpoint_ids,
        "commands": commands,
    })
}

fn strip_challenges(command: &mut Value) {
    let Value::Object(command) = command else {
        return;
    };
    command.remove("challenge");
    if let Some(Value::Array(executions)) = command.get_mut("execution") {
        for execution in executions {
            if let Value::Object(execution) = execution {
                execution.remove("challenge");
            }
        }
    }
}
