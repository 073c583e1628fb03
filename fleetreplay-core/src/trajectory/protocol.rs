//! Trajectory channel messages
//!
//! Requests:
//! - `{"request": "trajectory", "param": {"map_name": ...}}`
//! - `{"request": "time"}`
//! - `{"request": "trajectory_load", "param": {"map_name": ..., "data": ...}}`
//!
//! Every request gets exactly one JSON response.

use serde_json::{Value, json};
use std::time::{SystemTime, UNIX_EPOCH};

/// A parsed trajectory-channel request
#[derive(Debug, Clone, PartialEq)]
pub enum TrajectoryRequest {
    /// Paths and conflicts for one map
    Trajectory { map_name: String },

    /// Current server time
    Time,

    /// Prime the store with a response for one map
    Load { map_name: String, data: Value },

    /// Anything else; carries the request tag if there was one
    Unknown(Option<String>),
}

impl TrajectoryRequest {
    /// Parse a request document
    pub fn from_value(value: &Value) -> Self {
        let param = value.get("param");
        let map_name = || {
            param
                .and_then(|p| p.get("map_name"))
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string()
        };

        match value.get("request").and_then(Value::as_str) {
            Some("trajectory") => TrajectoryRequest::Trajectory {
                map_name: map_name(),
            },
            Some("time") => TrajectoryRequest::Time,
            Some("trajectory_load") => TrajectoryRequest::Load {
                map_name: map_name(),
                data: param
                    .and_then(|p| p.get("data"))
                    .cloned()
                    .unwrap_or(Value::Null),
            },
            other => TrajectoryRequest::Unknown(other.map(str::to_string)),
        }
    }

    /// Request tag, for logs
    pub fn name(&self) -> &str {
        match self {
            TrajectoryRequest::Trajectory { .. } => "trajectory",
            TrajectoryRequest::Time => "time",
            TrajectoryRequest::Load { .. } => "trajectory_load",
            TrajectoryRequest::Unknown(_) => "unknown",
        }
    }
}

/// Build a trajectory request
pub fn trajectory_request(map_name: &str) -> Value {
    json!({"request": "trajectory", "param": {"map_name": map_name}})
}

/// Build a time request
pub fn time_request() -> Value {
    json!({"request": "time"})
}

/// Build a load request
pub fn load_request(map_name: &str, data: Value) -> Value {
    json!({
        "request": "trajectory_load",
        "param": {"map_name": map_name, "data": data}
    })
}

/// Well-formed response with no paths
pub fn empty_trajectory_response() -> Value {
    json!({"response": "trajectory", "values": [], "conflicts": []})
}

/// Time response carrying `nanos` since the epoch
pub fn time_response(nanos: u64) -> Value {
    json!({"response": "time", "values": [nanos]})
}

/// Current time in epoch nanoseconds
pub fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos().min(u128::from(u64::MAX)) as u64)
        .unwrap_or(0)
}

/// Successful load acknowledgment
pub fn load_ok(map_name: &str) -> Value {
    json!({"response": "trajectory_load", "status": "ok", "map_name": map_name})
}

/// Failed load acknowledgment
pub fn load_error(map_name: &str, message: &str) -> Value {
    json!({
        "response": "trajectory_load",
        "status": "error",
        "map_name": map_name,
        "message": message
    })
}

/// Error payload for requests the channel does not understand
pub fn request_error(message: impl Into<String>) -> Value {
    json!({"error": message.into()})
}

/// Whether a load acknowledgment reports success
pub fn is_load_ok(response: &Value) -> bool {
    response.get("response").and_then(Value::as_str) == Some("trajectory_load")
        && response.get("status").and_then(Value::as_str) == Some("ok")
}

/// Whether `response` is the reply to `request`.
///
/// The `response` tag must match the request kind. Trajectory replies whose
/// paths name a map must name the requested one.
pub fn answers(request: &TrajectoryRequest, response: &Value) -> bool {
    let tag = response.get("response").and_then(Value::as_str);
    match request {
        TrajectoryRequest::Trajectory { map_name } => {
            tag == Some("trajectory")
                && response
                    .get("values")
                    .and_then(Value::as_array)
                    .is_none_or(|paths| {
                        paths.iter().all(|path| {
                            path.get("map_name")
                                .and_then(Value::as_str)
                                .is_none_or(|m| m == map_name)
                        })
                    })
        }
        TrajectoryRequest::Time => tag == Some("time"),
        TrajectoryRequest::Load { map_name, .. } => acknowledges(map_name, response),
        TrajectoryRequest::Unknown(_) => false,
    }
}

/// Whether `response` acknowledges a load for `map_name`.
///
/// Acknowledgments without a `map_name` are accepted for any map.
pub fn acknowledges(map_name: &str, response: &Value) -> bool {
    response.get("response").and_then(Value::as_str) == Some("trajectory_load")
        && response
            .get("map_name")
            .and_then(Value::as_str)
            .is_none_or(|m| m == map_name)
}

/// Number of paths in a trajectory response
pub fn path_count(response: &Value) -> usize {
    response
        .get("values")
        .and_then(Value::as_array)
        .map_or(0, Vec::len)
}

/// Whether a load payload carries anything.
///
/// Null, empty objects, empty arrays and empty strings do not.
pub fn has_content(data: &Value) -> bool {
    match data {
        Value::Null => false,
        Value::Object(map) => !map.is_empty(),
        Value::Array(list) => !list.is_empty(),
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}
