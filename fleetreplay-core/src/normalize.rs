//! Conversion between native and canonical fleet state schemas
//!
//! Fleet states recorded straight from the robot middleware ("native") carry
//! robots as a list of structs, battery as a percentage, an integer mode and
//! a `level_name` location. The gateway ("canonical") expects robots keyed by
//! name, battery in `[0, 1]`, a status string and a `map` location.
//!
//! Conversion is idempotent: a fleet whose robots already carry
//! `location.map` is returned unchanged.

use serde_json::{Map, Value, json};

use crate::event::{EventKind, Payload};

/// Status reported for modes missing from the lookup table
pub const DEFAULT_STATUS: &str = "idle";

/// Canonical status for a native robot mode code
pub fn status_for_mode(mode: i64) -> &'static str {
    match mode {
        0 => "idle",
        1 => "charging",
        2 => "moving",
        3 => "paused",
        4 => "waiting",
        5 => "emergency",
        _ => DEFAULT_STATUS,
    }
}

/// Normalize a payload on its way to the generic channel.
///
/// Only fleet states change shape; every other kind passes through.
pub fn normalize_event(kind: &EventKind, data: Payload) -> Payload {
    match kind {
        EventKind::FleetState => normalize_fleet_state(data),
        _ => data,
    }
}

/// Convert a fleet state to the canonical schema.
///
/// Non-object payloads and fleets without a robot collection are returned
/// as-is.
pub fn normalize_fleet_state(data: Payload) -> Payload {
    let mut fleet = match data {
        Value::Object(fleet) => fleet,
        other => return other,
    };

    let canonical = fleet
        .get("robots")
        .and_then(Value::as_object)
        .is_some_and(is_canonical);
    if canonical {
        return Value::Object(fleet);
    }

    let robots = match fleet.get("robots") {
        Some(Value::Object(robots)) => robots
            .iter()
            .filter(|(_, robot)| robot.is_object())
            .map(|(name, robot)| (name.clone(), normalize_robot(robot)))
            .collect::<Map<String, Value>>(),
        Some(Value::Array(robots)) => robots
            .iter()
            .filter_map(|robot| {
                let name = robot.get("name")?.as_str()?;
                Some((name.to_string(), normalize_robot(robot)))
            })
            .collect::<Map<String, Value>>(),
        _ => return Value::Object(fleet),
    };

    fleet.insert("robots".to_string(), Value::Object(robots));
    Value::Object(fleet)
}

/// A keyed robot map is canonical when its first robot has `location.map`.
fn is_canonical(robots: &Map<String, Value>) -> bool {
    robots
        .values()
        .find(|r| r.is_object())
        .and_then(|r| r.get("location"))
        .is_some_and(|loc| loc.get("map").is_some())
}

fn normalize_robot(robot: &Value) -> Value {
    let str_or_empty = |field: &str| robot.get(field).and_then(Value::as_str).unwrap_or("");
    let location = robot.get("location").cloned().unwrap_or_else(|| json!({}));

    let battery_percent = robot
        .get("battery_percent")
        .and_then(Value::as_f64)
        .unwrap_or(100.0);

    let mode = robot
        .get("mode")
        .and_then(|m| m.get("mode"))
        .and_then(Value::as_i64)
        .unwrap_or(0);

    let map = location
        .get("level_name")
        .or_else(|| location.get("map"))
        .cloned()
        .unwrap_or_else(|| json!(""));
    let coord = |field: &str| location.get(field).cloned().unwrap_or_else(|| json!(0.0));

    let mut out = Map::new();
    out.insert("name".into(), json!(str_or_empty("name")));
    out.insert("task_id".into(), json!(str_or_empty("task_id")));
    out.insert("battery".into(), json!(battery_percent / 100.0));
    out.insert(
        "location".into(),
        json!({
            "map": map,
            "x": coord("x"),
            "y": coord("y"),
            "yaw": coord("yaw"),
        }),
    );
    out.insert("status".into(), json!(status_for_mode(mode)));

    if let Some(path) = robot.get("path") {
        out.insert("path".into(), path.clone());
    }

    out.insert(
        "commission".into(),
        robot.get("commission").cloned().unwrap_or_else(|| {
            json!({
                "direct_tasks": true,
                "dispatch_tasks": true,
                "idle_behavior": true,
            })
        }),
    );
    out.insert(
        "mutex_groups".into(),
        robot
            .get("mutex_groups")
            .cloned()
            .unwrap_or_else(|| json!({"locked": [], "requesting": []})),
    );
    out.insert(
        "issues".into(),
        robot.get("issues").cloned().unwrap_or_else(|| json!([])),
    );

    if let Some(t) = location.get("t") {
        let sec = t.get("sec").and_then(Value::as_i64).unwrap_or(0);
        let nanosec = t.get("nanosec").and_then(Value::as_i64).unwrap_or(0);
        out.insert(
            "unix_millis_time".into(),
            json!(sec * 1000 + nanosec / 1_000_000),
        );
    }

    Value::Object(out)
}
