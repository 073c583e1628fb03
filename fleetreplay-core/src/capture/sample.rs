//! Flattened, type-grouped view of the latest states
//!
//! Groups the collapsed table by domain concept (all doors, all fleets, ...)
//! so a session file can be fed straight back in as a snapshot fixture.

use serde_json::{Map, Value, json};

use super::session::LatestStates;

/// Capture type -> sample key for the plain list groupings
const LIST_GROUPS: [(&str, &str); 7] = [
    ("fleet_state", "fleets"),
    ("door_state", "doors"),
    ("lift_state", "lifts"),
    ("dispenser_state", "dispensers"),
    ("ingestor_state", "ingestors"),
    ("alert_request", "alerts"),
    ("beacon_state", "beacons"),
];

/// Build the `sample_format` block from the latest-state table
pub fn sample_format(latest: &LatestStates) -> Value {
    let mut sample = Map::new();

    if let Some(map) = latest.get("building_map").and_then(|m| m.values().next()) {
        sample.insert("building_map".into(), map.clone());
    }

    for (capture_type, group) in LIST_GROUPS {
        if let Some(entries) = latest.get(capture_type) {
            sample.insert(
                group.into(),
                Value::Array(entries.values().cloned().collect()),
            );
        }
    }

    if let Some(states) = latest.get("task_state") {
        let logs = latest.get("task_log");
        let tasks = states
            .iter()
            .map(|(task_id, state)| {
                let mut task = json!({ "state": state });
                if let Some(log) = logs.and_then(|l| l.get(task_id)) {
                    task["log"] = log.clone();
                }
                task
            })
            .collect();
        sample.insert("tasks".into(), Value::Array(tasks));
    }

    if let Some(trajectories) = latest.get("trajectory") {
        sample.insert(
            "trajectories".into(),
            Value::Object(
                trajectories
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            ),
        );
    }

    Value::Object(sample)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn table(entries: &[(&str, &str, Value)]) -> LatestStates {
        let mut latest: LatestStates = BTreeMap::new();
        for (t, k, v) in entries {
            latest
                .entry(t.to_string())
                .or_default()
                .insert(k.to_string(), v.clone());
        }
        latest
    }

    #[test]
    fn test_groups_and_task_join() {
        let latest = table(&[
            ("door_state", "d1", json!({"door_name": "d1"})),
            ("door_state", "d2", json!({"door_name": "d2"})),
            ("task_state", "t1", json!({"booking": {"id": "t1"}})),
            ("task_state", "t2", json!({"booking": {"id": "t2"}})),
            ("task_log", "t1", json!({"task_id": "t1", "log": []})),
            ("building_map", "site", json!({"name": "site"})),
            ("trajectory", "L1", json!({"values": []})),
        ]);

        let sample = sample_format(&latest);
        assert_eq!(sample["doors"].as_array().unwrap().len(), 2);
        assert_eq!(sample["building_map"]["name"], "site");
        assert_eq!(sample["tasks"][0]["log"]["task_id"], "t1");
        assert!(sample["tasks"][1].get("log").is_none());
        assert!(sample["trajectories"]["L1"].is_object());
        assert!(sample.get("fleets").is_none());
    }

    #[test]
    fn test_empty_table() {
        assert_eq!(sample_format(&BTreeMap::new()), json!({}));
    }
}
