//! Merged, time-ordered view of a capture session's history

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::time::Duration;

use crate::capture::{History, parse_timestamp};
use crate::event::{
    Envelope, EventKind, Payload, TRAJECTORY_TYPE, describe_entry, trajectory_map_name,
};
use crate::normalize::normalize_event;
use crate::trajectory::protocol;

/// Output channel an entry is sent on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Generic typed-event channel (`/_internal`)
    Events,
    /// Trajectory request/response channel (`/trajectory`)
    Trajectory,
}

impl Channel {
    pub fn name(&self) -> &'static str {
        match self {
            Channel::Events => "events",
            Channel::Trajectory => "trajectory",
        }
    }
}

/// One outgoing replay message
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Push on the generic channel
    Event(Envelope),

    /// `trajectory_load` on the trajectory channel
    TrajectoryLoad { map_name: String, data: Payload },
}

impl Dispatch {
    /// Build the message for a captured payload.
    ///
    /// Trajectory data becomes a load request keyed by `map_name` (or the map
    /// named by its first path). Everything else is normalized and sent under
    /// the wire kind of its capture type.
    pub fn from_capture(capture_type: &str, data: Payload, map_name: Option<&str>) -> Self {
        match EventKind::from_capture_type(capture_type) {
            None => Dispatch::TrajectoryLoad {
                map_name: map_name
                    .map(str::to_string)
                    .unwrap_or_else(|| trajectory_map_name(&data)),
                data,
            },
            Some(kind) => {
                let data = normalize_event(&kind, data);
                Dispatch::Event(Envelope::new(kind.wire_kind(), data))
            }
        }
    }

    pub fn channel(&self) -> Channel {
        match self {
            Dispatch::Event(_) => Channel::Events,
            Dispatch::TrajectoryLoad { .. } => Channel::Trajectory,
        }
    }

    /// Wire kind or request tag
    pub fn kind(&self) -> &str {
        match self {
            Dispatch::Event(envelope) => &envelope.kind,
            Dispatch::TrajectoryLoad { .. } => TRAJECTORY_TYPE,
        }
    }

    /// Short identifier for logs
    pub fn describe(&self) -> String {
        match self {
            Dispatch::Event(envelope) => describe_entry(&envelope.kind, &envelope.data),
            Dispatch::TrajectoryLoad { map_name, data } => {
                format!("map {} ({} paths)", map_name, protocol::path_count(payload_body(data)))
            }
        }
    }

    /// Message document to send
    pub fn to_message(&self) -> Value {
        match self {
            Dispatch::Event(envelope) => serde_json::json!({
                "type": envelope.kind,
                "data": envelope.data,
            }),
            Dispatch::TrajectoryLoad { map_name, data } => {
                protocol::load_request(map_name, data.clone())
            }
        }
    }
}

/// Response body of a possibly wrapped `{timestamp, response}` record
fn payload_body(data: &Payload) -> &Payload {
    match data.get("response") {
        Some(inner) if inner.is_object() => inner,
        _ => data,
    }
}

/// One timeline entry
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineEntry {
    pub timestamp: DateTime<Utc>,
    pub capture_type: String,
    pub dispatch: Dispatch,
}

/// History of every type merged into one timestamp-ordered sequence.
///
/// Ties keep per-type arrival order. Built fresh for each replay run.
#[derive(Debug, Clone, Default)]
pub struct ReplayTimeline {
    entries: Vec<TimelineEntry>,
    skipped: usize,
}

impl ReplayTimeline {
    /// Merge and order all history lists.
    ///
    /// Entries with unparseable timestamps are skipped and counted.
    pub fn build(history: &History) -> Self {
        let mut entries = Vec::with_capacity(history.values().map(Vec::len).sum());
        let mut skipped = 0;

        for (capture_type, list) in history {
            for entry in list {
                let Some(timestamp) = parse_timestamp(&entry.timestamp) else {
                    tracing::warn!(
                        capture_type = %capture_type,
                        timestamp = %entry.timestamp,
                        "Skipping entry with unparseable timestamp"
                    );
                    skipped += 1;
                    continue;
                };
                entries.push(TimelineEntry {
                    timestamp,
                    capture_type: capture_type.clone(),
                    dispatch: Dispatch::from_capture(capture_type, entry.data.clone(), None),
                });
            }
        }

        // Stable: equal timestamps stay in per-type arrival order
        entries.sort_by_key(|e| e.timestamp);

        Self { entries, skipped }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of history entries left out
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    /// Time between the first and last entry
    pub fn span(&self) -> Duration {
        match (self.entries.first(), self.entries.last()) {
            (Some(first), Some(last)) => (last.timestamp - first.timestamp)
                .to_std()
                .unwrap_or_default(),
            _ => Duration::ZERO,
        }
    }
}

impl IntoIterator for ReplayTimeline {
    type Item = TimelineEntry;
    type IntoIter = std::vec::IntoIter<TimelineEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::HistoryEntry;
    use serde_json::json;

    fn entry(timestamp: &str, data: Value) -> HistoryEntry {
        HistoryEntry {
            timestamp: timestamp.to_string(),
            source: "test".to_string(),
            data,
        }
    }

    #[test]
    fn test_build_orders_across_types() {
        let mut history = History::new();
        history.insert(
            "door_state".into(),
            vec![
                entry("2025-01-01T00:00:01", json!({"door_name": "d1"})),
                entry("2025-01-01T00:00:04", json!({"door_name": "d2"})),
            ],
        );
        history.insert(
            "lift_state".into(),
            vec![entry("2025-01-01T00:00:02+00:00", json!({"lift_name": "l1"}))],
        );
        history.insert(
            "trajectory".into(),
            vec![entry(
                "2025-01-01T00:00:03Z",
                json!({"values": [{"map_name": "L1"}]}),
            )],
        );

        let timeline = ReplayTimeline::build(&history);
        let kinds: Vec<&str> = timeline.entries().iter().map(|e| e.dispatch.kind()).collect();
        assert_eq!(
            kinds,
            vec!["door_state_update", "lift_state_update", "trajectory", "door_state_update"]
        );
        assert_eq!(timeline.span(), Duration::from_secs(3));

        match &timeline.entries()[2].dispatch {
            Dispatch::TrajectoryLoad { map_name, .. } => assert_eq!(map_name, "L1"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_ties_keep_arrival_order() {
        let mut history = History::new();
        history.insert(
            "task_log".into(),
            vec![
                entry("2025-01-01T00:00:00", json!({"task_id": "first"})),
                entry("2025-01-01T00:00:00", json!({"task_id": "second"})),
                entry("2025-01-01T00:00:00", json!({"task_id": "third"})),
            ],
        );

        let ids: Vec<String> = ReplayTimeline::build(&history)
            .into_iter()
            .map(|e| e.dispatch.describe())
            .collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_bad_timestamps_are_skipped() {
        let mut history = History::new();
        history.insert(
            "door_state".into(),
            vec![
                entry("yesterday", json!({})),
                entry("2025-01-01T00:00:00", json!({})),
            ],
        );

        let timeline = ReplayTimeline::build(&history);
        assert_eq!(timeline.len(), 1);
        assert_eq!(timeline.skipped(), 1);
    }

    #[test]
    fn test_native_fleet_states_are_normalized() {
        let mut history = History::new();
        history.insert(
            "fleet_state_ros2".into(),
            vec![entry(
                "2025-01-01T00:00:00",
                json!({"name": "f1", "robots": [{"name": "r1", "battery_percent": 50.0, "mode": {"mode": 2}}]}),
            )],
        );

        let timeline = ReplayTimeline::build(&history);
        let message = timeline.entries()[0].dispatch.to_message();
        assert_eq!(message["type"], "fleet_state_update");
        assert_eq!(message["data"]["robots"]["r1"]["battery"], 0.5);
    }

    #[test]
    fn test_unknown_types_keep_their_tag() {
        let dispatch = Dispatch::from_capture("alert_request", json!({"id": "a"}), None);
        assert_eq!(dispatch.channel(), Channel::Events);
        assert_eq!(dispatch.to_message()["type"], "alert_request");
    }

    #[test]
    fn test_empty_history() {
        let timeline = ReplayTimeline::build(&History::new());
        assert!(timeline.is_empty());
        assert_eq!(timeline.span(), Duration::ZERO);
    }
}
