//! Event vocabulary shared by ingestion, capture and replay
//!
//! The generic event channel speaks `{type, data}` envelopes whose `type` is a
//! wire kind such as `door_state_update`. The capture buffer files events
//! under a shorter capture type (`door_state`) keyed by the entity's
//! identifier. [`EventKind`] is the single place those two vocabularies meet.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Structured payload carried by every event
pub type Payload = Value;

/// Capture type under which trajectory responses are stored
pub const TRAJECTORY_TYPE: &str = "trajectory";

/// Capture type for fleet states taken straight from the robot middleware
pub const FLEET_STATE_ROS2_TYPE: &str = "fleet_state_ros2";

/// A message on the generic event channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Wire kind, e.g. `fleet_state_update`
    #[serde(rename = "type")]
    pub kind: String,

    /// Event payload
    pub data: Payload,
}

impl Envelope {
    /// Create a new envelope
    pub fn new(kind: impl Into<String>, data: Payload) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }
}

/// Recognized generic-channel event kinds
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    TaskState,
    TaskLog,
    FleetState,
    FleetLog,
    DoorState,
    LiftState,
    DispenserState,
    IngestorState,
    BeaconState,
    BuildingMap,
    /// Forward-compatible catch-all, carried under its literal tag
    Unknown(String),
}

impl EventKind {
    const KNOWN: [EventKind; 10] = [
        EventKind::TaskState,
        EventKind::TaskLog,
        EventKind::FleetState,
        EventKind::FleetLog,
        EventKind::DoorState,
        EventKind::LiftState,
        EventKind::DispenserState,
        EventKind::IngestorState,
        EventKind::BeaconState,
        EventKind::BuildingMap,
    ];

    /// Resolve a wire kind such as `door_state_update`
    pub fn from_wire(kind: &str) -> Self {
        Self::KNOWN
            .iter()
            .find(|k| k.wire_kind() == kind)
            .cloned()
            .unwrap_or_else(|| EventKind::Unknown(kind.to_string()))
    }

    /// Resolve a capture type such as `door_state`.
    ///
    /// `fleet_state_ros2` replays as a fleet state. Trajectory data is not a
    /// generic-channel kind and resolves to `None`.
    pub fn from_capture_type(capture_type: &str) -> Option<Self> {
        if capture_type == TRAJECTORY_TYPE {
            return None;
        }
        if capture_type == FLEET_STATE_ROS2_TYPE {
            return Some(EventKind::FleetState);
        }
        Some(
            Self::KNOWN
                .iter()
                .find(|k| k.capture_type() == capture_type)
                .cloned()
                .unwrap_or_else(|| EventKind::Unknown(capture_type.to_string())),
        )
    }

    /// Wire kind on the generic channel
    pub fn wire_kind(&self) -> &str {
        match self {
            EventKind::TaskState => "task_state_update",
            EventKind::TaskLog => "task_log_update",
            EventKind::FleetState => "fleet_state_update",
            EventKind::FleetLog => "fleet_log_update",
            EventKind::DoorState => "door_state_update",
            EventKind::LiftState => "lift_state_update",
            EventKind::DispenserState => "dispenser_state_update",
            EventKind::IngestorState => "ingestor_state_update",
            EventKind::BeaconState => "beacon_state_update",
            EventKind::BuildingMap => "building_map_update",
            EventKind::Unknown(tag) => tag,
        }
    }

    /// Type tag the capture buffer files this kind under
    pub fn capture_type(&self) -> &str {
        match self {
            EventKind::TaskState => "task_state",
            EventKind::TaskLog => "task_log",
            EventKind::FleetState => "fleet_state",
            EventKind::FleetLog => "fleet_log",
            EventKind::DoorState => "door_state",
            EventKind::LiftState => "lift_state",
            EventKind::DispenserState => "dispenser_state",
            EventKind::IngestorState => "ingestor_state",
            EventKind::BeaconState => "beacon_state",
            EventKind::BuildingMap => "building_map",
            EventKind::Unknown(tag) => tag,
        }
    }

    /// Whether this is one of the recognized kinds
    pub fn is_known(&self) -> bool {
        !matches!(self, EventKind::Unknown(_))
    }

    /// Extract the entity key from a payload of this kind.
    ///
    /// Unknown kinds have no key.
    pub fn entity_key(&self, data: &Payload) -> Option<String> {
        let field = match self {
            EventKind::TaskState => data.get("booking").and_then(|b| b.get("id")),
            EventKind::TaskLog => data.get("task_id"),
            EventKind::FleetState | EventKind::FleetLog | EventKind::BuildingMap => {
                data.get("name")
            }
            EventKind::DoorState => data.get("door_name"),
            EventKind::LiftState => data.get("lift_name"),
            EventKind::DispenserState | EventKind::IngestorState => data.get("guid"),
            EventKind::BeaconState => data.get("id"),
            EventKind::Unknown(_) => None,
        };
        field.and_then(Value::as_str).map(str::to_string)
    }
}

/// Replay priority of a capture type in snapshot mode.
///
/// Map data goes first, then fleets and tasks, then transient device
/// states. Unrecognized types sort last.
pub fn snapshot_rank(capture_type: &str) -> usize {
    const ORDER: [&str; 11] = [
        "building_map",
        "fleet_state",
        FLEET_STATE_ROS2_TYPE,
        "task_state",
        "task_log",
        "fleet_log",
        "door_state",
        "lift_state",
        "dispenser_state",
        "ingestor_state",
        "beacon_state",
    ];
    ORDER
        .iter()
        .position(|t| *t == capture_type)
        .unwrap_or(ORDER.len())
}

/// Short human-readable identifier of a payload, for progress logs
pub fn describe_entry(kind: &str, data: &Payload) -> String {
    let str_field = |v: &Payload, name: &str| {
        v.get(name)
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string()
    };

    match kind {
        "fleet_state_update" => {
            let robots: Vec<String> = match data.get("robots") {
                Some(Value::Object(map)) => map.keys().cloned().collect(),
                Some(Value::Array(list)) => list.iter().map(|r| str_field(r, "name")).collect(),
                _ => Vec::new(),
            };
            let shown = robots.iter().take(3).cloned().collect::<Vec<_>>().join(", ");
            let more = if robots.len() > 3 { "..." } else { "" };
            format!("{} (robots: {}{})", str_field(data, "name"), shown, more)
        }
        "task_state_update" => {
            let id = data
                .get("booking")
                .map(|b| str_field(b, "id"))
                .unwrap_or_else(|| "unknown".to_string());
            format!("{} ({})", id, str_field(data, "status"))
        }
        "door_state_update" => str_field(data, "door_name"),
        "lift_state_update" => str_field(data, "lift_name"),
        "dispenser_state_update" | "ingestor_state_update" => str_field(data, "guid"),
        "beacon_state_update" => str_field(data, "id"),
        "task_log_update" => str_field(data, "task_id"),
        "fleet_log_update" => str_field(data, "name"),
        "building_map_update" => {
            let levels: Vec<String> = data
                .get("levels")
                .and_then(Value::as_array)
                .map(|l| l.iter().map(|lvl| str_field(lvl, "name")).collect())
                .unwrap_or_default();
            format!("{} (levels: {})", str_field(data, "name"), levels.join(", "))
        }
        TRAJECTORY_TYPE => format!("map {}", trajectory_map_name(data)),
        _ => match data {
            Value::Object(map) => {
                let keys: Vec<&str> = map.keys().take(3).map(String::as_str).collect();
                format!("[{}]", keys.join(", "))
            }
            other => other.to_string(),
        },
    }
}

/// Map name a recorded trajectory response belongs to.
///
/// Taken from the first path's `map_name`, looking through a captured
/// `{timestamp, response}` wrapper if present.
pub fn trajectory_map_name(data: &Payload) -> String {
    let values = data
        .get("values")
        .and_then(Value::as_array)
        .or_else(|| {
            data.get("response")
                .and_then(|r| r.get("values"))
                .and_then(Value::as_array)
        });

    values
        .and_then(|v| v.first())
        .and_then(|first| first.get("map_name"))
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string()
}
