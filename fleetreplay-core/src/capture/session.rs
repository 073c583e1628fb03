//! Capture-session file format
//!
//! One JSON document per recording run:
//!
//! ```json
//! {
//!   "_metadata":     { "capture_start": ..., "total_messages": ..., ... },
//!   "history":       { "<type>": [ {"timestamp", "source", "data"}, ... ] },
//!   "latest_states": { "<type>": { "<key>": <payload> } },
//!   "sample_format": { "fleets": [...], "doors": [...], ... }
//! }
//! ```

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{FleetReplayError, Result};
use crate::event::Payload;

/// Per-type chronological history
pub type History = BTreeMap<String, Vec<HistoryEntry>>;

/// Per-type map from entity key to its most recent payload
pub type LatestStates = BTreeMap<String, BTreeMap<String, Payload>>;

/// One captured event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// ISO-8601 capture time
    pub timestamp: String,

    /// Free-form provenance tag
    #[serde(default)]
    pub source: String,

    /// Captured payload
    pub data: Payload,
}

impl HistoryEntry {
    /// Parsed capture time, if the timestamp is well-formed
    pub fn parsed_timestamp(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.timestamp)
    }
}

/// Session metadata block
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureMetadata {
    /// Description of the session
    pub description: String,

    /// When capturing started
    pub capture_start: Option<String>,

    /// When the session was finalized
    pub capture_end: Option<String>,

    /// Number of captured events
    pub total_messages: u64,

    /// Observed event types
    pub data_types: Vec<String>,

    /// Name of the sibling asset directory, if any assets were saved
    pub images_dir: Option<String>,

    /// Asset filenames (no paths)
    pub captured_images: Vec<String>,
}

/// A complete capture-session file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaptureFile {
    /// Metadata block
    #[serde(rename = "_metadata", default)]
    pub metadata: CaptureMetadata,

    /// Full history, type -> ordered entries
    #[serde(default)]
    pub history: History,

    /// Collapsed latest state, type -> key -> payload
    #[serde(default)]
    pub latest_states: LatestStates,

    /// Derived type-grouped view
    #[serde(default)]
    pub sample_format: Value,
}

impl CaptureFile {
    /// Load a session file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            FleetReplayError::Replay(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&text)
    }

    /// Parse a session document
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Serialize as pretty-printed JSON
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Total number of history entries across all types
    pub fn history_len(&self) -> usize {
        self.history.values().map(Vec::len).sum()
    }

    /// Recorded trajectories, preferring the derived view over latest states
    pub fn trajectories(&self) -> Option<&serde_json::Map<String, Value>> {
        self.sample_format
            .get("trajectories")
            .and_then(Value::as_object)
            .filter(|t| !t.is_empty())
    }
}

/// Parse a capture timestamp.
///
/// Accepts RFC 3339 and offset-less ISO-8601 (read as UTC). Only the
/// differences between timestamps matter for replay.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp_formats() {
        let rfc = parse_timestamp("2025-12-04T02:27:54.123456+00:00").unwrap();
        let naive = parse_timestamp("2025-12-04T02:27:54.123456").unwrap();
        assert_eq!(rfc, naive);

        let plain = parse_timestamp("2025-12-04T02:27:54").unwrap();
        assert_eq!((naive - plain).num_microseconds(), Some(123_456));

        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_lenient_load() {
        let text = r#"{
            "_metadata": {"capture_start": "2025-12-04T02:27:54", "total_messages": 1},
            "history": {"door_state": [{"timestamp": "2025-12-04T02:27:55", "data": {"door_name": "d1"}}]},
            "latest_states": {"door_state": {"d1": {"door_name": "d1"}}}
        }"#;
        let file = CaptureFile::from_json(text).unwrap();
        assert_eq!(file.metadata.total_messages, 1);
        assert_eq!(file.history["door_state"][0].source, "");
        assert_eq!(file.history_len(), 1);
        assert!(file.sample_format.is_null());
        assert!(file.trajectories().is_none());
    }

    #[tokio::test]
    async fn test_load_reads_file_and_reports_missing() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, r#"{"_metadata": {"total_messages": 3}}"#).unwrap();

        let file = CaptureFile::load(&path).await.unwrap();
        assert_eq!(file.metadata.total_messages, 3);
        assert!(file.history.is_empty());

        let err = CaptureFile::load(dir.path().join("missing.json")).await.unwrap_err();
        assert!(matches!(err, FleetReplayError::Replay(_)));
    }
}
