//! Captured/injected trajectory responses, keyed by map name

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;

use crate::error::{FleetReplayError, Result};

/// What a lookup for a map that is not stored returns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Answer with some other stored map (the first by name).
    /// Suits single-map deployments.
    #[default]
    AnyEntry,

    /// Report a miss; the gateway then answers with an empty response
    Strict,
}

/// One stored response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredTrajectory {
    /// Epoch seconds at which the response was stored or captured
    pub timestamp: f64,

    /// Full trajectory response
    pub response: Value,
}

/// Map name -> last known trajectory response
#[derive(Debug, Default)]
pub struct TrajectoryStore {
    entries: RwLock<BTreeMap<String, StoredTrajectory>>,
    policy: FallbackPolicy,
}

impl TrajectoryStore {
    /// Create an empty store
    pub fn new(policy: FallbackPolicy) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            policy,
        }
    }

    /// Fallback policy in effect
    pub fn policy(&self) -> FallbackPolicy {
        self.policy
    }

    /// Store a response for `map_name`.
    ///
    /// Accepts a full `{"response": "trajectory", ...}` response, a captured
    /// `{"timestamp", "response": {...}}` record, a bare `{"values", ...}`
    /// body, or anything else verbatim.
    pub async fn store_response(&self, map_name: &str, payload: Value) {
        let entry = to_stored(payload);
        self.entries
            .write()
            .await
            .insert(map_name.to_string(), entry);
    }

    /// Response stored for exactly `map_name`
    pub async fn get_exact(&self, map_name: &str) -> Option<Value> {
        let entries = self.entries.read().await;
        entries.get(map_name).map(|e| e.response.clone())
    }

    /// Response for `map_name`, falling back per policy on a miss
    pub async fn lookup(&self, map_name: &str) -> Option<Value> {
        let entries = self.entries.read().await;
        if let Some(entry) = entries.get(map_name) {
            return Some(entry.response.clone());
        }
        match self.policy {
            FallbackPolicy::AnyEntry => entries.values().next().map(|e| e.response.clone()),
            FallbackPolicy::Strict => None,
        }
    }

    /// Number of stored maps
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the store is empty
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Stored map names
    pub async fn map_names(&self) -> Vec<String> {
        self.entries.read().await.keys().cloned().collect()
    }

    /// Copy of all entries
    pub async fn snapshot(&self) -> BTreeMap<String, StoredTrajectory> {
        self.entries.read().await.clone()
    }

    /// Prime the store from a file.
    ///
    /// Returns whether any trajectories were found.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or is not JSON.
    pub async fn load_file(&self, path: impl AsRef<Path>) -> Result<bool> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            FleetReplayError::Replay(format!("Cannot read {}: {}", path.display(), e))
        })?;
        let data: Value = serde_json::from_str(&text)?;

        let loaded = self.load_value(&data).await;
        if loaded == 0 {
            tracing::warn!(path = %path.display(), "No trajectory data found");
        }
        Ok(loaded > 0)
    }

    /// Prime the store from a parsed document; returns the number of maps.
    ///
    /// Looks, in order, at `sample_format.trajectories`,
    /// `latest_states.trajectory`, a top-level `trajectories` object, and
    /// finally the document itself when its values carry `values`.
    pub async fn load_value(&self, data: &Value) -> usize {
        fn non_empty(v: Option<&Value>) -> Option<&serde_json::Map<String, Value>> {
            v.and_then(Value::as_object).filter(|m| !m.is_empty())
        }

        let (source, maps) = if let Some(m) =
            non_empty(data.get("sample_format").and_then(|s| s.get("trajectories")))
        {
            ("sample_format", m)
        } else if let Some(m) =
            non_empty(data.get("latest_states").and_then(|s| s.get("trajectory")))
        {
            ("latest_states", m)
        } else if let Some(m) = data.get("trajectories").and_then(Value::as_object) {
            ("trajectories", m)
        } else if let Some(m) = data.as_object().filter(|m| {
            m.values()
                .any(|v| v.is_object() && (v.get("values").is_some() || v.get("response").is_some()))
        }) {
            ("direct", m)
        } else {
            return 0;
        };

        let mut entries = self.entries.write().await;
        entries.clear();
        for (map_name, record) in maps {
            entries.insert(map_name.clone(), to_stored(record.clone()));
        }
        tracing::info!(source, maps = entries.len(), "Trajectory data loaded");
        entries.len()
    }
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

fn to_stored(payload: Value) -> StoredTrajectory {
    match payload.get("response") {
        Some(Value::String(tag)) if tag == "trajectory" => StoredTrajectory {
            timestamp: now_secs(),
            response: payload,
        },
        Some(Value::Object(_)) => StoredTrajectory {
            timestamp: payload
                .get("timestamp")
                .and_then(Value::as_f64)
                .unwrap_or_else(now_secs),
            response: payload["response"].clone(),
        },
        _ if payload.get("values").is_some() => StoredTrajectory {
            timestamp: now_secs(),
            response: json!({
                "response": "trajectory",
                "values": payload.get("values").cloned().unwrap_or_else(|| json!([])),
                "conflicts": payload.get("conflicts").cloned().unwrap_or_else(|| json!([])),
            }),
        },
        _ => StoredTrajectory {
            timestamp: now_secs(),
            response: payload,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_shapes() {
        let store = TrajectoryStore::new(FallbackPolicy::AnyEntry);

        store
            .store_response("full", json!({"response": "trajectory", "values": [1], "conflicts": []}))
            .await;
        store
            .store_response(
                "captured",
                json!({"timestamp": 12.5, "response": {"response": "trajectory", "values": [1, 2]}}),
            )
            .await;
        store.store_response("bare", json!({"values": [1, 2, 3]})).await;
        store.store_response("other", json!({"weird": true})).await;

        assert_eq!(store.get_exact("full").await.unwrap()["values"], json!([1]));
        assert_eq!(store.get_exact("captured").await.unwrap()["values"], json!([1, 2]));
        assert_eq!(store.snapshot().await["captured"].timestamp, 12.5);

        let bare = store.get_exact("bare").await.unwrap();
        assert_eq!(bare["response"], "trajectory");
        assert_eq!(bare["conflicts"], json!([]));

        assert_eq!(store.get_exact("other").await.unwrap(), json!({"weird": true}));
    }

    #[tokio::test]
    async fn test_any_entry_fallback() {
        let store = TrajectoryStore::new(FallbackPolicy::AnyEntry);
        assert!(store.lookup("L1").await.is_none());

        store.store_response("L2", json!({"values": ["p"]})).await;
        let got = store.lookup("L1").await.unwrap();
        assert_eq!(got["values"], json!(["p"]));
    }

    #[tokio::test]
    async fn test_strict_fallback() {
        let store = TrajectoryStore::new(FallbackPolicy::Strict);
        store.store_response("L2", json!({"values": ["p"]})).await;
        assert!(store.lookup("L1").await.is_none());
        assert!(store.lookup("L2").await.is_some());
    }

    #[tokio::test]
    async fn test_load_value_sources() {
        let store = TrajectoryStore::default();

        let capture = json!({
            "sample_format": {"trajectories": {"L1": {"response": "trajectory", "values": [1]}}},
            "latest_states": {"trajectory": {"L9": {"values": []}}}
        });
        assert_eq!(store.load_value(&capture).await, 1);
        assert_eq!(store.map_names().await, vec!["L1".to_string()]);
        assert_eq!(store.get_exact("L1").await.unwrap()["values"], json!([1]));

        let latest_only = json!({
            "sample_format": {"trajectories": {}},
            "latest_states": {"trajectory": {"L3": {"values": [7]}}}
        });
        assert_eq!(store.load_value(&latest_only).await, 1);
        assert_eq!(store.map_names().await, vec!["L3".to_string()]);

        let direct = json!({"L4": {"values": [], "conflicts": []}, "L5": {"values": []}});
        assert_eq!(store.load_value(&direct).await, 2);

        assert_eq!(store.load_value(&json!({"nothing": 1})).await, 0);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_load_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("traj.json");
        std::fs::write(&path, r#"{"trajectories": {"L1": {"values": [1]}}}"#).unwrap();

        let store = TrajectoryStore::default();
        assert!(store.load_file(&path).await.unwrap());
        assert!(!store.is_empty().await);

        assert!(store.load_file(dir.path().join("missing.json")).await.is_err());
    }
}
