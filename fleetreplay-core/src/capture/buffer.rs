//! Concurrency-safe capture buffer
//!
//! Every ingestion edge holds a handle to one [`CaptureBuffer`]. A capture
//! call appends to the per-type history, overwrites the keyed latest state
//! and bumps the message counter under a single lock, so a concurrent save
//! never observes half of a call.
//!
//! A session is finalized exactly once: the first of the duration timer,
//! [`CaptureBuffer::shutdown`] or an explicit [`CaptureBuffer::save`] claims
//! the save under the same lock; later attempts return `None`.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::assets::{self, AssetManifest};
use super::sample::sample_format;
use super::session::{CaptureFile, CaptureMetadata, History, HistoryEntry, LatestStates};
use crate::config::CaptureConfig;
use crate::error::{FleetReplayError, Result};
use crate::event::Payload;

/// Capture type whose payloads may reference cached image assets
const BUILDING_MAP_TYPE: &str = "building_map";

/// Read-only counters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptureStats {
    pub enabled: bool,
    pub stopped: bool,
    pub saved: bool,
    pub start_time: DateTime<Utc>,
    pub message_count: u64,
    /// Type -> number of history entries
    pub data_types: BTreeMap<String, usize>,
    /// Type -> number of distinct keys
    pub unique_counts: BTreeMap<String, usize>,
}

#[derive(Debug)]
struct CaptureState {
    start_time: DateTime<Utc>,
    message_count: u64,
    history: History,
    latest: LatestStates,
    assets: AssetManifest,
    saved: bool,
}

impl CaptureState {
    fn new() -> Self {
        Self {
            start_time: Utc::now(),
            message_count: 0,
            history: BTreeMap::new(),
            latest: BTreeMap::new(),
            assets: AssetManifest::new(),
            saved: false,
        }
    }
}

/// Process-wide store of captured events
#[derive(Debug)]
pub struct CaptureBuffer {
    config: CaptureConfig,
    enabled: bool,
    stopped: AtomicBool,
    state: RwLock<CaptureState>,
    timer: CancellationToken,
}

impl CaptureBuffer {
    /// Create a buffer without touching the filesystem or spawning a timer
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            enabled: config.enabled,
            config,
            stopped: AtomicBool::new(false),
            state: RwLock::new(CaptureState::new()),
            timer: CancellationToken::new(),
        }
    }

    /// A buffer on which every call is a no-op
    pub fn disabled() -> Self {
        Self::new(CaptureConfig {
            enabled: false,
            ..Default::default()
        })
    }

    /// Create the buffer for a serving process.
    ///
    /// When enabled, creates the output directory and arms the duration
    /// timer. Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Fails if the output directory cannot be created.
    pub async fn start(config: CaptureConfig) -> Result<Arc<Self>> {
        let buffer = Arc::new(Self::new(config));
        if !buffer.enabled {
            return Ok(buffer);
        }

        tokio::fs::create_dir_all(&buffer.config.output_dir)
            .await
            .map_err(|e| {
                FleetReplayError::Capture(format!(
                    "Cannot create capture output directory {}: {}",
                    buffer.config.output_dir.display(),
                    e
                ))
            })?;

        tracing::info!(
            output_dir = %buffer.config.output_dir.display(),
            duration = ?buffer.config.duration,
            "Data capture enabled"
        );

        if buffer.spawn_duration_timer().is_some() {
            tracing::info!("Capture will auto-save after {:?}", buffer.config.duration);
        }

        Ok(buffer)
    }

    /// Check if capture is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Check if capture has been stopped
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Stop accepting further events. Already captured data is kept.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    /// Capture one event.
    ///
    /// Appends a history entry and, when `key` is given, overwrites the
    /// latest state for `(data_type, key)`. Returns immediately when capture
    /// is disabled or stopped, or once the session has been saved.
    pub async fn capture(
        &self,
        data_type: &str,
        payload: Payload,
        key: Option<&str>,
        source: &str,
    ) {
        if !self.enabled || self.is_stopped() {
            return;
        }

        let (payload, found_assets) = if data_type == BUILDING_MAP_TYPE {
            assets::scan_building_map(payload, &self.config.asset_cache_dir).await
        } else {
            (payload, AssetManifest::new())
        };

        let mut state = self.state.write().await;
        // A claimed session is final
        if self.is_stopped() || state.saved {
            return;
        }

        state.assets.extend(found_assets);

        let entry = HistoryEntry {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            source: source.to_string(),
            data: payload,
        };

        if let Some(key) = key {
            state
                .latest
                .entry(data_type.to_string())
                .or_default()
                .insert(key.to_string(), entry.data.clone());
        }
        state
            .history
            .entry(data_type.to_string())
            .or_default()
            .push(entry);
        state.message_count += 1;

        tracing::debug!(
            count = state.message_count,
            data_type,
            key = key.unwrap_or("-"),
            source,
            "Captured event"
        );
    }

    /// Resolve asset references in a collection payload and record them.
    ///
    /// Returns the payload tagged with local references. Missing files are
    /// logged, never fatal.
    pub async fn capture_assets(&self, payload: Payload) -> Payload {
        if !self.enabled {
            return payload;
        }
        let (payload, found) =
            assets::scan_building_map(payload, &self.config.asset_cache_dir).await;
        if !found.is_empty() {
            let mut state = self.state.write().await;
            if !state.saved {
                state.assets.extend(found);
            }
        }
        payload
    }

    /// Serialize the session, at most once.
    ///
    /// Returns the written path the first time and `None` afterwards. An
    /// empty session is finalized without writing a file. A failed write
    /// releases the claim so a later trigger can retry.
    ///
    /// # Errors
    ///
    /// Fails if the session file cannot be serialized or written. Asset copy
    /// failures are logged per file and do not fail the save.
    pub async fn save(&self, output_file: Option<&Path>) -> Result<Option<PathBuf>> {
        if !self.enabled {
            return Ok(None);
        }

        let (snapshot, manifest, start_time) = {
            let mut state = self.state.write().await;
            if state.saved {
                return Ok(None);
            }
            state.saved = true;

            if state.message_count == 0 {
                tracing::info!("No data captured");
                for line in summary_lines(&state, None) {
                    tracing::info!("{}", line);
                }
                return Ok(None);
            }

            (
                self.build_file(&state),
                state.assets.clone(),
                state.start_time,
            )
        };

        let path = output_file.map(Path::to_path_buf).unwrap_or_else(|| {
            self.config.output_dir.join(format!(
                "captured_data_{}.json",
                start_time.format("%Y%m%d_%H%M%S")
            ))
        });

        match self.write_session(snapshot, &manifest, &path).await {
            Ok(()) => {
                let state = self.state.read().await;
                for line in summary_lines(&state, Some(&path)) {
                    tracing::info!("{}", line);
                }
                Ok(Some(path))
            }
            Err(e) => {
                self.state.write().await.saved = false;
                Err(e)
            }
        }
    }

    async fn write_session(
        &self,
        mut file: CaptureFile,
        manifest: &AssetManifest,
        path: &Path,
    ) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                FleetReplayError::Persistence(format!(
                    "Cannot create {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        if !manifest.is_empty() {
            let dir = assets::assets_dir_for(path);
            assets::copy_assets(manifest, &dir).await;
            file.metadata.images_dir = dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned());
        }

        let json = file
            .to_json_pretty()
            .map_err(|e| FleetReplayError::Persistence(format!("Cannot serialize session: {}", e)))?;
        tokio::fs::write(path, json).await.map_err(|e| {
            FleetReplayError::Persistence(format!("Cannot write {}: {}", path.display(), e))
        })?;
        Ok(())
    }

    fn build_file(&self, state: &CaptureState) -> CaptureFile {
        CaptureFile {
            metadata: CaptureMetadata {
                description: self.config.description.clone(),
                capture_start: Some(state.start_time.to_rfc3339()),
                capture_end: Some(Utc::now().to_rfc3339()),
                total_messages: state.message_count,
                data_types: state.history.keys().cloned().collect(),
                images_dir: None,
                captured_images: state.assets.keys().cloned().collect(),
            },
            history: state.history.clone(),
            latest_states: state.latest.clone(),
            sample_format: sample_format(&state.latest),
        }
    }

    /// Current counters
    pub async fn stats(&self) -> CaptureStats {
        let state = self.state.read().await;
        CaptureStats {
            enabled: self.enabled,
            stopped: self.is_stopped(),
            saved: state.saved,
            start_time: state.start_time,
            message_count: state.message_count,
            data_types: state
                .history
                .iter()
                .map(|(k, v)| (k.clone(), v.len()))
                .collect(),
            unique_counts: state
                .latest
                .iter()
                .map(|(k, v)| (k.clone(), v.len()))
                .collect(),
        }
    }

    /// Latest payload for `(data_type, key)`
    pub async fn latest(&self, data_type: &str, key: &str) -> Option<Payload> {
        let state = self.state.read().await;
        state.latest.get(data_type)?.get(key).cloned()
    }

    /// Copy of the history recorded for one type
    pub async fn history(&self, data_type: &str) -> Vec<HistoryEntry> {
        let state = self.state.read().await;
        state.history.get(data_type).cloned().unwrap_or_default()
    }

    /// Drop all captured data and restart the clock.
    ///
    /// Finalization flags are untouched: a saved session stays saved.
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.history.clear();
        state.latest.clear();
        state.assets.clear();
        state.message_count = 0;
        state.start_time = Utc::now();
        tracing::info!("Capture data cleared");
    }

    /// Arm the duration timer.
    ///
    /// When it fires, capture stops and the session is saved. Returns `None`
    /// when capture is disabled or the duration is zero.
    pub fn spawn_duration_timer(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if !self.enabled || self.config.duration.is_zero() {
            return None;
        }

        let buffer = Arc::clone(self);
        let token = self.timer.clone();
        let duration = self.config.duration;

        Some(tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::debug!("Capture duration timer cancelled");
                }
                _ = tokio::time::sleep(duration) => {
                    tracing::info!("Capture duration {:?} reached, saving", duration);
                    buffer.stop();
                    if let Err(e) = buffer.save(None).await {
                        tracing::error!("Auto-save failed: {}", e);
                    }
                    tracing::info!("Capture stopped; serving continues");
                }
            }
        }))
    }

    /// Exit hook: cancel any pending timer and save if not already saved
    pub async fn shutdown(&self) -> Result<Option<PathBuf>> {
        self.timer.cancel();
        self.save(None).await
    }
}

/// Human-readable capture summary, one line per entry
fn summary_lines(state: &CaptureState, output: Option<&Path>) -> Vec<String> {
    let end = Utc::now();
    let secs = (end - state.start_time).num_milliseconds() as f64 / 1000.0;
    let mut lines = vec![
        "Capture summary".to_string(),
        format!("  Start: {}", state.start_time.format("%Y-%m-%d %H:%M:%S")),
        format!("  End: {}", end.format("%Y-%m-%d %H:%M:%S")),
        format!("  Duration: {:.1}s ({:.1} min)", secs, secs / 60.0),
    ];

    if state.message_count == 0 {
        lines.push("  No data captured".to_string());
        return lines;
    }

    lines.push(format!("  Messages: {}", state.message_count));
    for (data_type, entries) in &state.history {
        let unique = state.latest.get(data_type).map_or(0, BTreeMap::len);
        lines.push(format!(
            "    {}: {} (unique: {})",
            data_type,
            entries.len(),
            unique
        ));
    }

    let names = |t: &str, limit: usize| -> Option<(usize, String)> {
        let entries = state.latest.get(t)?;
        let shown: Vec<&str> = entries.keys().take(limit).map(String::as_str).collect();
        Some((entries.len(), shown.join(", ")))
    };

    if let Some(fleets) = state.latest.get("fleet_state") {
        for (fleet, data) in fleets {
            let robots: Vec<&str> = match data.get("robots") {
                Some(Value::Object(map)) => map.keys().map(String::as_str).collect(),
                _ => Vec::new(),
            };
            let mut shown = robots.iter().take(5).copied().collect::<Vec<_>>().join(", ");
            if robots.len() > 5 {
                shown.push_str(&format!(" and {} more", robots.len() - 5));
            }
            lines.push(format!("  Fleet '{}': {} robots ({})", fleet, robots.len(), shown));
        }
    }
    if let Some((n, shown)) = names("task_state", 3) {
        lines.push(format!("  Tasks: {} ({}...)", n, shown));
    }
    for (t, label) in [
        ("door_state", "Doors"),
        ("lift_state", "Lifts"),
        ("dispenser_state", "Dispensers"),
        ("ingestor_state", "Ingestors"),
        ("beacon_state", "Beacons"),
    ] {
        if let Some((n, shown)) = names(t, 5) {
            lines.push(format!("  {}: {} ({})", label, n, shown));
        }
    }
    if let Some((_, shown)) = names("building_map", usize::MAX) {
        lines.push(format!("  Building maps: {}", shown));
    }
    if let Some((n, _)) = names("alert_request", 0) {
        lines.push(format!("  Alerts: {}", n));
    }
    if let Some(trajectories) = state.latest.get("trajectory") {
        for (map, data) in trajectories {
            if let Some(values) = data.get("values").and_then(Value::as_array) {
                lines.push(format!("  Trajectory '{}': {} paths", map, values.len()));
            }
        }
    }

    if let Some(path) = output {
        lines.push(format!("  Saved to: {}", path.display()));
    }
    lines
}
