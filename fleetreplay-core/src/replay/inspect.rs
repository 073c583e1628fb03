//! Capture-file inspection and asset restore

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::capture::{CaptureFile, assets_dir_for};
use crate::error::Result;
use crate::event::TRAJECTORY_TYPE;
use crate::trajectory::protocol;

/// Summary of a capture file
#[derive(Debug, Clone, Default, Serialize)]
pub struct CaptureInfo {
    pub capture_start: Option<String>,
    pub capture_end: Option<String>,
    pub total_messages: u64,
    pub data_types: Vec<String>,

    /// Entities per type in the latest-state table
    pub latest_counts: BTreeMap<String, usize>,

    /// Entries per type in the history
    pub history_counts: BTreeMap<String, usize>,

    /// Paths per recorded trajectory map
    pub trajectory_paths: BTreeMap<String, usize>,

    pub captured_images: Vec<String>,
}

impl CaptureInfo {
    pub fn from_file(file: &CaptureFile) -> Self {
        let trajectory_paths = match file.trajectories() {
            Some(map) => map
                .iter()
                .map(|(name, data)| (name.clone(), recorded_paths(data)))
                .collect(),
            None => file
                .latest_states
                .get(TRAJECTORY_TYPE)
                .map(|m| {
                    m.iter()
                        .map(|(name, data)| (name.clone(), recorded_paths(data)))
                        .collect()
                })
                .unwrap_or_default(),
        };

        Self {
            capture_start: file.metadata.capture_start.clone(),
            capture_end: file.metadata.capture_end.clone(),
            total_messages: file.metadata.total_messages,
            data_types: file.metadata.data_types.clone(),
            latest_counts: file
                .latest_states
                .iter()
                .map(|(t, items)| (t.clone(), items.len()))
                .collect(),
            history_counts: file
                .history
                .iter()
                .map(|(t, entries)| (t.clone(), entries.len()))
                .collect(),
            trajectory_paths,
            captured_images: file.metadata.captured_images.clone(),
        }
    }
}

impl fmt::Display for CaptureInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(60);
        writeln!(f, "{}", rule)?;
        writeln!(f, "  Capture start:  {}", self.capture_start.as_deref().unwrap_or("N/A"))?;
        writeln!(f, "  Capture end:    {}", self.capture_end.as_deref().unwrap_or("N/A"))?;
        writeln!(f, "  Total messages: {}", self.total_messages)?;
        writeln!(f, "  Data types:     {}", self.data_types.join(", "))?;
        writeln!(f, "{}", "-".repeat(60))?;

        writeln!(f, "  [latest states]")?;
        for (data_type, count) in &self.latest_counts {
            writeln!(f, "    {}: {}", data_type, count)?;
        }
        writeln!(f, "  [history]")?;
        for (data_type, count) in &self.history_counts {
            writeln!(f, "    {}: {} messages", data_type, count)?;
        }
        if !self.trajectory_paths.is_empty() {
            writeln!(f, "  [trajectory]")?;
            for (map_name, paths) in &self.trajectory_paths {
                writeln!(f, "    {}: {} paths", map_name, paths)?;
            }
        }
        if !self.captured_images.is_empty() {
            writeln!(f, "  [images] {}", self.captured_images.join(", "))?;
        }
        write!(f, "{}", rule)
    }
}

fn recorded_paths(data: &Value) -> usize {
    match data.get("values") {
        Some(_) => protocol::path_count(data),
        None => data.get("response").map_or(0, protocol::path_count),
    }
}

/// Outcome of [`restore_assets`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub restored: Vec<String>,
    pub missing: Vec<String>,
}

/// Copy a capture's images into `<cache_dir>/building/`.
///
/// `capture_path` is where `file` was loaded from; images are looked up in
/// its sibling images directory. Missing images are reported, not fatal.
///
/// # Errors
///
/// Fails only if the destination directory cannot be created.
pub async fn restore_assets(
    file: &CaptureFile,
    capture_path: &Path,
    cache_dir: &Path,
) -> Result<RestoreReport> {
    let images = &file.metadata.captured_images;
    if images.is_empty() {
        return Ok(RestoreReport::default());
    }

    let source_dir = images_dir(file, capture_path);
    if !tokio::fs::try_exists(&source_dir).await.unwrap_or(false) {
        tracing::warn!(dir = %source_dir.display(), "Images directory not found");
        return Ok(RestoreReport {
            restored: Vec::new(),
            missing: images.clone(),
        });
    }

    let dest_dir = cache_dir.join("building");
    tokio::fs::create_dir_all(&dest_dir).await?;
    tracing::info!(from = %source_dir.display(), to = %dest_dir.display(), "Restoring images");

    let mut report = RestoreReport::default();
    for name in images {
        match tokio::fs::copy(source_dir.join(name), dest_dir.join(name)).await {
            Ok(_) => {
                tracing::debug!(image = %name, "Restored");
                report.restored.push(name.clone());
            }
            Err(e) => {
                tracing::warn!(image = %name, error = %e, "Image not restored");
                report.missing.push(name.clone());
            }
        }
    }

    tracing::info!(
        restored = report.restored.len(),
        missing = report.missing.len(),
        "Image restore finished"
    );
    Ok(report)
}

fn images_dir(file: &CaptureFile, capture_path: &Path) -> PathBuf {
    match file.metadata.images_dir.as_deref().map(Path::new) {
        Some(dir) if dir.is_absolute() => dir.to_path_buf(),
        Some(dir) => capture_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(dir.file_name().unwrap_or(dir.as_os_str())),
        None => assets_dir_for(capture_path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn sample_file() -> CaptureFile {
        CaptureFile::from_json(
            &json!({
                "_metadata": {
                    "capture_start": "2025-01-01T00:00:00",
                    "total_messages": 3,
                    "data_types": ["door_state", "trajectory"],
                    "images_dir": "run_images",
                    "captured_images": ["L1.png", "L2.png"]
                },
                "history": {
                    "door_state": [
                        {"timestamp": "2025-01-01T00:00:00", "data": {"door_name": "d1"}},
                        {"timestamp": "2025-01-01T00:00:01", "data": {"door_name": "d1"}}
                    ],
                    "trajectory": [
                        {"timestamp": "2025-01-01T00:00:02", "data": {"values": [{"map_name": "L1"}]}}
                    ]
                },
                "latest_states": {
                    "door_state": {"d1": {"door_name": "d1"}},
                    "trajectory": {"L1": {"values": [{"map_name": "L1"}]}}
                },
                "sample_format": {
                    "trajectories": {
                        "L1": {"timestamp": 1.0, "response": {"values": [{}, {}]}}
                    }
                }
            })
            .to_string(),
        )
        .unwrap()
    }

    #[test]
    fn test_capture_info_counts() {
        let info = CaptureInfo::from_file(&sample_file());

        assert_eq!(info.total_messages, 3);
        assert_eq!(info.latest_counts["door_state"], 1);
        assert_eq!(info.history_counts["door_state"], 2);
        assert_eq!(info.trajectory_paths["L1"], 2);
        assert_eq!(info.capture_end, None);

        let text = info.to_string();
        assert!(text.contains("Capture end:    N/A"));
        assert!(text.contains("L1: 2 paths"));
    }

    #[tokio::test]
    async fn test_restore_assets_reports_missing() {
        let dir = TempDir::new().unwrap();
        let capture_path = dir.path().join("run.json");
        std::fs::create_dir_all(dir.path().join("run_images")).unwrap();
        std::fs::write(dir.path().join("run_images/L1.png"), b"png").unwrap();
        let cache = dir.path().join("cache");

        let report = restore_assets(&sample_file(), &capture_path, &cache)
            .await
            .unwrap();

        assert_eq!(report.restored, vec!["L1.png".to_string()]);
        assert_eq!(report.missing, vec!["L2.png".to_string()]);
        assert!(cache.join("building/L1.png").exists());
    }

    #[tokio::test]
    async fn test_restore_assets_without_images_dir() {
        let dir = TempDir::new().unwrap();
        let report = restore_assets(&sample_file(), &dir.path().join("run.json"), dir.path())
            .await
            .unwrap();
        assert!(report.restored.is_empty());
        assert_eq!(report.missing.len(), 2);
        assert!(!dir.path().join("building").exists());
    }
}
