//! Capture buffer for live gateway traffic
//!
//! Records a heterogeneous stream of typed events twice over:
//! - **history**: every event per type, in arrival order
//! - **latest states**: per type, the most recent payload per entity key
//!
//! and persists both, plus a derived type-grouped view and any referenced
//! map images, as one self-contained session file.
//!
//! # Example
//!
//! ```rust,no_run
//! use fleetreplay_core::capture::CaptureBuffer;
//! use fleetreplay_core::config::CaptureConfig;
//! use serde_json::json;
//!
//! # async fn run() -> fleetreplay_core::error::Result<()> {
//! let buffer = CaptureBuffer::start(CaptureConfig {
//!     enabled: true,
//!     ..Default::default()
//! })
//! .await?;
//!
//! buffer
//!     .capture("door_state", json!({"door_name": "d1"}), Some("d1"), "gateway")
//!     .await;
//!
//! let path = buffer.shutdown().await?;
//! # Ok(())
//! # }
//! ```

mod assets;
mod buffer;
mod sample;
mod session;

pub use assets::{AssetManifest, CAPTURED_FILE_TAG, assets_dir_for};
pub use buffer::{CaptureBuffer, CaptureStats};
pub use sample::sample_format;
pub use session::{
    CaptureFile, CaptureMetadata, History, HistoryEntry, LatestStates, parse_timestamp,
};

#[cfg(test)]
mod tests;
