//! # FleetReplay - Record and replay fleet gateway traffic
//!
//! FleetReplay records a fleet-management gateway's live event traffic once
//! and replays it later, in content and (optionally) in original timing,
//! without the robots or building infrastructure attached:
//! - **Capture buffer**: per-type history plus latest state per entity,
//!   saved once as a self-contained session file
//! - **Trajectory gateway**: proxies the trajectory channel to a live
//!   upstream and falls back to captured or injected data
//! - **Replay engine**: snapshot or timing-faithful replay of a session
//!   over the gateway's two channels
//! - **Schema normalizer**: converts native fleet states to the canonical
//!   schema before replay
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fleetreplay_core::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = FleetReplayConfig::load()?;
//!
//!     // One buffer per process, shared by every ingestion edge
//!     let capture = CaptureBuffer::start(config.capture.clone()).await?;
//!     let ingestor = Ingestor::new(Arc::clone(&capture));
//!     ingestor
//!         .process(r#"{"type": "door_state_update", "data": {"door_name": "d1"}}"#)
//!         .await?;
//!
//!     capture.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod capture;
pub mod config;
pub mod error;
pub mod event;
pub mod ingest;
pub mod normalize;
pub mod replay;
pub mod trajectory;
pub mod transport;

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::capture::{CaptureBuffer, CaptureFile, CaptureStats, HistoryEntry};
    pub use crate::config::{
        CaptureConfig, FleetReplayConfig, ReplayConfig, ServerConfig, TrajectoryConfig,
    };
    pub use crate::error::{FleetReplayError, Result};
    pub use crate::event::{Envelope, EventKind, Payload};
    pub use crate::ingest::{IngestStats, Ingestor};
    pub use crate::normalize::{normalize_event, normalize_fleet_state};
    pub use crate::replay::{
        CaptureInfo, ReplayEngine, ReplayProgress, ReplayTimeline, restore_assets,
    };
    pub use crate::trajectory::{FallbackPolicy, TrajectoryGateway, TrajectoryStore};
    pub use crate::transport::{
        Connector, MemoryTransport, Transport, WebSocketConnector, WebSocketTransport,
    };
}
