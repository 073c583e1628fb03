//! Replay of recorded capture sessions
//!
//! Two modes over one [`CaptureFile`](crate::capture::CaptureFile):
//! - **snapshot**: the latest state of every entity, once, in dependency
//!   order (maps, then fleets and tasks, then devices, then trajectories)
//! - **timeline**: every history entry in timestamp order, with the original
//!   gaps scaled by a speed multiplier and capped at a maximum wait
//!
//! Generic events go to the gateway's `/_internal` channel; trajectory data
//! goes to `/trajectory` as `trajectory_load` requests.
//!
//! # Example
//!
//! ```rust,no_run
//! use fleetreplay_core::capture::CaptureFile;
//! use fleetreplay_core::config::ReplayConfig;
//! use fleetreplay_core::replay::{ReplayEngine, ReplayTimeline};
//!
//! # async fn run() -> fleetreplay_core::error::Result<()> {
//! let file = CaptureFile::load("captured_data/session.json").await?;
//! let engine = ReplayEngine::connect(ReplayConfig {
//!     speed: 2.0,
//!     ..Default::default()
//! })
//! .await?;
//!
//! let progress = engine.replay(ReplayTimeline::build(&file.history)).await?;
//! println!("sent {} of {}", progress.sent, progress.total);
//! # Ok(())
//! # }
//! ```

mod engine;
mod inspect;
mod timeline;

pub use engine::{ReplayEngine, ReplayProgress, scaled_wait};
pub use inspect::{CaptureInfo, RestoreReport, restore_assets};
pub use timeline::{Channel, Dispatch, ReplayTimeline, TimelineEntry};
