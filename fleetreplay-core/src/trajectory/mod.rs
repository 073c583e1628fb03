//! Trajectory channel: protocol, store and proxy gateway
//!
//! The gateway relays `trajectory` and `time` requests to a live upstream,
//! captures what comes back, and answers from [`TrajectoryStore`] whenever the
//! upstream is missing, slow or broken. `trajectory_load` requests write
//! straight into the store; replay uses them to prime it.

mod gateway;
pub mod protocol;
mod store;

pub use gateway::{PROXY_SOURCE, TrajectoryGateway};
pub use protocol::TrajectoryRequest;
pub use store::{FallbackPolicy, StoredTrajectory, TrajectoryStore};
