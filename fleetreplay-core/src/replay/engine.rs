//! Drives a capture session back into a running gateway

use serde_json::Value;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::timeline::{Dispatch, ReplayTimeline};
use crate::capture::CaptureFile;
use crate::config::ReplayConfig;
use crate::error::{FleetReplayError, Result};
use crate::event::{TRAJECTORY_TYPE, snapshot_rank};
use crate::trajectory::protocol;
use crate::transport::{Transport, WebSocketTransport, send_json};

/// Dispatch counters for one replay run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayProgress {
    pub sent: usize,
    pub failed: usize,
    pub total: usize,
}

impl ReplayProgress {
    /// Entries handled so far
    pub fn done(&self) -> usize {
        self.sent + self.failed
    }

    /// Whether every entry has been handled
    pub fn is_complete(&self) -> bool {
        self.done() == self.total
    }
}

/// Replays one capture session over the generic and trajectory channels.
///
/// An engine is single-use: [`snapshot`](Self::snapshot) and
/// [`replay`](Self::replay) consume it and close both channels when done.
pub struct ReplayEngine {
    events: Box<dyn Transport>,
    trajectory: Box<dyn Transport>,
    config: ReplayConfig,
    progress: watch::Sender<ReplayProgress>,
    cancel: CancellationToken,
}

impl ReplayEngine {
    /// Open both channels of the gateway at `config.api_url`.
    ///
    /// # Errors
    ///
    /// Fails with [`FleetReplayError::ChannelUnavailable`] if either channel
    /// cannot be opened; nothing is sent in that case.
    pub async fn connect(config: ReplayConfig) -> Result<Self> {
        let internal_url = config.internal_url();
        let trajectory_url = config.trajectory_url();

        let mut events = WebSocketTransport::connect(&internal_url)
            .await
            .map_err(|e| FleetReplayError::ChannelUnavailable {
                channel: internal_url.clone(),
                reason: e.to_string(),
            })?;
        let trajectory = match WebSocketTransport::connect(&trajectory_url).await {
            Ok(t) => t,
            Err(e) => {
                let _ = events.close().await;
                return Err(FleetReplayError::ChannelUnavailable {
                    channel: trajectory_url,
                    reason: e.to_string(),
                });
            }
        };

        tracing::info!(events = %internal_url, trajectory = %trajectory_url, "Replay channels open");
        Ok(Self::with_transports(
            Box::new(events),
            Box::new(trajectory),
            config,
        ))
    }

    /// Build an engine over already-open channels
    pub fn with_transports(
        events: Box<dyn Transport>,
        trajectory: Box<dyn Transport>,
        config: ReplayConfig,
    ) -> Self {
        let (progress, _) = watch::channel(ReplayProgress::default());
        Self {
            events,
            trajectory,
            config,
            progress,
            cancel: CancellationToken::new(),
        }
    }

    /// Use `token` as the stop signal
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that stops the run between entries
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Watch dispatch progress
    pub fn subscribe(&self) -> watch::Receiver<ReplayProgress> {
        self.progress.subscribe()
    }

    /// Push the latest state of every entity, once.
    ///
    /// Map data goes first, then fleets and tasks, then device states;
    /// trajectories are loaded last.
    pub async fn snapshot(mut self, file: &CaptureFile) -> Result<ReplayProgress> {
        let mut plan: Vec<Dispatch> = Vec::new();

        let mut types: Vec<&String> = file
            .latest_states
            .keys()
            .filter(|t| t.as_str() != TRAJECTORY_TYPE)
            .collect();
        types.sort_by_key(|t| (snapshot_rank(t), t.as_str()));

        for capture_type in types {
            for data in file.latest_states[capture_type].values() {
                plan.push(Dispatch::from_capture(capture_type, data.clone(), None));
            }
        }

        let trajectories: Vec<(&String, &Value)> = match file.trajectories() {
            Some(map) => map.iter().collect(),
            None => file
                .latest_states
                .get(TRAJECTORY_TYPE)
                .map(|m| m.iter().collect())
                .unwrap_or_default(),
        };
        for (map_name, data) in trajectories {
            plan.push(Dispatch::from_capture(
                TRAJECTORY_TYPE,
                data.clone(),
                Some(map_name),
            ));
        }

        if plan.is_empty() {
            tracing::info!("No latest states to inject");
            self.close().await;
            return Ok(ReplayProgress::default());
        }

        tracing::info!(entries = plan.len(), "Injecting latest states");
        let ack_timeout = self.config.snapshot_ack_timeout;
        let result = self.run(plan, ack_timeout, |_| None).await;
        self.close().await;
        result
    }

    /// Replay a timeline with its original relative timing.
    ///
    /// Each wait is `Δt / speed`, capped at `max_wait`.
    pub async fn replay(mut self, timeline: ReplayTimeline) -> Result<ReplayProgress> {
        if timeline.is_empty() {
            tracing::info!("Nothing to replay");
            self.close().await;
            return Ok(ReplayProgress::default());
        }

        tracing::info!(
            entries = timeline.len(),
            speed = self.config.speed,
            span = ?timeline.span(),
            "Replaying history"
        );

        let speed = self.config.speed;
        let max_wait = self.config.max_wait;
        let timestamps: Vec<_> = timeline.entries().iter().map(|e| e.timestamp).collect();
        let plan: Vec<Dispatch> = timeline.into_iter().map(|e| e.dispatch).collect();

        let ack_timeout = self.config.load_ack_timeout;
        let result = self
            .run(plan, ack_timeout, |i| {
                (i > 0).then(|| {
                    let gap = (timestamps[i] - timestamps[i - 1])
                        .to_std()
                        .unwrap_or_default();
                    scaled_wait(gap, speed, max_wait)
                })
            })
            .await;
        self.close().await;
        result
    }

    /// Send `plan` in order, waiting `wait_before(i)` ahead of entry `i`
    async fn run<F>(
        &mut self,
        plan: Vec<Dispatch>,
        ack_timeout: Duration,
        wait_before: F,
    ) -> Result<ReplayProgress>
    where
        F: Fn(usize) -> Option<Duration>,
    {
        let mut progress = ReplayProgress {
            total: plan.len(),
            ..Default::default()
        };
        self.progress.send_replace(progress);

        for (i, dispatch) in plan.iter().enumerate() {
            if let Some(wait) = wait_before(i).filter(|w| !w.is_zero()) {
                tokio::select! {
                    _ = self.cancel.cancelled() => {}
                    _ = tokio::time::sleep(wait) => {}
                }
            }
            if self.cancel.is_cancelled() {
                tracing::warn!(done = progress.done(), total = progress.total, "Replay cancelled");
                return Ok(progress);
            }

            match self.dispatch(dispatch, ack_timeout).await {
                Ok(()) => progress.sent += 1,
                Err(e) => {
                    progress.failed += 1;
                    tracing::warn!(
                        channel = dispatch.channel().name(),
                        kind = dispatch.kind(),
                        error = %e,
                        "Dispatch failed, continuing"
                    );
                }
            }
            self.progress.send_replace(progress);
            self.log_progress(i, dispatch, &progress);
        }

        tracing::info!(sent = progress.sent, failed = progress.failed, "Replay complete");
        Ok(progress)
    }

    async fn dispatch(&mut self, dispatch: &Dispatch, ack_timeout: Duration) -> Result<()> {
        let message = dispatch.to_message();
        match dispatch {
            Dispatch::Event(_) => send_json(self.events.as_mut(), &message).await,
            Dispatch::TrajectoryLoad { map_name, .. } => {
                send_json(self.trajectory.as_mut(), &message).await?;
                self.await_load_ack(map_name, ack_timeout).await
            }
        }
    }

    /// Best-effort wait for the `trajectory_load` acknowledgment of
    /// `map_name`.
    ///
    /// No answer within `timeout` is not an error; an error answer is.
    /// Late acknowledgments for earlier loads are skipped.
    async fn await_load_ack(&mut self, map_name: &str, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let text = match tokio::time::timeout_at(deadline, self.trajectory.receive()).await {
                Err(_) => {
                    tracing::debug!(map_name, ?timeout, "No trajectory_load acknowledgment");
                    return Ok(());
                }
                Ok(Ok(Some(text))) => text,
                Ok(Ok(None)) => {
                    return Err(FleetReplayError::Transport(
                        "Trajectory channel closed".into(),
                    ));
                }
                Ok(Err(e)) => return Err(e),
            };

            let ack: Value = serde_json::from_str(&text)?;
            if !protocol::acknowledges(map_name, &ack) {
                tracing::debug!(map_name, stale = %ack, "Skipping acknowledgment for another load");
                continue;
            }
            return if protocol::is_load_ok(&ack) {
                Ok(())
            } else {
                Err(FleetReplayError::Protocol(format!("Load rejected: {}", ack)))
            };
        }
    }

    fn log_progress(&self, i: usize, dispatch: &Dispatch, progress: &ReplayProgress) {
        let n = i + 1;
        if i < self.config.detailed_entries {
            tracing::info!(
                "[{}] {} - {}",
                n,
                dispatch.kind(),
                dispatch.describe()
            );
        } else if (self.config.progress_every > 0 && n % self.config.progress_every == 0)
            || n == progress.total
        {
            tracing::info!(
                "Progress: {}/{} ({}%) - sent {}",
                n,
                progress.total,
                n * 100 / progress.total.max(1),
                progress.sent
            );
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.events.close().await {
            tracing::debug!(error = %e, "Closing events channel failed");
        }
        if let Err(e) = self.trajectory.close().await {
            tracing::debug!(error = %e, "Closing trajectory channel failed");
        }
    }
}

/// `gap / speed`, capped at `max_wait`
pub fn scaled_wait(gap: Duration, speed: f64, max_wait: Duration) -> Duration {
    Duration::try_from_secs_f64(gap.as_secs_f64() / speed)
        .unwrap_or(max_wait)
        .min(max_wait)
}
