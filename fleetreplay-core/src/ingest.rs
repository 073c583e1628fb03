//! Generic-channel ingestion edge
//!
//! Accepts `{type, data}` envelopes from one connection, captures each one
//! under its capture type and entity key, and optionally hands it on to the
//! hosting process.

use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::capture::CaptureBuffer;
use crate::error::{FleetReplayError, Result};
use crate::event::{Envelope, EventKind, Payload};
use crate::transport::Transport;

/// Source tag for events captured from the generic channel
pub const INGEST_SOURCE: &str = "internal";

/// Counters for one served connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub accepted: u64,
    pub dropped: u64,
}

/// Ingests generic-channel messages into a capture buffer
#[derive(Clone)]
pub struct Ingestor {
    capture: Arc<CaptureBuffer>,
    sink: Option<mpsc::Sender<Envelope>>,
}

impl Ingestor {
    /// Create an ingestor that only captures
    pub fn new(capture: Arc<CaptureBuffer>) -> Self {
        Self {
            capture,
            sink: None,
        }
    }

    /// Also forward accepted envelopes to `sink`
    pub fn with_sink(mut self, sink: mpsc::Sender<Envelope>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Process one raw message.
    ///
    /// # Errors
    ///
    /// Returns an ingest error for envelopes that were dropped: unparseable
    /// text, a missing or non-string `type`, a known kind without its key, or
    /// an unknown kind without `data`.
    pub async fn process(&self, text: &str) -> Result<EventKind> {
        let msg: Value = serde_json::from_str(text)
            .map_err(|e| FleetReplayError::Ingest(format!("Unparseable message: {}", e)))?;
        self.process_value(msg).await
    }

    /// Process one parsed message
    pub async fn process_value(&self, mut msg: Value) -> Result<EventKind> {
        let wire_kind = match msg.get("type") {
            Some(Value::String(kind)) => kind.clone(),
            Some(_) => return Err(FleetReplayError::Ingest("'type' must be a string".into())),
            None => return Err(FleetReplayError::Ingest("Message has no 'type'".into())),
        };
        let kind = EventKind::from_wire(&wire_kind);
        tracing::debug!(kind = %wire_kind, "Received event");

        let data: Payload = match msg.get_mut("data").map(Value::take) {
            Some(data) => data,
            None if kind.is_known() => {
                return Err(FleetReplayError::Ingest(format!("{} has no data", wire_kind)));
            }
            None => {
                tracing::warn!(kind = %wire_kind, "Unhandled event kind without data, dropped");
                return Err(FleetReplayError::Ingest(format!(
                    "Unknown kind {} without data",
                    wire_kind
                )));
            }
        };

        let key = if kind.is_known() {
            match kind.entity_key(&data) {
                Some(key) => Some(key),
                None => {
                    return Err(FleetReplayError::Ingest(format!(
                        "{} is missing its entity key",
                        wire_kind
                    )));
                }
            }
        } else {
            tracing::warn!(kind = %wire_kind, "Unhandled event kind, captured under its tag");
            None
        };

        match kind {
            EventKind::FleetState => log_robot_paths(&data),
            EventKind::BuildingMap => {
                tracing::info!(name = key.as_deref().unwrap_or(""), "Building map received");
            }
            _ => {}
        }

        let forwarded = self.sink.as_ref().map(|_| data.clone());
        self.capture
            .capture(kind.capture_type(), data, key.as_deref(), INGEST_SOURCE)
            .await;

        if let (Some(sink), Some(data)) = (&self.sink, forwarded) {
            if sink.send(Envelope::new(wire_kind, data)).await.is_err() {
                tracing::debug!("Event sink closed");
            }
        }

        Ok(kind)
    }

    /// Serve one connection until the peer closes.
    ///
    /// Dropped messages are logged and counted; they never end the loop.
    ///
    /// # Errors
    ///
    /// Returns the transport error that ended the connection.
    pub async fn serve<T>(&self, transport: &mut T) -> Result<IngestStats>
    where
        T: Transport + ?Sized,
    {
        tracing::info!("Event channel client connected");
        let mut stats = IngestStats::default();

        while let Some(text) = transport.receive().await? {
            match self.process(&text).await {
                Ok(_) => stats.accepted += 1,
                Err(e) => {
                    stats.dropped += 1;
                    tracing::warn!(error = %e, "Ignoring message");
                }
            }
        }

        tracing::info!(
            accepted = stats.accepted,
            dropped = stats.dropped,
            "Event channel client disconnected"
        );
        Ok(stats)
    }
}

fn log_robot_paths(data: &Payload) {
    let robots: Vec<(String, &Value)> = match data.get("robots") {
        Some(Value::Object(map)) => map.iter().map(|(name, r)| (name.clone(), r)).collect(),
        Some(Value::Array(list)) => list
            .iter()
            .map(|r| {
                let name = r.get("name").and_then(Value::as_str).unwrap_or("unknown");
                (name.to_string(), r)
            })
            .collect(),
        _ => return,
    };

    for (name, robot) in robots {
        match robot.get("path").and_then(Value::as_array) {
            Some(path) if !path.is_empty() => {
                tracing::info!(robot = %name, waypoints = path.len(), "Robot path");
            }
            _ => tracing::debug!(robot = %name, "Robot has no path"),
        }
    }
}
