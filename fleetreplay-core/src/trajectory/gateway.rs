//! Per-connection relay for the trajectory channel

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use super::protocol::{self, TrajectoryRequest};
use super::store::TrajectoryStore;
use crate::capture::CaptureBuffer;
use crate::config::TrajectoryConfig;
use crate::error::{FleetReplayError, Result};
use crate::event::TRAJECTORY_TYPE;
use crate::transport::{Connector, Transport, WebSocketConnector, send_json};

/// Source tag for captured upstream responses
pub const PROXY_SOURCE: &str = "trajectory_proxy";

/// Relays trajectory requests to a live upstream and answers from the store
/// when the upstream is absent or slow.
///
/// Shared between connections; each served connection opens its own
/// upstream.
pub struct TrajectoryGateway {
    store: Arc<TrajectoryStore>,
    capture: Arc<CaptureBuffer>,
    upstream: Option<Arc<dyn Connector>>,
    data_timeout: Duration,
    time_timeout: Duration,
}

impl TrajectoryGateway {
    /// Create a gateway with an explicit upstream connector (or none)
    pub fn new(
        store: Arc<TrajectoryStore>,
        capture: Arc<CaptureBuffer>,
        upstream: Option<Arc<dyn Connector>>,
        config: &TrajectoryConfig,
    ) -> Self {
        Self {
            store,
            capture,
            upstream,
            data_timeout: config.data_timeout,
            time_timeout: config.time_timeout,
        }
    }

    /// Create a gateway from configuration.
    ///
    /// In replay mode no upstream is ever contacted.
    pub fn from_config(
        store: Arc<TrajectoryStore>,
        capture: Arc<CaptureBuffer>,
        config: &TrajectoryConfig,
    ) -> Self {
        let upstream: Option<Arc<dyn Connector>> = if config.replay_mode {
            None
        } else {
            Some(Arc::new(WebSocketConnector::new(config.upstream_url.clone())))
        };
        Self::new(store, capture, upstream, config)
    }

    /// Backing store
    pub fn store(&self) -> &Arc<TrajectoryStore> {
        &self.store
    }

    /// Serve one client connection until it closes.
    ///
    /// Every request receives exactly one response. The upstream connection,
    /// if any, is closed on the way out.
    ///
    /// # Errors
    ///
    /// Returns the client transport error that ended the connection.
    pub async fn serve_connection<T>(&self, client: &mut T) -> Result<()>
    where
        T: Transport + ?Sized,
    {
        let conn_id = Uuid::new_v4();
        tracing::info!(%conn_id, "Trajectory client connected");

        let mut upstream = self.open_upstream(conn_id).await;

        let result = loop {
            let text = match client.receive().await {
                Ok(Some(text)) => text,
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            };

            let response = self.handle_request(&text, &mut upstream).await;
            if let Err(e) = send_json(client, &response).await {
                break Err(e);
            }
        };

        if let Some(mut conn) = upstream.take() {
            if let Err(e) = conn.close().await {
                tracing::debug!(%conn_id, error = %e, "Upstream close failed");
            }
        }

        match &result {
            Ok(()) => tracing::info!(%conn_id, "Trajectory client disconnected"),
            Err(e) => tracing::warn!(%conn_id, error = %e, "Trajectory connection ended with error"),
        }
        result
    }

    /// Answer one raw request.
    ///
    /// A transport failure on `upstream` drops it; later requests are served
    /// from the store.
    pub async fn handle_request(
        &self,
        text: &str,
        upstream: &mut Option<Box<dyn Transport>>,
    ) -> Value {
        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "Malformed trajectory request");
                return protocol::request_error(format!("Malformed request: {}", e));
            }
        };

        let request = TrajectoryRequest::from_value(&value);
        tracing::debug!(request = request.name(), "Trajectory request");

        match &request {
            TrajectoryRequest::Trajectory { map_name } => {
                self.answer_trajectory(text, &request, map_name, upstream)
                    .await
            }
            TrajectoryRequest::Time => {
                if let Some(response) = forward(upstream, text, &request, self.time_timeout).await {
                    return response;
                }
                protocol::time_response(protocol::now_nanos())
            }
            TrajectoryRequest::Load { map_name, data } => {
                if map_name.is_empty() {
                    return protocol::load_error(map_name, "Missing map_name");
                }
                if !protocol::has_content(data) {
                    return protocol::load_error(map_name, "Missing data");
                }
                let paths = protocol::path_count(data);
                self.store.store_response(map_name, data.clone()).await;
                tracing::info!(map_name = %map_name, paths, "Trajectory data loaded");
                protocol::load_ok(map_name)
            }
            TrajectoryRequest::Unknown(kind) => {
                let kind = kind.as_deref().unwrap_or("none");
                tracing::warn!(request = %kind, "Unknown trajectory request");
                protocol::request_error(format!("Unknown request type: {}", kind))
            }
        }
    }

    async fn answer_trajectory(
        &self,
        raw: &str,
        request: &TrajectoryRequest,
        map_name: &str,
        upstream: &mut Option<Box<dyn Transport>>,
    ) -> Value {
        if let Some(response) = forward(upstream, raw, request, self.data_timeout).await {
            tracing::debug!(
                map_name,
                paths = protocol::path_count(&response),
                "Upstream trajectory response"
            );
            self.capture
                .capture(TRAJECTORY_TYPE, response.clone(), Some(map_name), PROXY_SOURCE)
                .await;
            self.store.store_response(map_name, response.clone()).await;
            return response;
        }

        match self.store.lookup(map_name).await {
            Some(stored) => {
                tracing::debug!(map_name, "Serving stored trajectory");
                stored
            }
            None => {
                tracing::debug!(map_name, "No stored trajectory, answering empty");
                protocol::empty_trajectory_response()
            }
        }
    }

    async fn open_upstream(&self, conn_id: Uuid) -> Option<Box<dyn Transport>> {
        let connector = self.upstream.as_ref()?;
        match connector.connect().await {
            Ok(conn) => {
                tracing::info!(%conn_id, upstream = %connector.target(), "Connected to upstream");
                Some(conn)
            }
            Err(e) => {
                tracing::warn!(
                    %conn_id,
                    upstream = %connector.target(),
                    error = %e,
                    "Upstream unavailable, serving from store"
                );
                None
            }
        }
    }
}

/// Forward a raw request and wait up to `timeout` for its reply.
///
/// Replies that do not answer `request` are late answers to earlier
/// requests and are discarded. Returns `None` on any failure.
/// Connection-fatal failures also drop the upstream.
async fn forward(
    upstream: &mut Option<Box<dyn Transport>>,
    raw: &str,
    request: &TrajectoryRequest,
    timeout: Duration,
) -> Option<Value> {
    let conn = upstream.as_mut()?;

    let result: Result<Value> = async {
        conn.send(raw.to_string()).await?;
        let deadline = Instant::now() + timeout;
        loop {
            let text = match tokio::time::timeout_at(deadline, conn.receive()).await {
                Err(_) => return Err(FleetReplayError::Timeout(timeout)),
                Ok(Ok(Some(text))) => text,
                Ok(Ok(None)) => return Err(FleetReplayError::Transport("Upstream closed".into())),
                Ok(Err(e)) => return Err(e),
            };
            match serde_json::from_str::<Value>(&text) {
                Ok(reply) if protocol::answers(request, &reply) => return Ok(reply),
                Ok(reply) => tracing::debug!(
                    expected = request.name(),
                    got = reply.get("response").and_then(serde_json::Value::as_str).unwrap_or("-"),
                    "Discarding stale upstream reply"
                ),
                Err(e) => tracing::debug!(error = %e, "Discarding unparseable upstream reply"),
            }
        }
    }
    .await;

    match result {
        Ok(response) => Some(response),
        Err(e) => {
            tracing::warn!(error = %e, "Upstream request failed, falling back to store");
            if e.is_connection_fatal() {
                if let Some(mut conn) = upstream.take() {
                    let _ = conn.close().await;
                }
            }
            None
        }
    }
}
