//! Hosts the gateway's two WebSocket routes
//!
//! - `/_internal`: generic `{type, data}` events, captured by the ingestor
//! - `/trajectory`: trajectory requests, proxied or served from the store
//! - `/health`: capture counters

use async_trait::async_trait;
use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use fleetreplay_core::prelude::*;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Adapts an axum WebSocket to [`Transport`]
pub struct AxumTransport {
    socket: WebSocket,
    closed: bool,
}

impl AxumTransport {
    pub fn new(socket: WebSocket) -> Self {
        Self {
            socket,
            closed: false,
        }
    }
}

#[async_trait]
impl Transport for AxumTransport {
    async fn receive(&mut self) -> Result<Option<String>> {
        if self.closed {
            return Ok(None);
        }
        while let Some(message) = self.socket.recv().await {
            match message.map_err(|e| FleetReplayError::Transport(e.to_string()))? {
                Message::Text(text) => return Ok(Some(text)),
                Message::Binary(bytes) => {
                    return String::from_utf8(bytes).map(Some).map_err(|e| {
                        FleetReplayError::Protocol(format!("Non-UTF-8 binary frame: {}", e))
                    });
                }
                Message::Close(_) => {
                    self.closed = true;
                    return Ok(None);
                }
                Message::Ping(data) => {
                    let _ = self.socket.send(Message::Pong(data)).await;
                }
                Message::Pong(_) => {}
            }
        }
        self.closed = true;
        Ok(None)
    }

    async fn send(&mut self, text: String) -> Result<()> {
        self.socket
            .send(Message::Text(text))
            .await
            .map_err(|e| FleetReplayError::Transport(e.to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            let _ = self.socket.send(Message::Close(None)).await;
        }
        Ok(())
    }
}

#[derive(Clone)]
struct GatewayState {
    capture: Arc<CaptureBuffer>,
    ingestor: Ingestor,
    trajectory: Arc<TrajectoryGateway>,
}

/// Run the gateway until `shutdown` fires, then save the capture session.
pub async fn serve(config: FleetReplayConfig, shutdown: CancellationToken) -> anyhow::Result<()> {
    let capture = CaptureBuffer::start(config.capture.clone()).await?;

    let store = Arc::new(TrajectoryStore::new(config.trajectory.fallback));
    if let Some(path) = &config.trajectory.data_file {
        match store.load_file(path).await {
            Ok(true) => tracing::info!(maps = ?store.map_names().await, "Trajectory store primed"),
            Ok(false) => {}
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Trajectory data not loaded"),
        }
    }

    let trajectory = Arc::new(TrajectoryGateway::from_config(
        store,
        Arc::clone(&capture),
        &config.trajectory,
    ));
    let state = GatewayState {
        ingestor: Ingestor::new(Arc::clone(&capture)),
        capture: Arc::clone(&capture),
        trajectory,
    };

    let app = Router::new()
        .route("/_internal", get(internal_ws))
        .route("/trajectory", get(trajectory_ws))
        .route("/health", get(health))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(
        bind = %config.server.bind,
        capture = capture.is_enabled(),
        replay_mode = config.trajectory.replay_mode,
        "Gateway listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            tracing::info!("Gateway received shutdown signal");
        })
        .await?;

    match capture.shutdown().await {
        Ok(Some(path)) => tracing::info!(path = %path.display(), "Capture saved"),
        Ok(None) => {}
        Err(e) => tracing::error!(error = %e, "Capture save failed"),
    }
    Ok(())
}

async fn internal_ws(State(state): State<GatewayState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| async move {
        let mut transport = AxumTransport::new(socket);
        if let Err(e) = state.ingestor.serve(&mut transport).await {
            tracing::warn!(error = %e, "Event channel closed with error");
        }
    })
}

async fn trajectory_ws(State(state): State<GatewayState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| async move {
        let mut transport = AxumTransport::new(socket);
        // Errors are logged by the gateway
        let _ = state.trajectory.serve_connection(&mut transport).await;
        let _ = transport.close().await;
    })
}

async fn health(State(state): State<GatewayState>) -> impl IntoResponse {
    let stats = state.capture.stats().await;
    Json(serde_json::json!({
        "status": "ok",
        "capture": {
            "enabled": stats.enabled,
            "stopped": stats.stopped,
            "saved": stats.saved,
            "messages": stats.message_count,
            "data_types": stats.data_types,
        },
        "trajectory_maps": state.trajectory.store().map_names().await,
    }))
}
