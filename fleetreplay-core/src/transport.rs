//! Text-message channels
//!
//! Both gateway channels carry one JSON document per message. The core only
//! needs to send and receive those documents, so every peer (a WebSocket, an
//! in-process pipe in tests, a web framework's socket) is adapted to
//! [`Transport`].

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::{FleetReplayError, Result};

/// Transport trait for message-oriented JSON channels
#[async_trait]
pub trait Transport: Send {
    /// Receive the next text message. `None` means the peer closed.
    async fn receive(&mut self) -> Result<Option<String>>;

    /// Send a text message
    async fn send(&mut self, text: String) -> Result<()>;

    /// Close the channel. Closing twice is not an error.
    async fn close(&mut self) -> Result<()>;
}

/// Serialize and send a value
pub async fn send_json<T, V>(transport: &mut T, value: &V) -> Result<()>
where
    T: Transport + ?Sized,
    V: Serialize + Sync,
{
    let text = serde_json::to_string(value)?;
    transport.send(text).await
}

/// Receive and deserialize a value
pub async fn receive_json<T, V>(transport: &mut T) -> Result<Option<V>>
where
    T: Transport + ?Sized,
    V: DeserializeOwned,
{
    match transport.receive().await? {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

/// Opens new transports to a fixed destination
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection
    async fn connect(&self) -> Result<Box<dyn Transport>>;

    /// Destination, for logs
    fn target(&self) -> String;
}

/// WebSocket client transport
pub struct WebSocketTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    closed: bool,
}

impl WebSocketTransport {
    /// Connect to a `ws://` or `wss://` URL
    pub async fn connect(url: &str) -> Result<Self> {
        let (stream, _response) = tokio_tungstenite::connect_async(url).await?;
        Ok(Self {
            stream,
            closed: false,
        })
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn receive(&mut self) -> Result<Option<String>> {
        if self.closed {
            return Ok(None);
        }
        while let Some(message) = self.stream.next().await {
            match message? {
                Message::Text(text) => return Ok(Some(text)),
                Message::Binary(bytes) => {
                    let text = String::from_utf8(bytes).map_err(|e| {
                        FleetReplayError::Protocol(format!("Non-UTF-8 binary frame: {}", e))
                    })?;
                    return Ok(Some(text));
                }
                Message::Close(_) => {
                    self.closed = true;
                    return Ok(None);
                }
                // Ping/pong are answered by tungstenite itself
                _ => continue,
            }
        }
        self.closed = true;
        Ok(None)
    }

    async fn send(&mut self, text: String) -> Result<()> {
        if self.closed {
            return Err(FleetReplayError::Transport("WebSocket already closed".into()));
        }
        self.stream.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        match self.stream.close(None).await {
            Ok(())
            | Err(tokio_tungstenite::tungstenite::Error::ConnectionClosed)
            | Err(tokio_tungstenite::tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Connects to a WebSocket URL
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    /// Create a connector for `url`
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>> {
        Ok(Box::new(WebSocketTransport::connect(&self.url).await?))
    }

    fn target(&self) -> String {
        self.url.clone()
    }
}

/// In-process transport; one end of a duplex pipe.
///
/// Used in tests and to wire components together inside one process.
#[derive(Debug)]
pub struct MemoryTransport {
    tx: Option<mpsc::UnboundedSender<String>>,
    rx: mpsc::UnboundedReceiver<String>,
}

impl MemoryTransport {
    /// Create two connected ends
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: Some(a_tx),
                rx: a_rx,
            },
            Self {
                tx: Some(b_tx),
                rx: b_rx,
            },
        )
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn receive(&mut self) -> Result<Option<String>> {
        Ok(self.rx.recv().await)
    }

    async fn send(&mut self, text: String) -> Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| FleetReplayError::Transport("Channel closed".into()))?;
        tx.send(text)
            .map_err(|_| FleetReplayError::Transport("Peer disconnected".into()))
    }

    async fn close(&mut self) -> Result<()> {
        self.tx = None;
        Ok(())
    }
}
