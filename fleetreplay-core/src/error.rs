//! Error types for capture, proxy and replay operations

use std::time::Duration;

/// Result type for fleetreplay operations
pub type Result<T> = std::result::Result<T, FleetReplayError>;

/// Error types for the capture/replay subsystem
#[derive(Debug, thiserror::Error)]
pub enum FleetReplayError {
    /// Capture buffer error (output directory, session state)
    #[error("Capture error: {0}")]
    Capture(String),

    /// Writing a capture session to disk failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Channel I/O failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// Live upstream refused, dropped or garbled a request
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// A bounded wait elapsed
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// A peer sent something that does not match the channel protocol
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Malformed or unusable event envelope
    #[error("Ingest error: {0}")]
    Ingest(String),

    /// Replay source could not be used
    #[error("Replay error: {0}")]
    Replay(String),

    /// An output channel could not be opened at all
    #[error("Channel '{channel}' unavailable: {reason}")]
    ChannelUnavailable { channel: String, reason: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl FleetReplayError {
    /// Whether this error ends the connection it occurred on.
    ///
    /// Per-request failures (timeouts, garbled upstream replies) leave the
    /// connection usable; transport failures do not.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(self, FleetReplayError::Transport(_) | FleetReplayError::Io(_))
    }
}

impl From<String> for FleetReplayError {
    fn from(s: String) -> Self {
        FleetReplayError::Other(s)
    }
}

impl From<&str> for FleetReplayError {
    fn from(s: &str) -> Self {
        FleetReplayError::Other(s.to_string())
    }
}

impl From<anyhow::Error> for FleetReplayError {
    fn from(err: anyhow::Error) -> Self {
        FleetReplayError::Other(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for FleetReplayError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        FleetReplayError::Transport(err.to_string())
    }
}

impl From<figment::Error> for FleetReplayError {
    fn from(err: figment::Error) -> Self {
        FleetReplayError::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_fatal_classification() {
        assert!(FleetReplayError::Transport("closed".into()).is_connection_fatal());
        assert!(!FleetReplayError::Timeout(Duration::from_secs(5)).is_connection_fatal());
        assert!(!FleetReplayError::Upstream("bad json".into()).is_connection_fatal());
    }

    #[test]
    fn test_channel_unavailable_message() {
        let err = FleetReplayError::ChannelUnavailable {
            channel: "trajectory".into(),
            reason: "connection refused".into(),
        };
        assert_eq!(
            err.to_string(),
            "Channel 'trajectory' unavailable: connection refused"
        );
    }
}
