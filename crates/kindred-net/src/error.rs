use std::time::Duration;

use thiserror::Error;

use kindred_shared::KindredError;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Unknown STOMP command: {0}")]
    UnknownCommand(String),

    #[error("Malformed header line: {0}")]
    MalformedHeader(String),

    #[error("Invalid escape sequence in header: {0}")]
    InvalidEscape(String),

    #[error("Invalid content-length: {0}")]
    InvalidContentLength(String),

    #[error("Frame is not valid UTF-8")]
    InvalidUtf8,
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Invalid endpoint URL: {0}")]
    InvalidUrl(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Non-text payload could not be decoded")]
    InvalidPayload,

    #[error("Transport closed: {0}")]
    Closed(String),
}

#[derive(Error, Debug)]
pub enum ChannelError {
    /// No session has been opened (or it was torn down by `disconnect`).
    #[error("WebSocket client not initialized")]
    NotInitialized,

    #[error("There is no underlying STOMP connection")]
    NotConnected,

    #[error("{0}")]
    Protocol(#[from] KindredError),

    #[error("Broker rejected the connection: {0}")]
    Handshake(String),

    #[error("Handshake did not complete within {0:?}")]
    Timeout(Duration),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Session closed")]
    SessionClosed,
}

impl ChannelError {
    /// Whether establishing the session again might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ChannelError::Transport(_) | ChannelError::Timeout(_) | ChannelError::SessionClosed
        )
    }
}
