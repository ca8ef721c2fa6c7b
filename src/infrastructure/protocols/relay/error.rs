//! Relay channel errors

use crate::domain::shared::error::CallError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Send queue overflowed while disconnected")]
    Backpressure,

    #[error("Channel closed")]
    Closed,

    #[error("Relay permanently lost")]
    PermanentlyLost,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl From<ChannelError> for CallError {
    fn from(error: ChannelError) -> Self {
        match error {
            ChannelError::Closed => CallError::SessionClosed,
            ChannelError::Protocol(detail) => CallError::ProtocolViolation(detail),
            other => CallError::SignalingLost(other.to_string()),
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ChannelError {
    fn from(error: tokio_tungstenite::tungstenite::Error) -> Self {
        ChannelError::Transport(error.to_string())
    }
}
