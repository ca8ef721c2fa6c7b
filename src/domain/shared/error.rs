//! Domain errors

use thiserror::Error;

/// How an error is handled by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Retried per component policy, surfaced only once the retry budget is spent
    Transient,
    /// Logged, then either resolved in place (glare) or escalated to a failure
    ProtocolViolation,
    /// Surfaced immediately, never retried
    Fatal,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    #[error("Invalid room id: {0}")]
    InvalidRoomId(String),

    #[error("Room is full")]
    RoomFull,

    #[error("Room not found")]
    RoomNotFound,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Room service unreachable: {0}")]
    Unreachable(String),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Signaling lost: {0}")]
    SignalingLost(String),

    #[error("Glare detected")]
    GlareDetected,

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Negotiation did not reach a stable state in time")]
    NegotiationTimeout,

    #[error("Media engine error: {0}")]
    MediaEngine(String),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("Session closed")]
    SessionClosed,
}

impl CallError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CallError::Unreachable(_) | CallError::SignalingLost(_) => ErrorKind::Transient,
            CallError::Malformed(_)
            | CallError::GlareDetected
            | CallError::ProtocolViolation(_)
            | CallError::InvalidStateTransition(_) => ErrorKind::ProtocolViolation,
            CallError::InvalidRoomId(_)
            | CallError::RoomFull
            | CallError::RoomNotFound
            | CallError::Unauthorized(_)
            | CallError::NegotiationTimeout
            | CallError::MediaEngine(_)
            | CallError::SessionClosed => ErrorKind::Fatal,
        }
    }

    /// Only an unreachable room service is worth another registration attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CallError::Unreachable(_))
    }
}
