//! Session value objects

use crate::domain::shared::error::CallError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Role the room service assigned to this client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerRole {
    /// First client in the room, originates the offer
    Initiator,
    /// Second client in the room, answers the offer
    Joiner,
}

impl PeerRole {
    pub fn from_is_initiator(is_initiator: bool) -> Self {
        if is_initiator {
            PeerRole::Initiator
        } else {
            PeerRole::Joiner
        }
    }

    pub fn is_initiator(&self) -> bool {
        matches!(self, PeerRole::Initiator)
    }
}

/// Connectivity (STUN/TURN) server descriptor handed to the media engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

impl IceServer {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, credential: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.credential = Some(credential.into());
        self
    }
}

/// Why a session failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    RoomFull,
    RoomNotFound,
    Unauthorized,
    /// Room service stayed unreachable through every retry
    Unreachable,
    Malformed,
    /// Relay channel could not be re-established
    SignalingLost,
    NegotiationTimeout,
    ProtocolViolation(String),
    MediaEngine(String),
}

impl From<&CallError> for FailureReason {
    fn from(error: &CallError) -> Self {
        match error {
            CallError::RoomFull => FailureReason::RoomFull,
            CallError::RoomNotFound => FailureReason::RoomNotFound,
            CallError::Unauthorized(_) => FailureReason::Unauthorized,
            CallError::Unreachable(_) => FailureReason::Unreachable,
            CallError::InvalidRoomId(_) | CallError::Malformed(_) => FailureReason::Malformed,
            CallError::SignalingLost(_) | CallError::SessionClosed => FailureReason::SignalingLost,
            CallError::NegotiationTimeout => FailureReason::NegotiationTimeout,
            CallError::MediaEngine(detail) => FailureReason::MediaEngine(detail.clone()),
            CallError::GlareDetected => FailureReason::ProtocolViolation(error.to_string()),
            CallError::ProtocolViolation(detail) | CallError::InvalidStateTransition(detail) => {
                FailureReason::ProtocolViolation(detail.clone())
            }
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::RoomFull => f.write_str("room is full"),
            FailureReason::RoomNotFound => f.write_str("room not found"),
            FailureReason::Unauthorized => f.write_str("unauthorized"),
            FailureReason::Unreachable => f.write_str("room service unreachable"),
            FailureReason::Malformed => f.write_str("malformed room service response"),
            FailureReason::SignalingLost => f.write_str("signaling lost"),
            FailureReason::NegotiationTimeout => f.write_str("negotiation timed out"),
            FailureReason::ProtocolViolation(detail) => write!(f, "protocol violation: {}", detail),
            FailureReason::MediaEngine(detail) => write!(f, "media engine: {}", detail),
        }
    }
}

/// Why a session is closing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    /// User hung up locally
    LocalHangup,
    /// Remote peer sent Bye
    RemoteBye,
    /// Relay channel did not come back within the reconnect grace period
    SignalingLost,
}

/// Session lifecycle state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Registering,
    ChannelConnecting,
    Negotiating,
    Connected,
    /// Relay dropped while connected; media keeps flowing
    Reconnecting,
    Closing,
    Closed,
    Failed(FailureReason),
}

impl SessionState {
    /// Check if state transition is valid
    pub fn can_transition_to(&self, new_state: &SessionState) -> bool {
        use SessionState::*;

        match (self, new_state) {
            // Terminal states
            (Closed, _) | (Failed(_), _) => false,

            // Nothing but Closed follows Closing
            (Closing, Closed) => true,
            (Closing, _) => false,

            // Hangup and failure are reachable from every live state
            (_, Closing) => true,
            (Idle, Failed(_)) => false,
            (_, Failed(_)) => true,

            (Idle, Registering) => true,
            (Registering, ChannelConnecting) => true,
            (ChannelConnecting, Negotiating) => true,
            (Negotiating, Connected) => true,
            (Connected, Reconnecting) => true,
            (Reconnecting, Connected) => true,

            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed(_))
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Failed(reason) => write!(f, "Failed({})", reason),
            other => write!(f, "{:?}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        use SessionState::*;

        let path = [Idle, Registering, ChannelConnecting, Negotiating, Connected, Closing, Closed];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(&pair[1]), "{:?} -> {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_reconnecting_round_trip() {
        assert!(SessionState::Connected.can_transition_to(&SessionState::Reconnecting));
        assert!(SessionState::Reconnecting.can_transition_to(&SessionState::Connected));
        assert!(SessionState::Reconnecting.can_transition_to(&SessionState::Closing));
        assert!(!SessionState::Negotiating.can_transition_to(&SessionState::Reconnecting));
    }

    #[test]
    fn test_terminal_states() {
        let failed = SessionState::Failed(FailureReason::RoomFull);
        assert!(failed.is_terminal());
        assert!(!failed.can_transition_to(&SessionState::Closing));
        assert!(!SessionState::Closed.can_transition_to(&SessionState::Idle));
        assert!(!SessionState::Closing.can_transition_to(&SessionState::Failed(FailureReason::SignalingLost)));
    }

    #[test]
    fn test_invalid_skips() {
        assert!(!SessionState::Idle.can_transition_to(&SessionState::Connected));
        assert!(!SessionState::Registering.can_transition_to(&SessionState::Negotiating));
    }

    #[test]
    fn test_failure_reason_from_error() {
        assert_eq!(FailureReason::from(&CallError::RoomFull), FailureReason::RoomFull);
        assert_eq!(
            FailureReason::from(&CallError::Unreachable("refused".into())),
            FailureReason::Unreachable
        );
        assert_eq!(
            FailureReason::from(&CallError::MediaEngine("no codec".into())),
            FailureReason::MediaEngine("no codec".into())
        );
    }

    #[test]
    fn test_peer_role() {
        assert_eq!(PeerRole::from_is_initiator(true), PeerRole::Initiator);
        assert_eq!(PeerRole::from_is_initiator(false), PeerRole::Joiner);
        assert!(PeerRole::Initiator.is_initiator());
    }
}
