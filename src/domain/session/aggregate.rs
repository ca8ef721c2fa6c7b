//! Room session aggregate

use crate::domain::session::value_object::{IceServer, PeerRole};
use crate::domain::shared::value_objects::{ClientId, RoomId, SessionId};
use crate::domain::signaling::Frame;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of a successful room registration
///
/// Immutable once created; lives until the call is closed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomSession {
    id: SessionId,
    room_id: RoomId,
    client_id: ClientId,
    role: PeerRole,
    /// Token authorizing access to the relay channel
    token: Option<String>,
    ice_servers: Vec<IceServer>,
    /// Relay endpoint handed out by the room service, if any
    relay_url: Option<String>,
    /// Signaling the room service held for us before we joined
    pending_messages: Vec<Frame>,
    created_at: DateTime<Utc>,
}

impl RoomSession {
    pub fn new(room_id: RoomId, client_id: ClientId, role: PeerRole) -> Self {
        Self {
            id: SessionId::new(),
            room_id,
            client_id,
            role,
            token: None,
            ice_servers: Vec::new(),
            relay_url: None,
            pending_messages: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_ice_servers(mut self, servers: Vec<IceServer>) -> Self {
        self.ice_servers = servers;
        self
    }

    pub fn with_relay_url(mut self, url: impl Into<String>) -> Self {
        self.relay_url = Some(url.into());
        self
    }

    pub fn with_pending_messages(mut self, frames: Vec<Frame>) -> Self {
        self.pending_messages = frames;
        self
    }

    // Getters
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn role(&self) -> PeerRole {
        self.role
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn ice_servers(&self) -> &[IceServer] {
        &self.ice_servers
    }

    pub fn relay_url(&self) -> Option<&str> {
        self.relay_url.as_deref()
    }

    pub fn pending_messages(&self) -> &[Frame] {
        &self.pending_messages
    }

    pub fn created_at(&self) -> &DateTime<Utc> {
        &self.created_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_session_builder() {
        let session = RoomSession::new(RoomId::parse("r1").unwrap(), ClientId::new("c1"), PeerRole::Initiator)
            .with_token("tok")
            .with_ice_servers(vec![IceServer::new("stun:stun.example.org:3478")])
            .with_relay_url("wss://relay.example.org/ws");

        assert_eq!(session.room_id().as_str(), "r1");
        assert_eq!(session.client_id().as_str(), "c1");
        assert_eq!(session.role(), PeerRole::Initiator);
        assert_eq!(session.token(), Some("tok"));
        assert_eq!(session.ice_servers().len(), 1);
        assert_eq!(session.relay_url(), Some("wss://relay.example.org/ws"));
        assert!(session.pending_messages().is_empty());
    }
}
