//! Room registrar - join/leave handshake with the room service

use crate::domain::session::{IceServer, PeerRole, RoomSession};
use crate::domain::shared::error::CallError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{ClientId, RoomId};
use crate::domain::signaling::Frame;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Room service client
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait RoomRegistrar: Send + Sync {
    /// Join a room; one request, no retries
    async fn join(&self, room_id: &RoomId) -> Result<RoomSession>;

    /// Leave a room; best effort, errors are only logged
    async fn leave(&self, room_id: &RoomId, client_id: &ClientId);
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JoinResponse {
    client_id: Option<String>,
    is_initiator: Option<bool>,
    #[serde(default)]
    connectivity_servers: Vec<ConnectivityServer>,
    error_code: Option<String>,
    token: Option<String>,
    relay_url: Option<String>,
    /// Frames queued for us, either as objects or JSON-encoded strings
    #[serde(default)]
    messages: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct ConnectivityServer {
    url: Option<String>,
    #[serde(default)]
    urls: Vec<String>,
    username: Option<String>,
    credential: Option<String>,
}

impl ConnectivityServer {
    fn into_ice_server(self) -> Option<IceServer> {
        let mut urls = self.urls;
        if let Some(url) = self.url {
            urls.insert(0, url);
        }
        if urls.is_empty() {
            return None;
        }
        Some(IceServer {
            urls,
            username: self.username,
            credential: self.credential,
        })
    }
}

/// Map an HTTP status and body from `POST /join/{roomId}` to a session
pub fn parse_join_response(room_id: &RoomId, status: u16, body: &str) -> Result<RoomSession> {
    match status {
        200..=299 => {}
        401 | 403 => return Err(CallError::Unauthorized(format!("room service answered {}", status))),
        404 => return Err(CallError::RoomNotFound),
        500..=599 => return Err(CallError::Unreachable(format!("room service answered {}", status))),
        other => return Err(CallError::Malformed(format!("unexpected status {}", other))),
    }

    let response: JoinResponse = serde_json::from_str(body)
        .map_err(|e| CallError::Malformed(format!("invalid join response: {}", e)))?;

    if let Some(code) = response.error_code.as_deref() {
        return Err(match code {
            "ROOM_FULL" => CallError::RoomFull,
            "ROOM_NOT_FOUND" | "NOT_FOUND" => CallError::RoomNotFound,
            "UNAUTHORIZED" | "FORBIDDEN" => CallError::Unauthorized(code.to_string()),
            other => CallError::Malformed(format!("unknown error code {}", other)),
        });
    }

    let client_id = response
        .client_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| CallError::Malformed("join response has no clientId".to_string()))?;
    let is_initiator = response
        .is_initiator
        .ok_or_else(|| CallError::Malformed("join response has no isInitiator".to_string()))?;

    let mut pending = Vec::with_capacity(response.messages.len());
    for message in response.messages {
        let frame = match message {
            Value::String(text) => Frame::decode(&text),
            other => serde_json::from_value(other)
                .map_err(|e| CallError::ProtocolViolation(format!("invalid frame: {}", e))),
        }
        .map_err(|e| CallError::Malformed(format!("queued message: {}", e)))?;
        pending.push(frame);
    }

    let ice_servers = response
        .connectivity_servers
        .into_iter()
        .filter_map(ConnectivityServer::into_ice_server)
        .collect();

    let mut session = RoomSession::new(
        room_id.clone(),
        ClientId::new(client_id),
        PeerRole::from_is_initiator(is_initiator),
    )
    .with_ice_servers(ice_servers)
    .with_pending_messages(pending);

    if let Some(token) = response.token {
        session = session.with_token(token);
    }
    if let Some(url) = response.relay_url {
        session = session.with_relay_url(url);
    }

    Ok(session)
}

/// Room registrar talking to the room service over HTTP
pub struct HttpRoomRegistrar {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRoomRegistrar {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CallError::Unreachable(format!("failed to build http client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn join_url(&self, room_id: &RoomId) -> String {
        format!("{}/join/{}", self.base_url, room_id)
    }

    fn leave_url(&self, room_id: &RoomId, client_id: &ClientId) -> String {
        format!("{}/leave/{}/{}", self.base_url, room_id, client_id)
    }
}

#[async_trait::async_trait]
impl RoomRegistrar for HttpRoomRegistrar {
    async fn join(&self, room_id: &RoomId) -> Result<RoomSession> {
        let url = self.join_url(room_id);
        debug!("Joining room {} via {}", room_id, url);

        let response = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| CallError::Unreachable(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| CallError::Unreachable(format!("failed to read join response: {}", e)))?;

        let session = parse_join_response(room_id, status, &body)?;
        info!(
            "Joined room {} as {:?} (client {})",
            room_id,
            session.role(),
            session.client_id()
        );
        Ok(session)
    }

    async fn leave(&self, room_id: &RoomId, client_id: &ClientId) {
        let url = self.leave_url(room_id, client_id);
        match self.client.post(&url).send().await {
            Ok(response) if response.status().is_success() => {
                info!("Left room {}", room_id);
            }
            Ok(response) => {
                warn!("Leave for room {} answered {}", room_id, response.status());
            }
            Err(e) => {
                warn!("Failed to leave room {}: {}", room_id, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::signaling::SignalingMessage;

    fn room() -> RoomId {
        RoomId::parse("r1").unwrap()
    }

    #[test]
    fn test_parse_initiator() {
        let body = r#"{
            "clientId": "c-17",
            "isInitiator": true,
            "connectivityServers": [
                {"url": "stun:stun.example.org:3478"},
                {"urls": ["turn:turn.example.org:3478"], "username": "u", "credential": "secret"}
            ],
            "token": "t-1"
        }"#;

        let session = parse_join_response(&room(), 200, body).unwrap();
        assert_eq!(session.client_id().as_str(), "c-17");
        assert_eq!(session.role(), PeerRole::Initiator);
        assert_eq!(session.token(), Some("t-1"));
        assert_eq!(session.ice_servers().len(), 2);
        assert_eq!(session.ice_servers()[1].credential.as_deref(), Some("secret"));
    }

    #[test]
    fn test_parse_joiner_with_queued_messages() {
        let body = r#"{
            "clientId": "c-18",
            "isInitiator": false,
            "messages": [
                "{\"type\":\"offer\",\"payload\":{\"sdp\":\"v=0...A\"},\"seq\":1}",
                {"type": "candidate", "payload": {"sdpMid": "0", "sdpMLineIndex": 0, "candidate": "candidate:1"}, "seq": 2}
            ]
        }"#;

        let session = parse_join_response(&room(), 200, body).unwrap();
        assert_eq!(session.role(), PeerRole::Joiner);
        assert_eq!(session.pending_messages().len(), 2);

        let (seq, message) = session.pending_messages()[0].clone().into_message().unwrap();
        assert_eq!(seq, 1);
        assert_eq!(message, SignalingMessage::Offer { sdp: "v=0...A".into() });
    }

    #[test]
    fn test_error_codes() {
        let full = parse_join_response(&room(), 200, r#"{"errorCode":"ROOM_FULL"}"#);
        assert_eq!(full.unwrap_err(), CallError::RoomFull);

        let missing = parse_join_response(&room(), 200, r#"{"errorCode":"NOT_FOUND"}"#);
        assert_eq!(missing.unwrap_err(), CallError::RoomNotFound);

        let unknown = parse_join_response(&room(), 200, r#"{"errorCode":"WAT"}"#);
        assert!(matches!(unknown, Err(CallError::Malformed(_))));
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(parse_join_response(&room(), 503, ""), Err(CallError::Unreachable(_))));
        assert!(matches!(parse_join_response(&room(), 403, ""), Err(CallError::Unauthorized(_))));
        assert_eq!(parse_join_response(&room(), 404, "").unwrap_err(), CallError::RoomNotFound);
        assert!(matches!(parse_join_response(&room(), 418, ""), Err(CallError::Malformed(_))));
    }

    #[test]
    fn test_malformed_bodies() {
        assert!(matches!(parse_join_response(&room(), 200, "<html>"), Err(CallError::Malformed(_))));
        assert!(matches!(
            parse_join_response(&room(), 200, r#"{"isInitiator":true}"#),
            Err(CallError::Malformed(_))
        ));
        assert!(matches!(
            parse_join_response(&room(), 200, r#"{"clientId":"c"}"#),
            Err(CallError::Malformed(_))
        ));
        assert!(matches!(
            parse_join_response(&room(), 200, r#"{"clientId":"c","isInitiator":false,"messages":["nope"]}"#),
            Err(CallError::Malformed(_))
        ));
    }

    #[test]
    fn test_urls() {
        let registrar = HttpRoomRegistrar::new("http://rooms.example.org/", Duration::from_secs(1)).unwrap();
        assert_eq!(registrar.join_url(&room()), "http://rooms.example.org/join/r1");
        assert_eq!(
            registrar.leave_url(&room(), &ClientId::new("c-1")),
            "http://rooms.example.org/leave/r1/c-1"
        );
    }
}
