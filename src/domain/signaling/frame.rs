//! Relay wire frames
//!
//! Every frame is a JSON object `{type, payload, seq}`. Signaling messages use
//! the types `offer`, `answer`, `candidate` and `bye`; the channel layer adds
//! `register` (sent on every connect) and `ack` (cumulative acknowledgement).

use crate::domain::shared::error::CallError;
use crate::domain::signaling::message::{IceCandidate, SignalingMessage};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameKind {
    Register,
    Ack,
    Offer,
    Answer,
    Candidate,
    Bye,
}

/// Payload of a `register` frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterPayload {
    pub room_id: String,
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Highest sequence marker already delivered to this client
    pub last_seq: u64,
}

#[derive(Debug, Deserialize)]
struct SdpPayload {
    sdp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub kind: FrameKind,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
    #[serde(default)]
    pub seq: u64,
}

impl Frame {
    pub fn message(seq: u64, message: &SignalingMessage) -> Self {
        let (kind, payload) = match message {
            SignalingMessage::Offer { sdp } => (FrameKind::Offer, serde_json::json!({ "sdp": sdp })),
            SignalingMessage::Answer { sdp } => (FrameKind::Answer, serde_json::json!({ "sdp": sdp })),
            SignalingMessage::Candidate(candidate) => (
                FrameKind::Candidate,
                serde_json::json!({
                    "sdpMid": candidate.sdp_mid,
                    "sdpMLineIndex": candidate.sdp_m_line_index,
                    "candidate": candidate.candidate,
                }),
            ),
            SignalingMessage::Bye => (FrameKind::Bye, Value::Null),
        };

        Self { kind, payload, seq }
    }

    pub fn ack(seq: u64) -> Self {
        Self {
            kind: FrameKind::Ack,
            payload: Value::Null,
            seq,
        }
    }

    pub fn register(register: &RegisterPayload) -> Self {
        Self {
            kind: FrameKind::Register,
            payload: serde_json::json!({
                "roomId": register.room_id,
                "clientId": register.client_id,
                "token": register.token,
                "lastSeq": register.last_seq,
            }),
            seq: 0,
        }
    }

    pub fn is_message(&self) -> bool {
        matches!(
            self.kind,
            FrameKind::Offer | FrameKind::Answer | FrameKind::Candidate | FrameKind::Bye
        )
    }

    /// Decode the register payload
    pub fn register_payload(&self) -> Result<RegisterPayload, CallError> {
        if self.kind != FrameKind::Register {
            return Err(CallError::ProtocolViolation(format!(
                "expected register frame, got {:?}",
                self.kind
            )));
        }
        serde_json::from_value(self.payload.clone())
            .map_err(|e| CallError::ProtocolViolation(format!("invalid register payload: {}", e)))
    }

    /// Convert into a sequenced signaling message
    pub fn into_message(self) -> Result<(u64, SignalingMessage), CallError> {
        if self.seq == 0 {
            return Err(CallError::ProtocolViolation(format!(
                "{:?} frame carries no sequence marker",
                self.kind
            )));
        }

        let seq = self.seq;
        let message = match self.kind {
            FrameKind::Offer => SignalingMessage::Offer {
                sdp: sdp_from(self.payload)?,
            },
            FrameKind::Answer => SignalingMessage::Answer {
                sdp: sdp_from(self.payload)?,
            },
            FrameKind::Candidate => {
                let candidate: IceCandidate = serde_json::from_value(self.payload).map_err(|e| {
                    CallError::ProtocolViolation(format!("invalid candidate payload: {}", e))
                })?;
                SignalingMessage::Candidate(candidate)
            }
            FrameKind::Bye => SignalingMessage::Bye,
            FrameKind::Register | FrameKind::Ack => {
                return Err(CallError::ProtocolViolation(format!(
                    "{:?} frame is not a signaling message",
                    self.kind
                )));
            }
        };

        Ok((seq, message))
    }

    pub fn encode(&self) -> Result<String, CallError> {
        serde_json::to_string(self)
            .map_err(|e| CallError::ProtocolViolation(format!("failed to encode frame: {}", e)))
    }

    pub fn decode(text: &str) -> Result<Self, CallError> {
        serde_json::from_str(text)
            .map_err(|e| CallError::ProtocolViolation(format!("invalid frame: {}", e)))
    }
}

fn sdp_from(payload: Value) -> Result<String, CallError> {
    let payload: SdpPayload = serde_json::from_value(payload)
        .map_err(|e| CallError::ProtocolViolation(format!("invalid sdp payload: {}", e)))?;
    Ok(payload.sdp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offer_wire_format() {
        let frame = Frame::message(1, &SignalingMessage::Offer { sdp: "v=0...A".into() });
        let json: Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();

        assert_eq!(json["type"], "offer");
        assert_eq!(json["payload"]["sdp"], "v=0...A");
        assert_eq!(json["seq"], 1);
    }

    #[test]
    fn test_decode_candidate() {
        let text = r#"{"type":"candidate","payload":{"sdpMid":"audio","sdpMLineIndex":0,"candidate":"candidate:2 1 udp 1 10.0.0.3 5000 typ host"},"seq":7}"#;
        let (seq, message) = Frame::decode(text).unwrap().into_message().unwrap();

        assert_eq!(seq, 7);
        match message {
            SignalingMessage::Candidate(candidate) => {
                assert_eq!(candidate.sdp_mid.as_deref(), Some("audio"));
                assert_eq!(candidate.sdp_m_line_index, Some(0));
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_bye_has_no_payload() {
        let text = Frame::message(3, &SignalingMessage::Bye).encode().unwrap();
        assert!(!text.contains("payload"));

        let (seq, message) = Frame::decode(r#"{"type":"bye","seq":3}"#).unwrap().into_message().unwrap();
        assert_eq!(seq, 3);
        assert_eq!(message, SignalingMessage::Bye);
    }

    #[test]
    fn test_rejects_bad_frames() {
        assert!(Frame::decode("not json").is_err());
        assert!(Frame::decode(r#"{"type":"shout","seq":1}"#).is_err());

        // Offer without sdp
        let frame = Frame::decode(r#"{"type":"offer","payload":{},"seq":1}"#).unwrap();
        assert!(matches!(frame.into_message(), Err(CallError::ProtocolViolation(_))));

        // Missing sequence marker
        let frame = Frame::decode(r#"{"type":"bye"}"#).unwrap();
        assert!(matches!(frame.into_message(), Err(CallError::ProtocolViolation(_))));

        // Control frames are not messages
        assert!(Frame::ack(4).into_message().is_err());
        assert!(!Frame::ack(4).is_message());
    }

    #[test]
    fn test_register_payload() {
        let register = RegisterPayload {
            room_id: "r1".into(),
            client_id: "c1".into(),
            token: None,
            last_seq: 12,
        };
        let frame = Frame::register(&register);
        let json: Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();

        assert_eq!(json["type"], "register");
        assert_eq!(json["payload"]["roomId"], "r1");
        assert_eq!(json["payload"]["lastSeq"], 12);
        assert_eq!(frame.register_payload().unwrap(), register);
    }
}
