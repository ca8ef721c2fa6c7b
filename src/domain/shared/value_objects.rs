//! Shared value objects

use crate::domain::shared::error::CallError;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Local session identifier, used to correlate log lines of one call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Room identifier
///
/// Rooms are addressed as a URL path segment by the room service, so the id
/// must be non-empty and free of whitespace and slashes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(String);

impl RoomId {
    pub fn parse(id: &str) -> Result<Self, CallError> {
        let id = id.trim();
        if id.is_empty() {
            return Err(CallError::InvalidRoomId("room id must not be empty".to_string()));
        }
        if id.chars().any(|c| c.is_whitespace() || c == '/') {
            return Err(CallError::InvalidRoomId(format!(
                "room id '{}' contains whitespace or '/'",
                id
            )));
        }
        Ok(Self(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RoomId {
    type Error = CallError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RoomId> for String {
    fn from(id: RoomId) -> Self {
        id.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Client identifier assigned by the room service
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_id_parse() {
        let room = RoomId::parse("r1").unwrap();
        assert_eq!(room.as_str(), "r1");
        assert_eq!(room.to_string(), "r1");

        let trimmed = RoomId::parse("  lobby-42 ").unwrap();
        assert_eq!(trimmed.as_str(), "lobby-42");
    }

    #[test]
    fn test_room_id_rejects_invalid() {
        assert!(matches!(RoomId::parse(""), Err(CallError::InvalidRoomId(_))));
        assert!(matches!(RoomId::parse("   "), Err(CallError::InvalidRoomId(_))));
        assert!(matches!(RoomId::parse("a/b"), Err(CallError::InvalidRoomId(_))));
        assert!(matches!(RoomId::parse("a b"), Err(CallError::InvalidRoomId(_))));
    }

    #[test]
    fn test_room_id_serde() {
        let room: RoomId = serde_json::from_str("\"r1\"").unwrap();
        assert_eq!(room.as_str(), "r1");
        assert!(serde_json::from_str::<RoomId>("\"\"").is_err());
    }
}
