//! Session events published to the UI

use crate::domain::session::value_object::{CloseReason, SessionState};
use crate::domain::shared::events::EventMetadata;
use crate::domain::shared::value_objects::SessionId;
use serde::{Deserialize, Serialize};

/// One lifecycle transition of a call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateChange {
    pub metadata: EventMetadata,
    pub state: SessionState,
    pub reason: Option<CloseReason>,
}

impl StateChange {
    pub fn new(state: SessionState, reason: Option<CloseReason>) -> Self {
        Self {
            metadata: EventMetadata::new("session.state_changed"),
            state,
            reason,
        }
    }

    pub fn in_session(mut self, session_id: Option<SessionId>) -> Self {
        self.metadata.session_id = session_id;
        self
    }
}
