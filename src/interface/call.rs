//! Call handle and state stream handed to the UI

use crate::application::session::{SessionCommand, SessionConfig, SessionStateMachine};
use crate::domain::media::MediaEngine;
use crate::domain::session::StateChange;
use crate::domain::shared::error::CallError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::RoomId;
use crate::infrastructure::protocols::relay::RelayConnector;
use crate::infrastructure::protocols::room::RoomRegistrar;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Start a call session task; nothing happens until [`CallHandle::join`]
pub fn start_call(
    config: SessionConfig,
    registrar: Arc<dyn RoomRegistrar>,
    connector: Arc<dyn RelayConnector>,
    media: Arc<dyn MediaEngine>,
) -> (CallHandle, StateChanges) {
    let (commands, states) = SessionStateMachine::spawn(config, registrar, connector, media);
    (CallHandle { commands }, StateChanges { states })
}

/// Commands for one call. Clones share the call; dropping the last one hangs up.
#[derive(Clone)]
pub struct CallHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
}

impl CallHandle {
    /// Join a room; the id is validated before anything is sent
    pub fn join(&self, room_id: &str) -> Result<()> {
        let room_id = RoomId::parse(room_id)?;
        self.send(SessionCommand::Join(room_id))
    }

    pub fn hangup(&self) -> Result<()> {
        self.send(SessionCommand::Hangup)
    }

    /// Ask for a new offer/answer cycle; honoured only while connected
    pub fn renegotiate(&self) -> Result<()> {
        self.send(SessionCommand::Renegotiate)
    }

    /// The session has reached a terminal state
    pub fn is_finished(&self) -> bool {
        self.commands.is_closed()
    }

    fn send(&self, command: SessionCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| CallError::SessionClosed)
    }
}

/// Every lifecycle transition of the call, in order; ends after a terminal state
pub struct StateChanges {
    states: mpsc::UnboundedReceiver<StateChange>,
}

impl StateChanges {
    pub async fn next(&mut self) -> Option<StateChange> {
        self.states.recv().await
    }
}

impl Stream for StateChanges {
    type Item = StateChange;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.states.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::media::MockMediaEngine;
    use crate::domain::session::SessionState;
    use crate::infrastructure::protocols::relay::MemoryRelay;
    use crate::infrastructure::protocols::room::MockRoomRegistrar;
    use futures::StreamExt;

    fn idle_call() -> (CallHandle, StateChanges) {
        start_call(
            SessionConfig::default(),
            Arc::new(MockRoomRegistrar::new()),
            Arc::new(MemoryRelay::new()),
            Arc::new(MockMediaEngine::new()),
        )
    }

    #[tokio::test]
    async fn test_empty_room_id_rejected_before_any_request() {
        let (call, _changes) = idle_call();

        assert!(matches!(call.join(""), Err(CallError::InvalidRoomId(_))));
        assert!(matches!(call.join("  "), Err(CallError::InvalidRoomId(_))));
    }

    #[tokio::test]
    async fn test_hangup_from_idle_ends_stream() {
        let (call, changes) = idle_call();
        call.hangup().unwrap();

        let states: Vec<SessionState> = changes.map(|change| change.state).collect().await;
        assert_eq!(states, vec![SessionState::Closing, SessionState::Closed]);

        tokio::task::yield_now().await;
        assert!(call.is_finished());
        assert_eq!(call.hangup(), Err(CallError::SessionClosed));
    }
}
