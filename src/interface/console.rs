//! Console presenter used by the binary in place of a real UI

use crate::domain::session::{SessionState, StateChange};
use crate::interface::call::StateChanges;
use tracing::info;

/// One human readable line per state change
pub fn describe(change: &StateChange) -> String {
    let at = change.metadata.occurred_at.format("%H:%M:%S%.3f");
    match (&change.state, change.reason) {
        (SessionState::Failed(reason), _) => format!("[{}] call failed: {}", at, reason),
        (state, Some(reason)) => format!("[{}] {} ({:?})", at, state, reason),
        (state, None) => format!("[{}] {}", at, state),
    }
}

/// Print state changes until the call ends; returns the final state
pub async fn present(mut changes: StateChanges) -> Option<SessionState> {
    let mut last = None;
    while let Some(change) = changes.next().await {
        match change.metadata.session_id {
            Some(session) => info!(event_id = %change.metadata.event_id, %session, "{}", change.state),
            None => info!(event_id = %change.metadata.event_id, "{}", change.state),
        }
        println!("{}", describe(&change));
        last = Some(change.state);
    }
    last
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::session::{CloseReason, FailureReason};

    #[test]
    fn test_describe() {
        let line = describe(&StateChange::new(SessionState::Connected, None));
        assert!(line.ends_with("] Connected"));

        let line = describe(&StateChange::new(
            SessionState::Closing,
            Some(CloseReason::RemoteBye),
        ));
        assert!(line.ends_with("Closing (RemoteBye)"));

        let line = describe(&StateChange::new(
            SessionState::Failed(FailureReason::RoomFull),
            None,
        ));
        assert!(line.ends_with("call failed: room is full"));
    }
}
