//! Call session lifecycle
//!
//! One [`SessionStateMachine`] task owns everything about a call: its
//! lifecycle state, the negotiation engine and the candidate buffer behind
//! it. Everything else (the registration request, the relay channel, the
//! media engine) reports back through the actor's queues, so no call state
//! is ever shared between tasks.
//!
//! ```text
//! Idle -> Registering -> ChannelConnecting -> Negotiating -> Connected <-> Reconnecting
//!                                                                 |
//!                                                            Closing -> Closed
//! ```
//!
//! Any live state may fail; `Closed` and `Failed` are terminal.

use crate::application::negotiation::{NegotiationEngine, Progress};
use crate::domain::media::{MediaEngine, MediaEvent};
use crate::domain::session::{CloseReason, FailureReason, RoomSession, SessionState, StateChange};
use crate::domain::shared::error::CallError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{RoomId, SessionId};
use crate::domain::signaling::SignalingMessage;
use crate::infrastructure::metrics::{REGISTRAR_JOIN_ATTEMPTS, REGISTRAR_RETRIES, SESSIONS_FAILED};
use crate::infrastructure::protocols::relay::{
    ChannelConfig, ChannelEvent, ConnectionEvent, RelayConnector, SignalingChannel,
};
use crate::infrastructure::protocols::room::RoomRegistrar;
use crate::infrastructure::retry::BackoffPolicy;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, error, info, warn};

/// Session timing and retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// An offer/answer cycle must reach Stable within this window
    pub negotiation_timeout_ms: u64,
    /// How long a Connected call may sit in Reconnecting
    pub reconnect_grace_ms: u64,
    /// Upper bound for the detached leave request
    pub leave_grace_ms: u64,
    pub registrar_retry: BackoffPolicy,
    pub channel: ChannelConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            negotiation_timeout_ms: 30_000,
            reconnect_grace_ms: 30_000,
            leave_grace_ms: 1_000,
            registrar_retry: BackoffPolicy::default(),
            channel: ChannelConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn negotiation_timeout(&self) -> Duration {
        Duration::from_millis(self.negotiation_timeout_ms)
    }

    pub fn reconnect_grace(&self) -> Duration {
        Duration::from_millis(self.reconnect_grace_ms)
    }

    pub fn leave_grace(&self) -> Duration {
        Duration::from_millis(self.leave_grace_ms)
    }
}

/// User actions forwarded to the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    Join(RoomId),
    Hangup,
    Renegotiate,
}

enum Input {
    /// `None` once every handle is gone
    Command(Option<SessionCommand>),
    Joined(Result<RoomSession>),
    Channel(Option<ChannelEvent>),
    Media(MediaEvent),
    RetryJoin,
    NegotiationDeadline,
    GraceExpired,
}

pub struct SessionStateMachine {
    config: SessionConfig,
    registrar: Arc<dyn RoomRegistrar>,
    connector: Arc<dyn RelayConnector>,
    media: Arc<dyn MediaEngine>,

    commands: mpsc::UnboundedReceiver<SessionCommand>,
    states: mpsc::UnboundedSender<StateChange>,
    state: SessionState,

    room_id: Option<RoomId>,
    session_id: Option<SessionId>,
    session: Option<RoomSession>,
    join_task: Option<JoinHandle<()>>,
    join_results_tx: mpsc::UnboundedSender<Result<RoomSession>>,
    join_results: mpsc::UnboundedReceiver<Result<RoomSession>>,
    join_retries: u32,

    channel: Option<SignalingChannel>,
    channel_events: Option<mpsc::UnboundedReceiver<ChannelEvent>>,
    negotiation: Option<NegotiationEngine>,
    media_events_tx: mpsc::UnboundedSender<MediaEvent>,
    media_events: mpsc::UnboundedReceiver<MediaEvent>,
    media_started: bool,

    retry_at: Option<Instant>,
    negotiation_deadline: Option<Instant>,
    grace_deadline: Option<Instant>,
}

impl SessionStateMachine {
    /// Spawn the session task; returns its command queue and state-change stream
    pub fn spawn(
        config: SessionConfig,
        registrar: Arc<dyn RoomRegistrar>,
        connector: Arc<dyn RelayConnector>,
        media: Arc<dyn MediaEngine>,
    ) -> (
        mpsc::UnboundedSender<SessionCommand>,
        mpsc::UnboundedReceiver<StateChange>,
    ) {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (states, states_rx) = mpsc::unbounded_channel();
        let (join_results_tx, join_results) = mpsc::unbounded_channel();
        let (media_events_tx, media_events) = mpsc::unbounded_channel();

        let machine = Self {
            config,
            registrar,
            connector,
            media,
            commands,
            states,
            state: SessionState::Idle,
            room_id: None,
            session_id: None,
            session: None,
            join_task: None,
            join_results_tx,
            join_results,
            join_retries: 0,
            channel: None,
            channel_events: None,
            negotiation: None,
            media_events_tx,
            media_events,
            media_started: false,
            retry_at: None,
            negotiation_deadline: None,
            grace_deadline: None,
        };
        tokio::spawn(machine.run());

        (commands_tx, states_rx)
    }

    async fn run(mut self) {
        while !self.state.is_terminal() {
            let input = tokio::select! {
                command = self.commands.recv() => Input::Command(command),
                Some(result) = self.join_results.recv() => Input::Joined(result),
                event = next_channel_event(&mut self.channel_events) => Input::Channel(event),
                Some(event) = self.media_events.recv() => Input::Media(event),
                _ = until(self.retry_at) => Input::RetryJoin,
                _ = until(self.negotiation_deadline) => Input::NegotiationDeadline,
                _ = until(self.grace_deadline) => Input::GraceExpired,
            };
            self.handle(input).await;
        }
        debug!("Session task finished in state {}", self.state);
    }

    async fn handle(&mut self, input: Input) {
        match input {
            Input::Command(Some(SessionCommand::Join(room_id))) => self.on_join(room_id),
            Input::Command(Some(SessionCommand::Hangup)) => self.hang_up().await,
            Input::Command(Some(SessionCommand::Renegotiate)) => self.on_renegotiate().await,
            Input::Command(None) => {
                info!("All call handles dropped, hanging up");
                self.hang_up().await;
            }
            Input::Joined(result) => self.on_joined(result).await,
            Input::Channel(Some(event)) => self.on_channel_event(event).await,
            Input::Channel(None) => self.channel_events = None,
            Input::Media(event) => self.on_media_event(event).await,
            Input::RetryJoin => {
                self.retry_at = None;
                self.start_join();
            }
            Input::NegotiationDeadline => {
                self.negotiation_deadline = None;
                self.fail(CallError::NegotiationTimeout).await;
            }
            Input::GraceExpired => {
                self.grace_deadline = None;
                if self.state == SessionState::Reconnecting {
                    warn!("Relay did not come back within {:?}", self.config.reconnect_grace());
                    self.close(CloseReason::SignalingLost).await;
                }
            }
        }
    }

    fn on_join(&mut self, room_id: RoomId) {
        if self.state != SessionState::Idle {
            warn!("Ignoring join for room {} in state {}", room_id, self.state);
            return;
        }
        info!("Joining room {}", room_id);
        self.room_id = Some(room_id);
        self.transition(SessionState::Registering, None);
        self.start_join();
    }

    fn start_join(&mut self) {
        let Some(room_id) = self.room_id.clone() else {
            return;
        };
        metrics::counter!(REGISTRAR_JOIN_ATTEMPTS).increment(1);

        let registrar = self.registrar.clone();
        let results = self.join_results_tx.clone();
        self.join_task = Some(tokio::spawn(async move {
            let result = registrar.join(&room_id).await;
            let _ = results.send(result);
        }));
    }

    async fn on_joined(&mut self, result: Result<RoomSession>) {
        self.join_task = None;
        if self.state != SessionState::Registering {
            debug!("Dropping stale registration result in state {}", self.state);
            return;
        }

        let session = match result {
            Ok(session) => session,
            Err(e) if e.is_retryable() => {
                match self.config.registrar_retry.delay(self.join_retries) {
                    Some(delay) => {
                        self.join_retries += 1;
                        metrics::counter!(REGISTRAR_RETRIES).increment(1);
                        warn!("{}; retry {} in {:?}", e, self.join_retries, delay);
                        self.retry_at = Some(Instant::now() + delay);
                    }
                    None => self.fail(e).await,
                }
                return;
            }
            Err(e) => return self.fail(e).await,
        };

        self.session_id = Some(*session.id());
        info!(
            session = %session.id(),
            "Registered in room {} as {} ({:?}, {} connectivity servers)",
            session.room_id(),
            session.client_id(),
            session.role(),
            session.ice_servers().len()
        );
        self.session = Some(session.clone());
        self.transition(SessionState::ChannelConnecting, None);

        if let Err(e) = self
            .media
            .start(session.ice_servers(), self.media_events_tx.clone())
            .await
        {
            return self.fail(e).await;
        }
        self.media_started = true;

        let role = session.role();
        let (channel, events) =
            SignalingChannel::open(session, self.connector.clone(), self.config.channel);
        self.negotiation = Some(NegotiationEngine::new(
            role,
            self.media.clone(),
            Arc::new(channel.clone()),
        ));
        self.channel = Some(channel);
        self.channel_events = Some(events);
    }

    async fn on_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Message { seq, message } => self.on_signal(seq, message).await,
            ChannelEvent::Connection(ConnectionEvent::Connected) => {
                if self.state != SessionState::ChannelConnecting {
                    return;
                }
                self.transition(SessionState::Negotiating, None);
                self.arm_negotiation_deadline();
                let started = match self.negotiation.as_mut() {
                    Some(negotiation) => negotiation.start().await,
                    None => Ok(()),
                };
                if let Err(e) = started {
                    self.fail(e).await;
                }
            }
            ChannelEvent::Connection(ConnectionEvent::Disconnected) => {
                if self.state == SessionState::Connected {
                    self.transition(SessionState::Reconnecting, None);
                    self.grace_deadline = Some(Instant::now() + self.config.reconnect_grace());
                } else {
                    debug!("Relay dropped in state {}, channel will replay", self.state);
                }
            }
            ChannelEvent::Connection(ConnectionEvent::Reconnected) => {
                if self.state == SessionState::Reconnecting {
                    self.grace_deadline = None;
                    self.transition(SessionState::Connected, None);
                }
            }
            ChannelEvent::Connection(ConnectionEvent::PermanentlyLost) => {
                self.fail(CallError::SignalingLost("relay reconnect budget exhausted".to_string()))
                    .await;
            }
            ChannelEvent::Connection(ConnectionEvent::ProtocolError(detail)) => {
                self.fail(CallError::ProtocolViolation(detail)).await;
            }
        }
    }

    async fn on_signal(&mut self, seq: u64, message: SignalingMessage) {
        debug!("Received {} #{}", message.type_name(), seq);
        let progress = match self.negotiation.as_mut() {
            Some(negotiation) => negotiation.handle_message(message).await,
            None => return,
        };

        match progress {
            Ok(Progress::Continue) => {}
            Ok(Progress::Stable) => self.on_stable(),
            Ok(Progress::Bye) => self.close(CloseReason::RemoteBye).await,
            Err(e) => self.fail(e).await,
        }
    }

    fn on_stable(&mut self) {
        // A deferred renegotiation may already be in flight again
        let in_flight = self.negotiation.as_ref().map_or(false, |n| !n.is_stable());
        if in_flight {
            self.arm_negotiation_deadline();
        } else {
            self.negotiation_deadline = None;
        }

        if self.state == SessionState::Negotiating {
            self.transition(SessionState::Connected, None);
        }
    }

    async fn on_media_event(&mut self, event: MediaEvent) {
        match event {
            MediaEvent::LocalCandidate(candidate) => {
                if let Some(negotiation) = self.negotiation.as_mut() {
                    if let Err(e) = negotiation.on_local_candidate(candidate) {
                        warn!("Could not forward local candidate: {}", e);
                    }
                }
            }
            MediaEvent::RenegotiationNeeded => self.on_renegotiate().await,
        }
    }

    async fn on_renegotiate(&mut self) {
        if self.state != SessionState::Connected {
            debug!("Ignoring renegotiation request in state {}", self.state);
            return;
        }
        let result = match self.negotiation.as_mut() {
            Some(negotiation) => negotiation.renegotiate().await.map(|_| negotiation.is_stable()),
            None => return,
        };
        match result {
            Ok(true) => {}
            Ok(false) => self.arm_negotiation_deadline(),
            Err(e) => self.fail(e).await,
        }
    }

    async fn hang_up(&mut self) {
        if self.state.is_terminal() || self.state == SessionState::Closing {
            return;
        }
        info!("Hanging up in state {}", self.state);
        self.close(CloseReason::LocalHangup).await;
    }

    async fn close(&mut self, reason: CloseReason) {
        if !self.transition(SessionState::Closing, Some(reason)) {
            return;
        }
        self.teardown(reason == CloseReason::LocalHangup).await;
        self.transition(SessionState::Closed, Some(reason));
    }

    /// Report a terminal failure; only the first one counts
    async fn fail(&mut self, error: CallError) {
        if self.state.is_terminal() || self.state == SessionState::Closing {
            debug!("Ignoring {} after the session ended", error);
            return;
        }
        error!("Session failed in state {}: {}", self.state, error);
        self.teardown(false).await;
        metrics::counter!(SESSIONS_FAILED).increment(1);
        self.transition(SessionState::Failed(FailureReason::from(&error)), None);
    }

    async fn teardown(&mut self, send_bye: bool) {
        self.retry_at = None;
        self.negotiation_deadline = None;
        self.grace_deadline = None;

        if let Some(task) = self.join_task.take() {
            debug!("Aborting in-flight registration");
            task.abort();
        }

        if let Some(channel) = self.channel.take() {
            if send_bye {
                // The channel stays open until the peer acknowledges the bye or the grace runs out
                let bye = channel.send(SignalingMessage::Bye);
                let grace = self.config.leave_grace();
                tokio::spawn(async move {
                    match timeout(grace, bye).await {
                        Ok(Ok(ack)) => debug!("Peer acknowledged bye #{}", ack.seq),
                        Ok(Err(e)) => warn!("Bye was not delivered: {}", e),
                        Err(_) => warn!("Bye not acknowledged within {:?}", grace),
                    }
                    channel.close();
                });
            } else {
                channel.close();
            }
        }
        self.channel_events = None;

        if let Some(mut negotiation) = self.negotiation.take() {
            negotiation.clear();
        }

        if self.media_started {
            self.media_started = false;
            self.media.close().await;
        }

        if let Some(session) = self.session.take() {
            let registrar = self.registrar.clone();
            let grace = self.config.leave_grace();
            tokio::spawn(async move {
                let leave = registrar.leave(session.room_id(), session.client_id());
                if timeout(grace, leave).await.is_err() {
                    warn!("Leave for room {} timed out after {:?}", session.room_id(), grace);
                }
            });
        }
    }

    fn arm_negotiation_deadline(&mut self) {
        self.negotiation_deadline = Some(Instant::now() + self.config.negotiation_timeout());
    }

    /// Validate and publish a transition; exactly one event per accepted change
    fn transition(&mut self, next: SessionState, reason: Option<CloseReason>) -> bool {
        if !self.state.can_transition_to(&next) {
            warn!(
                "{}",
                CallError::InvalidStateTransition(format!("{} -> {}", self.state, next))
            );
            return false;
        }
        info!("Session state {} -> {}", self.state, next);
        self.state = next.clone();
        // The UI may have stopped listening
        let _ = self
            .states
            .send(StateChange::new(next, reason).in_session(self.session_id));
        true
    }
}

async fn next_channel_event(
    events: &mut Option<mpsc::UnboundedReceiver<ChannelEvent>>,
) -> Option<ChannelEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::media::MockMediaEngine;
    use crate::domain::session::PeerRole;
    use crate::domain::shared::value_objects::ClientId;
    use crate::domain::signaling::FrameKind;
    use crate::infrastructure::protocols::relay::{ChannelError, MemoryRelay};
    use crate::infrastructure::protocols::room::MockRoomRegistrar;
    use std::sync::Mutex;

    fn room() -> RoomId {
        RoomId::parse("r1").unwrap()
    }

    fn spawn(
        registrar: MockRoomRegistrar,
        media: MockMediaEngine,
    ) -> (
        mpsc::UnboundedSender<SessionCommand>,
        mpsc::UnboundedReceiver<StateChange>,
    ) {
        SessionStateMachine::spawn(
            SessionConfig::default(),
            Arc::new(registrar),
            Arc::new(MemoryRelay::new()),
            Arc::new(media),
        )
    }

    fn fast_channel_config() -> SessionConfig {
        SessionConfig {
            channel: ChannelConfig {
                reconnect: BackoffPolicy::new(Duration::from_millis(100), 2, 2),
                ..ChannelConfig::default()
            },
            ..SessionConfig::default()
        }
    }

    /// Registrar that places client `c1` in the room as the joiner
    fn joiner_registrar() -> MockRoomRegistrar {
        let mut registrar = MockRoomRegistrar::new();
        registrar
            .expect_join()
            .times(1)
            .returning(|room_id| Ok(RoomSession::new(room_id.clone(), ClientId::new("c1"), PeerRole::Joiner)));
        registrar.expect_leave().returning(|_, _| ());
        registrar
    }

    fn idle_media() -> MockMediaEngine {
        let mut media = MockMediaEngine::new();
        media.expect_start().returning(|_, _| Ok(()));
        media.expect_close().returning(|| ());
        media
    }

    async fn join_until_negotiating(
        relay: &MemoryRelay,
        config: SessionConfig,
    ) -> (
        mpsc::UnboundedSender<SessionCommand>,
        mpsc::UnboundedReceiver<StateChange>,
    ) {
        let (commands, mut states) = SessionStateMachine::spawn(
            config,
            Arc::new(joiner_registrar()),
            Arc::new(relay.clone()),
            Arc::new(idle_media()),
        );
        commands.send(SessionCommand::Join(room())).unwrap();
        for expected in [
            SessionState::Registering,
            SessionState::ChannelConnecting,
            SessionState::Negotiating,
        ] {
            let change = states.recv().await.unwrap();
            // Registration hands out the session id every later change carries
            assert_eq!(change.metadata.session_id.is_some(), expected != SessionState::Registering);
            assert_eq!(change.state, expected);
        }
        (commands, states)
    }

    /// Collect states until the session task ends
    async fn drain(states: &mut mpsc::UnboundedReceiver<StateChange>) -> Vec<SessionState> {
        let mut seen = Vec::new();
        while let Some(change) = states.recv().await {
            seen.push(change.state);
        }
        seen
    }

    #[tokio::test(start_paused = true)]
    async fn test_room_full_fails_without_retry() {
        let mut registrar = MockRoomRegistrar::new();
        registrar
            .expect_join()
            .times(1)
            .returning(|_| Err(CallError::RoomFull));
        let (commands, mut states) = spawn(registrar, MockMediaEngine::new());

        commands.send(SessionCommand::Join(room())).unwrap();

        assert_eq!(
            drain(&mut states).await,
            vec![
                SessionState::Registering,
                SessionState::Failed(FailureReason::RoomFull)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_retried_with_backoff() {
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let recorded = attempts.clone();
        let mut registrar = MockRoomRegistrar::new();
        registrar.expect_join().times(6).returning(move |_| {
            recorded.lock().unwrap().push(Instant::now());
            Err(CallError::Unreachable("connection refused".into()))
        });
        let (commands, mut states) = spawn(registrar, MockMediaEngine::new());

        commands.send(SessionCommand::Join(room())).unwrap();

        assert_eq!(
            drain(&mut states).await,
            vec![
                SessionState::Registering,
                SessionState::Failed(FailureReason::Unreachable)
            ]
        );
        let attempts = attempts.lock().unwrap();
        let gaps: Vec<u64> = attempts
            .windows(2)
            .map(|pair| (pair[1] - pair[0]).as_secs())
            .collect();
        assert_eq!(gaps, vec![1, 2, 4, 8, 16]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_then_success_continues() {
        let mut registrar = MockRoomRegistrar::new();
        let mut calls = 0;
        registrar.expect_join().times(2).returning(move |room_id| {
            calls += 1;
            if calls == 1 {
                Err(CallError::Unreachable("timeout".into()))
            } else {
                Ok(RoomSession::new(room_id.clone(), ClientId::new("c1"), PeerRole::Joiner))
            }
        });
        registrar.expect_leave().returning(|_, _| ());
        let mut media = MockMediaEngine::new();
        media.expect_start().returning(|_, _| Ok(()));
        media.expect_close().returning(|| ());
        let (commands, mut states) = spawn(registrar, media);

        commands.send(SessionCommand::Join(room())).unwrap();
        assert_eq!(states.recv().await.unwrap().state, SessionState::Registering);
        assert_eq!(states.recv().await.unwrap().state, SessionState::ChannelConnecting);
        assert_eq!(states.recv().await.unwrap().state, SessionState::Negotiating);

        commands.send(SessionCommand::Hangup).unwrap();
        let closing = states.recv().await.unwrap();
        assert_eq!(closing.state, SessionState::Closing);
        assert_eq!(closing.reason, Some(CloseReason::LocalHangup));
        assert_eq!(states.recv().await.unwrap().state, SessionState::Closed);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_hangup_cancels_pending_retry() {
        let mut registrar = MockRoomRegistrar::new();
        registrar
            .expect_join()
            .times(1)
            .returning(|_| Err(CallError::Unreachable("refused".into())));
        let (commands, mut states) = spawn(registrar, MockMediaEngine::new());

        commands.send(SessionCommand::Join(room())).unwrap();
        assert_eq!(states.recv().await.unwrap().state, SessionState::Registering);
        tokio::time::sleep(Duration::from_millis(500)).await;
        commands.send(SessionCommand::Hangup).unwrap();

        assert_eq!(
            drain(&mut states).await,
            vec![SessionState::Closing, SessionState::Closed]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_join_is_ignored() {
        let mut registrar = MockRoomRegistrar::new();
        registrar
            .expect_join()
            .times(1)
            .returning(|_| Err(CallError::Malformed("missing clientId".into())));
        let (commands, mut states) = spawn(registrar, MockMediaEngine::new());

        commands.send(SessionCommand::Join(room())).unwrap();
        commands.send(SessionCommand::Join(room())).unwrap();

        assert_eq!(
            drain(&mut states).await,
            vec![
                SessionState::Registering,
                SessionState::Failed(FailureReason::Malformed)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_media_start_failure_leaves_room() {
        let mut registrar = MockRoomRegistrar::new();
        registrar
            .expect_join()
            .returning(|room_id| Ok(RoomSession::new(room_id.clone(), ClientId::new("c1"), PeerRole::Initiator)));
        registrar.expect_leave().times(1).returning(|_, _| ());
        let mut media = MockMediaEngine::new();
        media
            .expect_start()
            .returning(|_, _| Err(CallError::MediaEngine("no audio device".into())));
        let (commands, mut states) = spawn(registrar, media);

        commands.send(SessionCommand::Join(room())).unwrap();

        assert_eq!(
            drain(&mut states).await,
            vec![
                SessionState::Registering,
                SessionState::ChannelConnecting,
                SessionState::Failed(FailureReason::MediaEngine("no audio device".into()))
            ]
        );
        // Let the detached leave run
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_hangs_up() {
        let (commands, mut states) = spawn(MockRoomRegistrar::new(), MockMediaEngine::new());
        drop(commands);

        let changes: Vec<StateChange> = {
            let mut changes = Vec::new();
            while let Some(change) = states.recv().await {
                changes.push(change);
            }
            changes
        };
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].state, SessionState::Closing);
        assert_eq!(changes[1].reason, Some(CloseReason::LocalHangup));
    }

    #[tokio::test(start_paused = true)]
    async fn test_relay_lost_while_negotiating_fails_call() {
        let relay = MemoryRelay::new();
        let (_commands, mut states) = join_until_negotiating(&relay, fast_channel_config()).await;

        relay.set_offline("c1", true).await;

        assert_eq!(
            drain(&mut states).await,
            vec![SessionState::Failed(FailureReason::SignalingLost)]
        );
        // First link plus two refused reconnects
        assert_eq!(relay.connect_count("c1").await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_undecodable_relay_frame_fails_call() {
        let relay = MemoryRelay::new();
        let (_commands, mut states) = join_until_negotiating(&relay, fast_channel_config()).await;

        relay
            .inject_error("c1", ChannelError::Protocol("bad frame".into()))
            .await;

        assert_eq!(
            drain(&mut states).await,
            vec![SessionState::Failed(FailureReason::ProtocolViolation("bad frame".into()))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_bye_written_when_relay_returns_within_leave_grace() {
        let relay = MemoryRelay::new();
        let (commands, mut states) = join_until_negotiating(&relay, fast_channel_config()).await;

        relay.set_offline("c1", true).await;
        commands.send(SessionCommand::Hangup).unwrap();
        assert_eq!(
            drain(&mut states).await,
            vec![SessionState::Closing, SessionState::Closed]
        );

        relay.set_offline("c1", false).await;
        tokio::time::sleep(Duration::from_secs(2)).await;

        let byes = relay
            .routed_frames("c1")
            .await
            .into_iter()
            .filter(|frame| frame.kind == FrameKind::Bye)
            .count();
        assert_eq!(byes, 1);
    }

    #[test]
    fn test_config_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.negotiation_timeout(), Duration::from_secs(30));
        assert_eq!(config.reconnect_grace(), Duration::from_secs(30));
        assert_eq!(config.leave_grace(), Duration::from_secs(1));
        assert_eq!(config.registrar_retry.max_attempts, 5);
    }
}
