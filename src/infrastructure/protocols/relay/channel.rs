//! Signaling channel
//!
//! Ordered, exactly-once message delivery over a relay connection that may
//! drop at any time. Each direction numbers its messages from 1, and a
//! message gets its number when it is first written to a link. Sends made
//! while disconnected wait unnumbered in a bounded queue, so dropping the
//! oldest of them never leaves a gap. Written messages stay in an outbox
//! until the peer acknowledges them and the whole outbox is replayed after
//! every reconnect; the receiving side drops anything at or below the last
//! delivered sequence marker and holds early arrivals until the gap before
//! them is filled.

use super::connector::{RelayConnection, RelayConnector};
use super::error::ChannelError;
use crate::domain::session::RoomSession;
use crate::domain::shared::result::Result as CallResult;
use crate::domain::shared::error::CallError;
use crate::domain::signaling::{Frame, FrameKind, RegisterPayload, SignalSink, SignalingMessage};
use crate::infrastructure::metrics::{
    SIGNALING_BACKPRESSURE, SIGNALING_DUPLICATES_DROPPED, SIGNALING_RECONNECTS,
};
use crate::infrastructure::retry::BackoffPolicy;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, info_span, warn, Instrument};

/// Channel tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Bound for sends queued while disconnected, and for out-of-order arrivals held back
    pub queue_depth: usize,
    pub connect_timeout_ms: u64,
    pub reconnect: BackoffPolicy,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            queue_depth: 64,
            connect_timeout_ms: 10_000,
            reconnect: BackoffPolicy::default(),
        }
    }
}

/// The peer acknowledged everything up to and including `seq`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub seq: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// First successful connect
    Connected,
    Disconnected,
    Reconnected,
    /// Reconnect budget exhausted; the channel has stopped
    PermanentlyLost,
    /// Undecodable frame or reorder overflow
    ProtocolError(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Message { seq: u64, message: SignalingMessage },
    Connection(ConnectionEvent),
}

/// Resolves once the peer acknowledges the message, or with the reason it never will
pub struct AckHandle {
    rx: oneshot::Receiver<Result<Ack, ChannelError>>,
}

impl Future for AckHandle {
    type Output = Result<Ack, ChannelError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(ChannelError::Closed)),
            Poll::Pending => Poll::Pending,
        }
    }
}

enum Command {
    Send {
        message: SignalingMessage,
        ack: oneshot::Sender<Result<Ack, ChannelError>>,
    },
    Close,
}

/// Handle to a running channel; clones share the same channel
#[derive(Clone)]
pub struct SignalingChannel {
    commands: mpsc::UnboundedSender<Command>,
}

impl SignalingChannel {
    /// Start the channel task and return its handle with the event stream
    pub fn open(
        session: RoomSession,
        connector: Arc<dyn RelayConnector>,
        config: ChannelConfig,
    ) -> (Self, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let span = info_span!("signaling", session = %session.id(), room = %session.room_id());

        let worker = ChannelWorker {
            session,
            connector,
            config,
            commands: commands_rx,
            events: events_tx,
            next_seq: 1,
            queued: VecDeque::new(),
            outbox: VecDeque::new(),
            last_delivered: 0,
            held: BTreeMap::new(),
            connected_once: false,
            pending_delivered: false,
            link_healthy: false,
        };
        tokio::spawn(worker.run().instrument(span));

        (Self { commands: commands_tx }, events_rx)
    }

    /// Queue a message for the peer
    pub fn send(&self, message: SignalingMessage) -> AckHandle {
        let (ack, rx) = oneshot::channel();
        // A closed channel drops `ack`, resolving the handle with `Closed`
        let _ = self.commands.send(Command::Send { message, ack });
        AckHandle { rx }
    }

    /// Stop the channel; unacknowledged sends fail with `Closed`
    pub fn close(&self) {
        let _ = self.commands.send(Command::Close);
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

impl SignalSink for SignalingChannel {
    fn send(&self, message: SignalingMessage) -> CallResult<()> {
        if self.is_closed() {
            return Err(CallError::SessionClosed);
        }
        let kind = message.type_name();
        let handle = SignalingChannel::send(self, message);
        tokio::spawn(async move {
            match handle.await {
                Ok(ack) => debug!("Peer acknowledged {} #{}", kind, ack.seq),
                Err(e) => warn!("Signaling {} was not delivered: {}", kind, e),
            }
        });
        Ok(())
    }
}

/// Written at least once, waiting for the peer's ack
struct Outgoing {
    seq: u64,
    message: SignalingMessage,
    ack: oneshot::Sender<Result<Ack, ChannelError>>,
}

/// Sent while disconnected; not numbered yet
struct Queued {
    message: SignalingMessage,
    ack: oneshot::Sender<Result<Ack, ChannelError>>,
}

enum Step {
    Frame(Option<Result<Frame, ChannelError>>),
    Command(Option<Command>),
    Reconnect,
}

struct ChannelWorker {
    session: RoomSession,
    connector: Arc<dyn RelayConnector>,
    config: ChannelConfig,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    next_seq: u64,
    queued: VecDeque<Queued>,
    outbox: VecDeque<Outgoing>,
    last_delivered: u64,
    /// Arrivals ahead of `last_delivered + 1`
    held: BTreeMap<u64, SignalingMessage>,
    connected_once: bool,
    pending_delivered: bool,
    /// The current link has carried at least one inbound frame
    link_healthy: bool,
}

impl ChannelWorker {
    async fn run(mut self) {
        let mut link: Option<RelayConnection> = None;
        let mut attempt: u32 = 0;
        let reconnect_timer = sleep(Duration::ZERO);
        tokio::pin!(reconnect_timer);

        loop {
            let step = match link.as_mut() {
                Some(conn) => tokio::select! {
                    frame = conn.stream.next() => Step::Frame(frame),
                    command = self.commands.recv() => Step::Command(command),
                },
                None => tokio::select! {
                    _ = &mut reconnect_timer => Step::Reconnect,
                    command = self.commands.recv() => Step::Command(command),
                },
            };

            match step {
                Step::Reconnect => match self.connect().await {
                    Ok(conn) => {
                        link = Some(conn);
                        self.on_connected();
                        let delivered = match link.as_mut() {
                            Some(conn) => self.deliver_pending(conn).await,
                            None => Ok(()),
                        };
                        if let Err(e) = delivered {
                            warn!("Relay write failed after connect: {}", e);
                            link = None;
                            if !self.link_lost(&mut attempt, reconnect_timer.as_mut()) {
                                return self.shut_down(ChannelError::PermanentlyLost);
                            }
                        }
                    }
                    Err(e) => {
                        warn!(
                            "Relay connect for room {} failed: {}",
                            self.session.room_id(),
                            e
                        );
                        if !self.schedule_reconnect(&mut attempt, reconnect_timer.as_mut()) {
                            return self.shut_down(ChannelError::PermanentlyLost);
                        }
                    }
                },
                Step::Command(None) | Step::Command(Some(Command::Close)) => {
                    if let Some(mut conn) = link.take() {
                        let _ = conn.sink.close().await;
                    }
                    info!("Signaling channel for room {} closed", self.session.room_id());
                    return self.shut_down(ChannelError::Closed);
                }
                Step::Command(Some(Command::Send { message, ack })) => {
                    let written = match link.as_mut() {
                        Some(conn) => {
                            let frame = self.number(message, ack);
                            debug!("Sending {:?} #{}", frame.kind, frame.seq);
                            conn.sink.send(frame).await
                        }
                        None => {
                            debug!("Relay down, queued {}", message.type_name());
                            self.queued.push_back(Queued { message, ack });
                            self.enforce_queue_bound();
                            Ok(())
                        }
                    };
                    if let Err(e) = written {
                        warn!("Relay write failed: {}", e);
                        link = None;
                        if !self.link_lost(&mut attempt, reconnect_timer.as_mut()) {
                            return self.shut_down(ChannelError::PermanentlyLost);
                        }
                    }
                }
                Step::Frame(Some(Ok(frame))) => {
                    if !self.link_healthy {
                        self.link_healthy = true;
                        attempt = 0;
                    }
                    let handled = match link.as_mut() {
                        Some(conn) => self.on_frame(frame, conn).await,
                        None => Ok(()),
                    };
                    if let Err(e) = handled {
                        warn!("Relay write failed: {}", e);
                        link = None;
                        if !self.link_lost(&mut attempt, reconnect_timer.as_mut()) {
                            return self.shut_down(ChannelError::PermanentlyLost);
                        }
                    }
                }
                Step::Frame(Some(Err(ChannelError::Protocol(detail)))) => {
                    warn!("Undecodable relay frame: {}", detail);
                    self.emit(ChannelEvent::Connection(ConnectionEvent::ProtocolError(detail)));
                }
                Step::Frame(Some(Err(e))) => {
                    warn!("Relay connection dropped: {}", e);
                    link = None;
                    if !self.link_lost(&mut attempt, reconnect_timer.as_mut()) {
                        return self.shut_down(ChannelError::PermanentlyLost);
                    }
                }
                Step::Frame(None) => {
                    warn!("Relay connection closed");
                    link = None;
                    if !self.link_lost(&mut attempt, reconnect_timer.as_mut()) {
                        return self.shut_down(ChannelError::PermanentlyLost);
                    }
                }
            }
        }
    }

    /// Connect, register, then replay the outbox followed by sends queued while down
    async fn connect(&mut self) -> Result<RelayConnection, ChannelError> {
        let connect_timeout = Duration::from_millis(self.config.connect_timeout_ms);
        let mut conn = timeout(connect_timeout, self.connector.connect(&self.session))
            .await
            .map_err(|_| ChannelError::Transport("relay connect timed out".to_string()))??;
        self.link_healthy = false;

        while let Some(Queued { message, ack }) = self.queued.pop_front() {
            self.number(message, ack);
        }

        let register = RegisterPayload {
            room_id: self.session.room_id().to_string(),
            client_id: self.session.client_id().to_string(),
            token: self.session.token().map(str::to_string),
            last_seq: self.last_delivered,
        };
        conn.sink.feed(Frame::register(&register)).await?;

        for outgoing in &self.outbox {
            conn.sink.feed(Frame::message(outgoing.seq, &outgoing.message)).await?;
        }
        conn.sink.flush().await?;

        if !self.outbox.is_empty() {
            debug!("Wrote {} unacknowledged messages", self.outbox.len());
        }
        Ok(conn)
    }

    /// Assign the next sequence marker and keep the message until it is acknowledged
    fn number(&mut self, message: SignalingMessage, ack: oneshot::Sender<Result<Ack, ChannelError>>) -> Frame {
        let seq = self.next_seq;
        self.next_seq += 1;
        let frame = Frame::message(seq, &message);
        self.outbox.push_back(Outgoing { seq, message, ack });
        frame
    }

    fn on_connected(&mut self) {
        if self.connected_once {
            info!("Signaling channel for room {} reconnected", self.session.room_id());
            self.emit(ChannelEvent::Connection(ConnectionEvent::Reconnected));
        } else {
            self.connected_once = true;
            info!("Signaling channel for room {} connected", self.session.room_id());
            self.emit(ChannelEvent::Connection(ConnectionEvent::Connected));
        }
    }

    /// Deliver messages the room service queued before we joined, ahead of live traffic
    async fn deliver_pending(&mut self, conn: &mut RelayConnection) -> Result<(), ChannelError> {
        if self.pending_delivered {
            return Ok(());
        }
        self.pending_delivered = true;

        let pending = self.session.pending_messages().to_vec();
        if pending.is_empty() {
            return Ok(());
        }
        for frame in pending {
            match frame.into_message() {
                Ok((seq, message)) => self.accept(seq, message),
                Err(e) => self.emit(ChannelEvent::Connection(ConnectionEvent::ProtocolError(e.to_string()))),
            }
        }
        conn.sink.send(Frame::ack(self.last_delivered)).await
    }

    /// Report the drop and arm a reconnect; false once the budget is spent.
    /// The budget only starts over after a link has carried inbound traffic.
    fn link_lost(&mut self, attempt: &mut u32, timer: Pin<&mut tokio::time::Sleep>) -> bool {
        self.emit(ChannelEvent::Connection(ConnectionEvent::Disconnected));
        self.schedule_reconnect(attempt, timer)
    }

    fn schedule_reconnect(&mut self, attempt: &mut u32, timer: Pin<&mut tokio::time::Sleep>) -> bool {
        match self.config.reconnect.delay(*attempt) {
            Some(delay) => {
                *attempt += 1;
                metrics::counter!(SIGNALING_RECONNECTS).increment(1);
                debug!("Relay reconnect attempt {} in {:?}", attempt, delay);
                timer.reset(Instant::now() + delay);
                true
            }
            None => false,
        }
    }

    async fn on_frame(&mut self, frame: Frame, conn: &mut RelayConnection) -> Result<(), ChannelError> {
        match frame.kind {
            FrameKind::Ack => {
                self.on_ack(frame.seq);
                Ok(())
            }
            _ if !frame.is_message() => {
                debug!("Ignoring {:?} frame from relay", frame.kind);
                Ok(())
            }
            _ => match frame.into_message() {
                Ok((seq, message)) => {
                    if seq <= self.last_delivered {
                        metrics::counter!(SIGNALING_DUPLICATES_DROPPED).increment(1);
                        debug!("Dropping duplicate #{} (delivered up to #{})", seq, self.last_delivered);
                    } else {
                        self.accept(seq, message);
                    }
                    conn.sink.send(Frame::ack(self.last_delivered)).await
                }
                Err(e) => {
                    warn!("Undecodable relay frame: {}", e);
                    self.emit(ChannelEvent::Connection(ConnectionEvent::ProtocolError(e.to_string())));
                    Ok(())
                }
            },
        }
    }

    /// Deliver `seq` if it is next, otherwise hold it until the gap closes
    fn accept(&mut self, seq: u64, message: SignalingMessage) {
        if seq <= self.last_delivered {
            return;
        }
        if seq > self.last_delivered + 1 {
            debug!("Holding #{} until #{} arrives", seq, self.last_delivered + 1);
            self.held.insert(seq, message);
            if self.held.len() > self.config.queue_depth {
                self.emit(ChannelEvent::Connection(ConnectionEvent::ProtocolError(format!(
                    "{} messages held behind missing #{}",
                    self.held.len(),
                    self.last_delivered + 1
                ))));
            }
            return;
        }

        self.deliver(seq, message);
        while let Some(next) = self.held.remove(&(self.last_delivered + 1)) {
            self.deliver(self.last_delivered + 1, next);
        }
    }

    fn deliver(&mut self, seq: u64, message: SignalingMessage) {
        debug!("Delivering {} #{}", message.type_name(), seq);
        self.last_delivered = seq;
        self.emit(ChannelEvent::Message { seq, message });
    }

    fn on_ack(&mut self, seq: u64) {
        while self.outbox.front().map_or(false, |o| o.seq <= seq) {
            if let Some(outgoing) = self.outbox.pop_front() {
                let _ = outgoing.ack.send(Ok(Ack { seq: outgoing.seq }));
            }
        }
    }

    fn enforce_queue_bound(&mut self) {
        while self.queued.len() > self.config.queue_depth {
            if let Some(oldest) = self.queued.pop_front() {
                metrics::counter!(SIGNALING_BACKPRESSURE).increment(1);
                warn!(
                    "Send queue full ({}), dropping oldest {}",
                    self.config.queue_depth,
                    oldest.message.type_name()
                );
                let _ = oldest.ack.send(Err(ChannelError::Backpressure));
            }
        }
    }

    fn emit(&self, event: ChannelEvent) {
        // The session may already be gone during teardown
        let _ = self.events.send(event);
    }

    fn shut_down(mut self, reason: ChannelError) {
        if reason == ChannelError::PermanentlyLost {
            warn!(
                "Signaling channel for room {} permanently lost",
                self.session.room_id()
            );
            self.emit(ChannelEvent::Connection(ConnectionEvent::PermanentlyLost));
        }
        for outgoing in self.outbox.drain(..) {
            let _ = outgoing.ack.send(Err(reason.clone()));
        }
        for queued in self.queued.drain(..) {
            let _ = queued.ack.send(Err(reason.clone()));
        }
    }
}
