//! In-process relay
//!
//! Pairs the two clients of a room without any network, buffering frames for
//! a client that is currently disconnected. Fault injection (dropped links,
//! refused connects, lost frames) makes it the relay used to exercise
//! reconnect and replay behaviour.

use super::connector::{RelayConnection, RelayConnector};
use super::error::ChannelError;
use crate::domain::session::RoomSession;
use crate::domain::signaling::{Frame, FrameKind};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

type Inbound = mpsc::UnboundedSender<Result<Frame, ChannelError>>;

struct Link {
    id: u64,
    tx: Inbound,
}

#[derive(Default)]
struct RelayState {
    /// room id -> client ids, in join order
    rooms: HashMap<String, Vec<String>>,
    links: HashMap<String, Link>,
    /// Frames addressed to a client while it had no link
    backlog: HashMap<String, Vec<Frame>>,
    /// Frames sent before the sender's peer ever joined, keyed by room
    unclaimed: HashMap<String, Vec<(String, Frame)>>,
    offline: HashSet<String>,
    refused_connects: HashMap<String, u32>,
    connects: HashMap<String, u32>,
    /// Frames each client pushed into the relay (register frames included)
    routed: HashMap<String, Vec<Frame>>,
    discard_frames: bool,
    next_link_id: u64,
}

impl RelayState {
    fn peer_of(&self, room_id: &str, client_id: &str) -> Option<String> {
        self.rooms
            .get(room_id)
            .and_then(|clients| clients.iter().find(|c| c.as_str() != client_id).cloned())
    }

    fn deliver(&mut self, to: &str, frame: Frame) {
        match self.links.get(to) {
            Some(link) if link.tx.send(Ok(frame.clone())).is_ok() => {}
            _ => self.backlog.entry(to.to_string()).or_default().push(frame),
        }
    }
}

#[derive(Clone, Default)]
pub struct MemoryRelay {
    state: Arc<Mutex<RelayState>>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    async fn route(&self, room_id: &str, from: &str, link_id: u64, frame: Frame) -> Result<(), ChannelError> {
        let mut state = self.state.lock().await;

        match state.links.get(from) {
            Some(link) if link.id == link_id => {}
            _ => return Err(ChannelError::Transport("relay link dropped".to_string())),
        }

        state.routed.entry(from.to_string()).or_default().push(frame.clone());

        if frame.kind == FrameKind::Register || state.discard_frames {
            return Ok(());
        }

        match state.peer_of(room_id, from) {
            Some(peer) => state.deliver(&peer, frame),
            None => {
                debug!("No peer in room {} yet, holding {:?} frame", room_id, frame.kind);
                state
                    .unclaimed
                    .entry(room_id.to_string())
                    .or_default()
                    .push((from.to_string(), frame));
            }
        }
        Ok(())
    }

    /// Drop the client's current link; its stream ends and writes start failing
    pub async fn disconnect(&self, client_id: &str) {
        self.state.lock().await.links.remove(client_id);
    }

    /// While offline, the client's connects are refused and it has no link
    pub async fn set_offline(&self, client_id: &str, offline: bool) {
        let mut state = self.state.lock().await;
        if offline {
            state.offline.insert(client_id.to_string());
            state.links.remove(client_id);
        } else {
            state.offline.remove(client_id);
        }
    }

    /// Refuse the client's next `count` connect attempts
    pub async fn refuse_connects(&self, client_id: &str, count: u32) {
        self.state
            .lock()
            .await
            .refused_connects
            .insert(client_id.to_string(), count);
    }

    /// Silently discard every routed frame (lost in flight)
    pub async fn set_discard_frames(&self, discard: bool) {
        self.state.lock().await.discard_frames = discard;
    }

    /// Push a raw frame to a client as if its peer had sent it
    pub async fn inject(&self, client_id: &str, frame: Frame) {
        self.state.lock().await.deliver(client_id, frame);
    }

    /// Fail the client's current link with `error` without closing it
    pub async fn inject_error(&self, client_id: &str, error: ChannelError) {
        if let Some(link) = self.state.lock().await.links.get(client_id) {
            let _ = link.tx.send(Err(error));
        }
    }

    pub async fn is_connected(&self, client_id: &str) -> bool {
        self.state.lock().await.links.contains_key(client_id)
    }

    pub async fn connect_count(&self, client_id: &str) -> u32 {
        self.state.lock().await.connects.get(client_id).copied().unwrap_or(0)
    }

    pub async fn routed_frames(&self, client_id: &str) -> Vec<Frame> {
        self.state
            .lock()
            .await
            .routed
            .get(client_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl RelayConnector for MemoryRelay {
    async fn connect(&self, session: &RoomSession) -> Result<RelayConnection, ChannelError> {
        let room_id = session.room_id().to_string();
        let client_id = session.client_id().to_string();

        let mut state = self.state.lock().await;
        *state.connects.entry(client_id.clone()).or_default() += 1;

        if state.offline.contains(&client_id) {
            return Err(ChannelError::Transport(format!("{} is offline", client_id)));
        }
        if let Some(remaining) = state.refused_connects.get_mut(&client_id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ChannelError::Transport("relay refused connection".to_string()));
            }
        }

        let state = &mut *state;
        let members = state.rooms.entry(room_id.clone()).or_default();
        if !members.contains(&client_id) {
            members.push(client_id.clone());
            let unclaimed = state.unclaimed.remove(&room_id).unwrap_or_default();
            let (theirs, ours): (Vec<_>, Vec<_>) =
                unclaimed.into_iter().partition(|(from, _)| from != &client_id);
            if !ours.is_empty() {
                state.unclaimed.insert(room_id.clone(), ours);
            }
            let backlog = state.backlog.entry(client_id.clone()).or_default();
            backlog.extend(theirs.into_iter().map(|(_, frame)| frame));
        }

        state.next_link_id += 1;
        let link_id = state.next_link_id;
        let (tx, rx) = mpsc::unbounded_channel();
        for frame in state.backlog.remove(&client_id).unwrap_or_default() {
            let _ = tx.send(Ok(frame));
        }
        state.links.insert(client_id.clone(), Link { id: link_id, tx });
        drop(state);

        debug!("Relay link {} opened for {} in room {}", link_id, client_id, room_id);

        let relay = self.clone();
        let sink = futures::sink::unfold(
            (relay, room_id, client_id, link_id),
            |(relay, room_id, client_id, link_id), frame: Frame| async move {
                relay.route(&room_id, &client_id, link_id, frame).await?;
                Ok::<_, ChannelError>((relay, room_id, client_id, link_id))
            },
        );
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });

        Ok(RelayConnection {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::session::PeerRole;
    use crate::domain::shared::value_objects::{ClientId, RoomId};
    use crate::domain::signaling::SignalingMessage;
    use futures::{SinkExt, StreamExt};

    fn session(client: &str) -> RoomSession {
        RoomSession::new(RoomId::parse("r1").unwrap(), ClientId::new(client), PeerRole::Initiator)
    }

    #[tokio::test]
    async fn test_routes_between_room_members() {
        let relay = MemoryRelay::new();
        let mut alice = relay.connect(&session("alice")).await.unwrap();
        let mut bob = relay.connect(&session("bob")).await.unwrap();

        let frame = Frame::message(1, &SignalingMessage::Bye);
        alice.sink.send(frame.clone()).await.unwrap();

        assert_eq!(bob.stream.next().await.unwrap().unwrap(), frame);
    }

    #[tokio::test]
    async fn test_backlog_for_absent_peer() {
        let relay = MemoryRelay::new();
        let mut alice = relay.connect(&session("alice")).await.unwrap();
        let mut bob = relay.connect(&session("bob")).await.unwrap();
        relay.disconnect("bob").await;
        assert!(bob.stream.next().await.is_none());

        let frame = Frame::message(1, &SignalingMessage::Offer { sdp: "v=0".into() });
        alice.sink.send(frame.clone()).await.unwrap();

        let mut bob = relay.connect(&session("bob")).await.unwrap();
        assert_eq!(bob.stream.next().await.unwrap().unwrap(), frame);
    }

    #[tokio::test]
    async fn test_frames_wait_for_late_joiner() {
        let relay = MemoryRelay::new();
        let mut alice = relay.connect(&session("alice")).await.unwrap();

        let frame = Frame::message(1, &SignalingMessage::Offer { sdp: "v=0".into() });
        alice.sink.send(frame.clone()).await.unwrap();

        let mut bob = relay.connect(&session("bob")).await.unwrap();
        assert_eq!(bob.stream.next().await.unwrap().unwrap(), frame);
    }

    #[tokio::test]
    async fn test_refused_and_offline_connects() {
        let relay = MemoryRelay::new();
        relay.refuse_connects("alice", 1).await;
        assert!(relay.connect(&session("alice")).await.is_err());
        assert!(relay.connect(&session("alice")).await.is_ok());

        relay.set_offline("alice", true).await;
        assert!(!relay.is_connected("alice").await);
        assert!(relay.connect(&session("alice")).await.is_err());
        assert_eq!(relay.connect_count("alice").await, 3);
    }

    #[tokio::test]
    async fn test_stale_link_rejects_writes() {
        let relay = MemoryRelay::new();
        let mut old = relay.connect(&session("alice")).await.unwrap();
        let _new = relay.connect(&session("alice")).await.unwrap();

        let result = old.sink.send(Frame::ack(1)).await;
        assert!(matches!(result, Err(ChannelError::Transport(_))));
    }
}
