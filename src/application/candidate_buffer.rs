//! Candidate staging
//!
//! Remote connectivity candidates may arrive before the description they
//! belong to has been applied. They are held back until it is set, then
//! released in arrival order. The end-of-candidates marker is treated like
//! any other entry so it always follows the candidates that preceded it.
//! Local candidates are never gated: the peer orders them against its own
//! descriptions.

use crate::domain::signaling::IceCandidate;
use chrono::{DateTime, Utc};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Gathered by the local media engine, bound for the peer
    Local,
    /// Received from the peer, bound for the local media engine
    Remote,
}

#[derive(Debug, Clone)]
pub struct BufferedCandidate {
    pub candidate: IceCandidate,
    pub direction: Direction,
    pub enqueued_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct CandidateBuffer {
    local_ready: bool,
    remote_ready: bool,
    held: Vec<BufferedCandidate>,
}

impl CandidateBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Local candidates go to the peer as soon as they are gathered
    pub fn enqueue_local(&mut self, candidate: IceCandidate) -> IceCandidate {
        if !self.local_ready {
            debug!("Forwarding local candidate ahead of our description");
        }
        candidate
    }

    /// Returns the candidate when it may go to the media engine right away
    pub fn enqueue_remote(&mut self, candidate: IceCandidate) -> Option<IceCandidate> {
        if self.remote_ready {
            return Some(candidate);
        }

        if candidate.is_end_of_candidates() {
            debug!("Holding end-of-candidates marker");
        } else {
            debug!("Holding remote candidate until the remote description is set");
        }
        self.held.push(BufferedCandidate {
            candidate,
            direction: Direction::Remote,
            enqueued_at: Utc::now(),
        });
        None
    }

    pub fn on_local_description_set(&mut self) {
        self.local_ready = true;
    }

    /// Remote description applied; returns held remote candidates in order
    pub fn on_remote_description_set(&mut self) -> Vec<IceCandidate> {
        self.remote_ready = true;
        self.release(Direction::Remote)
    }

    pub fn held_count(&self, direction: Direction) -> usize {
        self.held.iter().filter(|c| c.direction == direction).count()
    }

    pub fn is_ready(&self, direction: Direction) -> bool {
        match direction {
            Direction::Local => self.local_ready,
            Direction::Remote => self.remote_ready,
        }
    }

    /// Drop everything; used when the session closes
    pub fn clear(&mut self) {
        if !self.held.is_empty() {
            debug!("Discarding {} held candidates", self.held.len());
        }
        self.held.clear();
        self.local_ready = false;
        self.remote_ready = false;
    }

    fn release(&mut self, direction: Direction) -> Vec<IceCandidate> {
        let (released, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.held)
            .into_iter()
            .partition(|c| c.direction == direction);
        self.held = kept;

        if let Some(oldest) = released.first() {
            debug!(
                "Releasing {} {:?} candidates held since {}",
                released.len(),
                direction,
                oldest.enqueued_at
            );
        }
        released.into_iter().map(|c| c.candidate).collect()
    }
}
