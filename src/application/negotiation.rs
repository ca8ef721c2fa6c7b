//! Offer/answer negotiation
//!
//! Drives one offer/answer cycle at a time against the media engine and
//! stages candidates through [`CandidateBuffer`]. The initiator offers as
//! soon as the channel opens; the joiner answers. Simultaneous offers
//! (glare) resolve in the initiator's favour.

use crate::application::candidate_buffer::CandidateBuffer;
use crate::domain::media::{MediaEngine, SessionDescription};
use crate::domain::session::PeerRole;
use crate::domain::shared::error::CallError;
use crate::domain::shared::result::Result;
use crate::domain::signaling::{IceCandidate, SignalSink, SignalingMessage};
use crate::infrastructure::metrics::{NEGOTIATION_CYCLES, NEGOTIATION_GLARE};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationPhase {
    AwaitingLocalDescription,
    LocalDescriptionSet,
    AwaitingRemoteDescription,
    RemoteDescriptionSet,
    Stable,
}

/// What a handled message means for the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Continue,
    /// The cycle in flight completed
    Stable,
    /// The peer hung up
    Bye,
}

pub struct NegotiationEngine {
    role: PeerRole,
    media: Arc<dyn MediaEngine>,
    signals: Arc<dyn SignalSink>,
    candidates: CandidateBuffer,
    phase: NegotiationPhase,
    /// A local offer is out and unanswered
    making_offer: bool,
    renegotiation_pending: bool,
    cycles: u64,
}

impl NegotiationEngine {
    pub fn new(role: PeerRole, media: Arc<dyn MediaEngine>, signals: Arc<dyn SignalSink>) -> Self {
        Self {
            role,
            media,
            signals,
            candidates: CandidateBuffer::new(),
            phase: NegotiationPhase::AwaitingLocalDescription,
            making_offer: false,
            renegotiation_pending: false,
            cycles: 0,
        }
    }

    pub fn phase(&self) -> NegotiationPhase {
        self.phase
    }

    pub fn is_stable(&self) -> bool {
        self.phase == NegotiationPhase::Stable
    }

    pub fn cycles_completed(&self) -> u64 {
        self.cycles
    }

    pub fn candidates(&self) -> &CandidateBuffer {
        &self.candidates
    }

    /// Begin the first cycle once the channel is open
    pub async fn start(&mut self) -> Result<()> {
        match self.role {
            PeerRole::Initiator => self.send_offer().await,
            PeerRole::Joiner => {
                debug!("Waiting for the initiator's offer");
                self.phase = NegotiationPhase::AwaitingRemoteDescription;
                Ok(())
            }
        }
    }

    /// Start a new cycle, or defer it until the one in flight completes
    pub async fn renegotiate(&mut self) -> Result<()> {
        if !self.is_stable() {
            debug!("Cycle in flight ({:?}), deferring renegotiation", self.phase);
            self.renegotiation_pending = true;
            return Ok(());
        }
        info!("Starting renegotiation");
        self.send_offer().await
    }

    pub async fn handle_message(&mut self, message: SignalingMessage) -> Result<Progress> {
        match message {
            SignalingMessage::Offer { sdp } => self.on_remote_offer(sdp).await,
            SignalingMessage::Answer { sdp } => self.on_remote_answer(sdp).await,
            SignalingMessage::Candidate(candidate) => {
                if let Some(candidate) = self.candidates.enqueue_remote(candidate) {
                    self.apply_remote_candidate(candidate).await;
                }
                Ok(Progress::Continue)
            }
            SignalingMessage::Bye => {
                info!("Peer sent bye");
                Ok(Progress::Bye)
            }
        }
    }

    /// Forward a locally gathered candidate to the peer
    pub fn on_local_candidate(&mut self, candidate: IceCandidate) -> Result<()> {
        let candidate = self.candidates.enqueue_local(candidate);
        self.signals.send(SignalingMessage::Candidate(candidate))
    }

    /// Drop staged candidates; the engine is not reused afterwards
    pub fn clear(&mut self) {
        self.candidates.clear();
        self.renegotiation_pending = false;
        self.making_offer = false;
    }

    async fn send_offer(&mut self) -> Result<()> {
        self.phase = NegotiationPhase::AwaitingLocalDescription;
        let sdp = self.media.create_offer().await?;
        self.media
            .set_local_description(SessionDescription::offer(sdp.clone()))
            .await?;
        self.phase = NegotiationPhase::LocalDescriptionSet;
        self.making_offer = true;

        self.candidates.on_local_description_set();
        self.signals.send(SignalingMessage::Offer { sdp })?;
        self.phase = NegotiationPhase::AwaitingRemoteDescription;
        debug!("Offer sent, awaiting answer");
        Ok(())
    }

    async fn on_remote_offer(&mut self, sdp: String) -> Result<Progress> {
        if self.making_offer {
            metrics::counter!(NEGOTIATION_GLARE).increment(1);
            warn!("{} while acting as {:?}", CallError::GlareDetected, self.role);
            match self.role {
                PeerRole::Initiator => {
                    debug!("Keeping our offer, ignoring the joiner's");
                    return Ok(Progress::Continue);
                }
                PeerRole::Joiner => {
                    debug!("Discarding our offer in favour of the initiator's");
                    self.making_offer = false;
                }
            }
        }

        self.phase = NegotiationPhase::AwaitingRemoteDescription;
        self.media
            .set_remote_description(SessionDescription::offer(sdp))
            .await?;
        self.phase = NegotiationPhase::RemoteDescriptionSet;
        self.flush_remote_candidates().await;

        let answer = self.media.create_answer().await?;
        self.media
            .set_local_description(SessionDescription::answer(answer.clone()))
            .await?;
        self.candidates.on_local_description_set();
        self.signals.send(SignalingMessage::Answer { sdp: answer })?;

        self.complete_cycle().await
    }

    async fn on_remote_answer(&mut self, sdp: String) -> Result<Progress> {
        if !self.making_offer {
            return Err(CallError::ProtocolViolation(format!(
                "answer received with no offer in flight ({:?})",
                self.phase
            )));
        }

        self.media
            .set_remote_description(SessionDescription::answer(sdp))
            .await?;
        self.making_offer = false;
        self.phase = NegotiationPhase::RemoteDescriptionSet;
        self.flush_remote_candidates().await;

        self.complete_cycle().await
    }

    async fn complete_cycle(&mut self) -> Result<Progress> {
        self.phase = NegotiationPhase::Stable;
        self.cycles += 1;
        metrics::counter!(NEGOTIATION_CYCLES).increment(1);
        info!("Negotiation stable (cycle {})", self.cycles);

        if self.renegotiation_pending {
            self.renegotiation_pending = false;
            info!("Starting deferred renegotiation");
            self.send_offer().await?;
        }
        Ok(Progress::Stable)
    }

    async fn flush_remote_candidates(&mut self) {
        for candidate in self.candidates.on_remote_description_set() {
            self.apply_remote_candidate(candidate).await;
        }
    }

    async fn apply_remote_candidate(&self, candidate: IceCandidate) {
        if let Err(e) = self.media.add_ice_candidate(candidate).await {
            warn!("Media engine rejected remote candidate: {}", e);
        }
    }
}
