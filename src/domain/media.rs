//! Media engine port
//!
//! The engine that encodes/decodes audio and video lives outside this crate.
//! The session drives it through [`MediaEngine`] and receives its
//! asynchronous notifications as [`MediaEvent`]s on the session's own queue.

use crate::domain::session::IceServer;
use crate::domain::shared::result::Result;
use crate::domain::signaling::{IceCandidate, SdpKind};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Session description handed to or produced by the media engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Notification raised by the media engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    /// A local ICE candidate was gathered (empty candidate = gathering done)
    LocalCandidate(IceCandidate),
    /// Local media changed and a new offer/answer cycle is required
    RenegotiationNeeded,
}

pub type MediaEventSender = mpsc::UnboundedSender<MediaEvent>;

/// Capability the session drives to produce and apply descriptions
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Configure connectivity servers and start gathering; events flow to `events`
    async fn start(&self, ice_servers: &[IceServer], events: MediaEventSender) -> Result<()>;

    async fn create_offer(&self) -> Result<String>;

    async fn create_answer(&self) -> Result<String>;

    async fn set_local_description(&self, description: SessionDescription) -> Result<()>;

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Release media resources
    async fn close(&self);
}
