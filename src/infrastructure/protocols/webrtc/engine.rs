//! WebRTC media engine
//!
//! Adapts a webrtc-rs peer connection to the session's [`MediaEngine`] port.
//! Gathered candidates and negotiation-needed callbacks are pushed into the
//! session's media event queue.

use crate::domain::media::{MediaEngine, MediaEvent, MediaEventSender, SessionDescription};
use crate::domain::session::IceServer;
use crate::domain::shared::error::CallError;
use crate::domain::shared::result::Result;
use crate::domain::signaling::{IceCandidate, SdpKind};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine as CodecRegistry;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;

fn media_error(error: webrtc::Error) -> CallError {
    CallError::MediaEngine(error.to_string())
}

fn to_rtc_ice_server(server: &IceServer) -> RTCIceServer {
    RTCIceServer {
        urls: server.urls.clone(),
        username: server.username.clone().unwrap_or_default(),
        credential: server.credential.clone().unwrap_or_default(),
        ..Default::default()
    }
}

fn to_rtc_description(description: SessionDescription) -> Result<RTCSessionDescription> {
    match description.kind {
        SdpKind::Offer => RTCSessionDescription::offer(description.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(description.sdp),
    }
    .map_err(media_error)
}

fn from_rtc_candidate(candidate: Option<RTCIceCandidate>) -> Option<IceCandidate> {
    let Some(candidate) = candidate else {
        return Some(IceCandidate::end_of_candidates());
    };
    match candidate.to_json() {
        Ok(init) => Some(IceCandidate {
            sdp_mid: init.sdp_mid,
            sdp_m_line_index: init.sdp_mline_index,
            candidate: init.candidate,
        }),
        Err(e) => {
            warn!("Could not serialize local candidate: {}", e);
            None
        }
    }
}

/// Audio-only peer connection built with the default codecs and interceptors
#[derive(Default)]
pub struct WebRtcMediaEngine {
    peer: Mutex<Option<Arc<RTCPeerConnection>>>,
}

impl WebRtcMediaEngine {
    pub fn new() -> Self {
        Self::default()
    }

    async fn peer(&self) -> Result<Arc<RTCPeerConnection>> {
        self.peer
            .lock()
            .await
            .clone()
            .ok_or_else(|| CallError::MediaEngine("peer connection not started".to_string()))
    }
}

#[async_trait]
impl MediaEngine for WebRtcMediaEngine {
    async fn start(&self, ice_servers: &[IceServer], events: MediaEventSender) -> Result<()> {
        let mut codecs = CodecRegistry::default();
        codecs.register_default_codecs().map_err(media_error)?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut codecs).map_err(media_error)?;

        let api = APIBuilder::new()
            .with_media_engine(codecs)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: ice_servers.iter().map(to_rtc_ice_server).collect(),
            ..Default::default()
        };
        let peer = Arc::new(api.new_peer_connection(config).await.map_err(media_error)?);
        peer.add_transceiver_from_kind(RTPCodecType::Audio, None)
            .await
            .map_err(media_error)?;

        let candidates = events.clone();
        peer.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let events = candidates.clone();
            Box::pin(async move {
                if let Some(candidate) = from_rtc_candidate(candidate) {
                    let _ = events.send(MediaEvent::LocalCandidate(candidate));
                }
            })
        }));

        peer.on_negotiation_needed(Box::new(move || {
            let events = events.clone();
            Box::pin(async move {
                let _ = events.send(MediaEvent::RenegotiationNeeded);
            })
        }));

        peer.on_peer_connection_state_change(Box::new(|state: RTCPeerConnectionState| {
            info!("Peer connection state: {}", state);
            Box::pin(async {})
        }));

        info!("Media engine started with {} connectivity servers", ice_servers.len());
        *self.peer.lock().await = Some(peer);
        Ok(())
    }

    async fn create_offer(&self) -> Result<String> {
        let offer = self.peer().await?.create_offer(None).await.map_err(media_error)?;
        Ok(offer.sdp)
    }

    async fn create_answer(&self) -> Result<String> {
        let answer = self.peer().await?.create_answer(None).await.map_err(media_error)?;
        Ok(answer.sdp)
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        let peer = self.peer().await?;
        peer.set_local_description(to_rtc_description(description)?)
            .await
            .map_err(media_error)
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        let peer = self.peer().await?;
        if description.kind == SdpKind::Offer && peer.signaling_state() == RTCSignalingState::HaveLocalOffer {
            debug!("Rolling back local offer before applying the remote one");
            let mut rollback = RTCSessionDescription::default();
            rollback.sdp_type = RTCSdpType::Rollback;
            peer.set_local_description(rollback).await.map_err(media_error)?;
        }
        peer.set_remote_description(to_rtc_description(description)?)
            .await
            .map_err(media_error)
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_m_line_index,
            ..Default::default()
        };
        self.peer()
            .await?
            .add_ice_candidate(init)
            .await
            .map_err(media_error)
    }

    async fn close(&self) {
        if let Some(peer) = self.peer.lock().await.take() {
            if let Err(e) = peer.close().await {
                warn!("Error closing peer connection: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ice_server_mapping() {
        let server = IceServer::new("turn:turn.example.org:3478").with_credentials("user", "secret");
        let rtc = to_rtc_ice_server(&server);

        assert_eq!(rtc.urls, vec!["turn:turn.example.org:3478".to_string()]);
        assert_eq!(rtc.username, "user");
        assert_eq!(rtc.credential, "secret");

        let rtc = to_rtc_ice_server(&IceServer::new("stun:stun.example.org"));
        assert!(rtc.username.is_empty());
    }

    #[test]
    fn test_gathering_complete_maps_to_end_marker() {
        assert_eq!(from_rtc_candidate(None), Some(IceCandidate::end_of_candidates()));
    }

    #[tokio::test]
    async fn test_operations_before_start_fail() {
        let engine = WebRtcMediaEngine::new();

        assert!(matches!(engine.create_offer().await, Err(CallError::MediaEngine(_))));
        assert!(matches!(
            engine.add_ice_candidate(IceCandidate::end_of_candidates()).await,
            Err(CallError::MediaEngine(_))
        ));
        // Closing an idle engine is a no-op
        engine.close().await;
    }
}
