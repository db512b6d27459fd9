//! [`PeerConnection`] backed by the `webrtc` crate.

use std::sync::Arc;

use async_trait::async_trait;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{API, APIBuilder};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;

use super::{LocalCandidateSink, PeerConnection};
use crate::error::PeerError;
use crate::protocol::{CandidateInit, IceCandidateRecord, SdpType, SessionDescriptor};

#[derive(Debug, Clone)]
pub struct RtcPeerConfig {
    pub ice_servers: Vec<String>,
    /// Trickle target stamped on locally gathered candidates.
    pub target: u32,
    /// Adds a send-only video transceiver before negotiation starts.
    pub send_video: bool,
}

impl Default for RtcPeerConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            target: 0,
            send_video: true,
        }
    }
}

pub struct RtcPeer {
    pc: Arc<RTCPeerConnection>,
    target: u32,
}

impl RtcPeer {
    pub async fn connect(config: &RtcPeerConfig) -> Result<Self, PeerError> {
        let api = build_api()?;
        let mut rtc_config = RTCConfiguration::default();
        if !config.ice_servers.is_empty() {
            rtc_config.ice_servers = vec![RTCIceServer {
                urls: config.ice_servers.clone(),
                ..Default::default()
            }];
        }

        let pc = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(PeerError::new)?,
        );

        if config.send_video {
            pc.add_transceiver_from_kind(
                RTPCodecType::Video,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Sendonly,
                    send_encodings: Vec::new(),
                }),
            )
            .await
            .map_err(PeerError::new)?;
        }

        log_state_changes(&pc);
        tracing::debug!(
            target = "beach_sfu::rtc",
            ice_servers = ?config.ice_servers,
            send_video = config.send_video,
            "peer connection created"
        );
        Ok(Self {
            pc,
            target: config.target,
        })
    }

    pub fn peer_connection(&self) -> &Arc<RTCPeerConnection> {
        &self.pc
    }

    pub async fn close(&self) -> Result<(), PeerError> {
        self.pc.close().await.map_err(PeerError::new)
    }
}

#[async_trait]
impl PeerConnection for RtcPeer {
    async fn create_offer(&self) -> Result<SessionDescriptor, PeerError> {
        let offer = self.pc.create_offer(None).await.map_err(PeerError::new)?;
        descriptor_from_rtc(&offer)
    }

    async fn create_answer(&self) -> Result<SessionDescriptor, PeerError> {
        let answer = self.pc.create_answer(None).await.map_err(PeerError::new)?;
        descriptor_from_rtc(&answer)
    }

    async fn set_local_description(
        &self,
        description: SessionDescriptor,
    ) -> Result<(), PeerError> {
        let description = descriptor_to_rtc(description)?;
        self.pc
            .set_local_description(description)
            .await
            .map_err(PeerError::new)
    }

    async fn set_remote_description(
        &self,
        description: SessionDescriptor,
    ) -> Result<(), PeerError> {
        let description = descriptor_to_rtc(description)?;
        self.pc
            .set_remote_description(description)
            .await
            .map_err(PeerError::new)
    }

    async fn add_ice_candidate(&self, candidate: IceCandidateRecord) -> Result<(), PeerError> {
        self.pc
            .add_ice_candidate(candidate_to_rtc(candidate.candidate))
            .await
            .map_err(PeerError::new)
    }

    fn on_local_candidate(&self, sink: LocalCandidateSink) {
        let target = self.target;
        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let sink = sink.clone();
                Box::pin(async move {
                    let delivered = match candidate {
                        None => sink.gathering_complete(),
                        Some(candidate) => match candidate.to_json() {
                            Ok(init) => sink.discovered(IceCandidateRecord::new(
                                target,
                                candidate_from_rtc(init),
                            )),
                            Err(err) => {
                                tracing::warn!(
                                    target = "beach_sfu::rtc",
                                    error = %err,
                                    "failed to serialize local ice candidate"
                                );
                                return;
                            }
                        },
                    };
                    if !delivered {
                        tracing::debug!(
                            target = "beach_sfu::rtc",
                            "session stopped; dropping local ice candidate"
                        );
                    }
                })
            }));
    }
}

fn build_api() -> Result<API, PeerError> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .map_err(PeerError::new)?;

    let mut registry = Registry::new();
    registry =
        register_default_interceptors(registry, &mut media_engine).map_err(PeerError::new)?;

    Ok(APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build())
}

fn log_state_changes(pc: &Arc<RTCPeerConnection>) {
    pc.on_ice_connection_state_change(Box::new(|state: RTCIceConnectionState| {
        Box::pin(async move {
            match state {
                RTCIceConnectionState::Failed | RTCIceConnectionState::Disconnected => {
                    tracing::warn!(target = "beach_sfu::rtc", %state, "ice connection state changed")
                }
                _ => tracing::info!(target = "beach_sfu::rtc", %state, "ice connection state changed"),
            }
        })
    }));
    pc.on_peer_connection_state_change(Box::new(|state: RTCPeerConnectionState| {
        Box::pin(async move {
            tracing::debug!(target = "beach_sfu::rtc", %state, "peer connection state changed");
        })
    }));
}

fn descriptor_to_rtc(description: SessionDescriptor) -> Result<RTCSessionDescription, PeerError> {
    match description.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(description.sdp),
        SdpType::Answer => RTCSessionDescription::answer(description.sdp),
    }
    .map_err(PeerError::new)
}

fn descriptor_from_rtc(description: &RTCSessionDescription) -> Result<SessionDescriptor, PeerError> {
    match description.sdp_type {
        RTCSdpType::Offer => Ok(SessionDescriptor::offer(description.sdp.clone())),
        RTCSdpType::Answer => Ok(SessionDescriptor::answer(description.sdp.clone())),
        other => Err(PeerError(format!("unsupported sdp type {other}"))),
    }
}

fn candidate_to_rtc(candidate: CandidateInit) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate,
        sdp_mid: candidate.sdp_mid,
        sdp_mline_index: candidate.sdp_mline_index,
        username_fragment: candidate.username_fragment,
    }
}

fn candidate_from_rtc(candidate: RTCIceCandidateInit) -> CandidateInit {
    CandidateInit {
        candidate: candidate.candidate,
        sdp_mid: candidate.sdp_mid,
        sdp_mline_index: candidate.sdp_mline_index,
        username_fragment: candidate.username_fragment,
    }
}
