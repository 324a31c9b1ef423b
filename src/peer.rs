//! Connection establishment adapter.
//!
//! One [`PeerLink`] per transfer bridges a WebRTC peer connection to the
//! relay: locally discovered candidates and descriptions go out as relay
//! messages, remote ones are applied as they arrive, and channel/ICE state
//! changes surface as [`PeerEvent`]s on a channel the run loop selects on.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use crate::protocol::{
    IceCandidateModel, RelayMessage, RtcConfigurationModel, SessionDescriptionModel,
};
use crate::signaling::RelaySender;

/// STUN server used when the relay suggests no ICE servers.
const STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// Label for the transfer data channel, fixed by the protocol.
pub const DATA_CHANNEL_LABEL: &str = "sendDataChannel";

pub enum PeerEventKind {
    /// The transfer channel is ready for bytes.
    ChannelOpen(Arc<RTCDataChannel>),
    ChannelClosed,
    /// ICE reached failed/disconnected before the transfer completed.
    ConnectionFailed,
}

pub struct PeerEvent {
    pub transfer_id: String,
    pub kind: PeerEventKind,
}

/// Per-transfer wrapper around one peer connection. The owning
/// [`SessionDirectory`](crate::sessions::SessionDirectory) keys it by
/// transfer id.
pub struct PeerLink {
    pc: Arc<RTCPeerConnection>,
}

impl PeerLink {
    /// Sender role: create the connection and the outbound data channel,
    /// then generate and send the offer descriptor.
    pub async fn connect(
        transfer_id: &str,
        target_id: &str,
        config: Option<&RtcConfigurationModel>,
        relay: RelaySender,
        events: mpsc::Sender<PeerEvent>,
    ) -> Result<Self> {
        let pc = new_peer_connection(config).await?;
        wire_connection(&pc, transfer_id, target_id, relay.clone(), events.clone());

        let dc = pc
            .create_data_channel(DATA_CHANNEL_LABEL, None)
            .await
            .context("failed to create data channel")?;

        {
            let events = events.clone();
            let transfer_id = transfer_id.to_string();
            let dc_open = dc.clone();
            dc.on_open(Box::new(move || {
                Box::pin(async move {
                    let _ = events
                        .send(PeerEvent {
                            transfer_id,
                            kind: PeerEventKind::ChannelOpen(dc_open),
                        })
                        .await;
                })
            }));
        }
        {
            let transfer_id = transfer_id.to_string();
            dc.on_close(Box::new(move || {
                let events = events.clone();
                let transfer_id = transfer_id.clone();
                Box::pin(async move {
                    let _ = events
                        .send(PeerEvent {
                            transfer_id,
                            kind: PeerEventKind::ChannelClosed,
                        })
                        .await;
                })
            }));
        }

        let offer = pc.create_offer(None).await.context("failed to create offer")?;
        pc.set_local_description(offer.clone())
            .await
            .context("failed to set local description")?;
        relay
            .send(RelayMessage::RtcDescription {
                transfer_id: transfer_id.to_string(),
                target_id: target_id.to_string(),
                data: SessionDescriptionModel {
                    sdp_type: "offer".to_string(),
                    sdp: offer.sdp,
                },
                client_id: None,
            })
            .await?;

        Ok(Self { pc })
    }

    /// Receiver role: create the connection for a remembered offer, apply
    /// the remote descriptor, and answer. The inbound data channel arrives
    /// later as a [`PeerEventKind::ChannelOpen`] event.
    pub async fn accept(
        transfer_id: &str,
        source_id: &str,
        config: Option<&RtcConfigurationModel>,
        offer: &SessionDescriptionModel,
        relay: RelaySender,
        events: mpsc::Sender<PeerEvent>,
    ) -> Result<Self> {
        let pc = new_peer_connection(config).await?;
        wire_connection(&pc, transfer_id, source_id, relay.clone(), events.clone());

        {
            let transfer_id = transfer_id.to_string();
            pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                let events = events.clone();
                let transfer_id = transfer_id.clone();
                Box::pin(async move {
                    let _ = events
                        .send(PeerEvent {
                            transfer_id,
                            kind: PeerEventKind::ChannelOpen(dc),
                        })
                        .await;
                })
            }));
        }

        let remote = RTCSessionDescription::offer(offer.sdp.clone())
            .context("invalid remote offer")?;
        pc.set_remote_description(remote)
            .await
            .context("failed to apply remote description")?;

        let answer = pc
            .create_answer(None)
            .await
            .context("failed to create answer")?;
        pc.set_local_description(answer.clone())
            .await
            .context("failed to set local description")?;
        relay
            .send(RelayMessage::RtcDescription {
                transfer_id: transfer_id.to_string(),
                target_id: source_id.to_string(),
                data: SessionDescriptionModel {
                    sdp_type: "answer".to_string(),
                    sdp: answer.sdp,
                },
                client_id: None,
            })
            .await?;

        Ok(Self { pc })
    }

    pub async fn apply_remote_description(&self, desc: &SessionDescriptionModel) -> Result<()> {
        let sdp = match desc.sdp_type.as_str() {
            "offer" => RTCSessionDescription::offer(desc.sdp.clone()),
            "answer" => RTCSessionDescription::answer(desc.sdp.clone()),
            other => anyhow::bail!("unsupported description type: {other}"),
        }
        .context("invalid session description")?;

        self.pc
            .set_remote_description(sdp)
            .await
            .context("failed to set remote description")
    }

    /// Best effort: duplicate and late candidates are expected while ICE
    /// gathering runs on both sides, so callers usually ignore the error.
    pub async fn apply_remote_candidate(&self, candidate: &IceCandidateModel) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate.clone(),
            sdp_mid: candidate.sdp_mid.clone(),
            sdp_mline_index: candidate.sdp_m_line_index,
            username_fragment: candidate.username_fragment.clone(),
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .context("failed to add ice candidate")
    }

    pub async fn close(&self) {
        let _ = self.pc.close().await;
    }
}

async fn new_peer_connection(
    config: Option<&RtcConfigurationModel>,
) -> Result<Arc<RTCPeerConnection>> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .context("failed to register default codecs")?;

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)
        .context("failed to register interceptors")?;

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();

    let rtc_config = RTCConfiguration {
        ice_servers: ice_servers(config),
        ..Default::default()
    };

    let pc = api
        .new_peer_connection(rtc_config)
        .await
        .context("failed to create peer connection")?;
    Ok(Arc::new(pc))
}

fn ice_servers(config: Option<&RtcConfigurationModel>) -> Vec<RTCIceServer> {
    match config {
        Some(config) if !config.ice_servers.is_empty() => config
            .ice_servers
            .iter()
            .map(|server| RTCIceServer {
                urls: server.urls.to_vec(),
                username: server.username.clone().unwrap_or_default(),
                credential: server.credential.clone().unwrap_or_default(),
                ..Default::default()
            })
            .collect(),
        _ => vec![RTCIceServer {
            urls: vec![STUN_SERVER.to_string()],
            ..Default::default()
        }],
    }
}

/// Handlers shared by both roles: forward local candidates to the peer and
/// surface terminal ICE states.
fn wire_connection(
    pc: &Arc<RTCPeerConnection>,
    transfer_id: &str,
    target_id: &str,
    relay: RelaySender,
    events: mpsc::Sender<PeerEvent>,
) {
    {
        let relay = relay.clone();
        let transfer_id = transfer_id.to_string();
        let target_id = target_id.to_string();
        pc.on_ice_candidate(Box::new(move |candidate| {
            let relay = relay.clone();
            let transfer_id = transfer_id.clone();
            let target_id = target_id.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    return;
                };
                let Ok(init) = candidate.to_json() else {
                    return;
                };
                let _ = relay
                    .send(RelayMessage::RtcCandidate {
                        transfer_id,
                        target_id,
                        data: IceCandidateModel {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_m_line_index: init.sdp_mline_index,
                            username_fragment: init.username_fragment,
                        },
                        client_id: None,
                    })
                    .await;
            })
        }));
    }

    {
        let transfer_id = transfer_id.to_string();
        pc.on_ice_connection_state_change(Box::new(move |state| {
            let events = events.clone();
            let transfer_id = transfer_id.clone();
            Box::pin(async move {
                if matches!(
                    state,
                    RTCIceConnectionState::Failed | RTCIceConnectionState::Disconnected
                ) {
                    let _ = events
                        .send(PeerEvent {
                            transfer_id,
                            kind: PeerEventKind::ConnectionFailed,
                        })
                        .await;
                }
            })
        }));
    }
}
