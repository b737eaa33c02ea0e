//! Multi-peer WebRTC connection management.
//!
//! Each remote gets one [`webrtc::peer_connection::RTCPeerConnection`] and
//! three data channels (`control`, `terminal`, `files`) with distinct
//! reliability policies. All peers funnel into a single [`PeerEvent`]
//! stream so a caller never has to poll per-peer handles.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, Mutex, RwLock};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use crate::config::Config;
use crate::error::PeerError;
use crate::protocol::ChannelName;

/// Observed state of a peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Connecting,
    Connected,
    Disconnected,
    Failed,
}

/// Events produced by any managed peer, tagged with the peer that produced
/// them.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// A local SDP/ICE message that must be relayed to the remote peer via
    /// signaling.
    Signal { peer_id: String, data: Value },
    StateChanged { peer_id: String, state: PeerState },
    Connected { peer_id: String },
    Closed { peer_id: String },
    Error { peer_id: String, message: String },
    Data {
        peer_id: String,
        channel: ChannelName,
        bytes: Vec<u8>,
    },
}

struct PeerSession {
    connection: Arc<RTCPeerConnection>,
    channels: RwLock<HashMap<ChannelName, Arc<RTCDataChannel>>>,
    #[allow(dead_code)]
    role_initiator: bool,
}

/// Owns every active peer connection and exposes one event stream for all
/// of them.
pub struct PeerManager {
    api: API,
    ice_servers: Vec<RTCIceServer>,
    peers: Mutex<HashMap<String, Arc<PeerSession>>>,
    events_tx: mpsc::Sender<PeerEvent>,
}

impl PeerManager {
    pub fn new(config: &Config) -> (Arc<Self>, mpsc::Receiver<PeerEvent>) {
        let mut media_engine = MediaEngine::default();
        // Data-channel-only usage: register the default codec set purely
        // so interceptor registration below has something to attach to.
        let _ = media_engine.register_default_codecs();

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .unwrap_or_else(|_| Registry::new());

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = config
            .ice_servers
            .iter()
            .map(|s| RTCIceServer {
                urls: s.urls.clone(),
                username: s.username.clone().unwrap_or_default(),
                credential: s.credential.clone().unwrap_or_default(),
                ..Default::default()
            })
            .collect();

        let (events_tx, events_rx) = mpsc::channel(256);

        (
            Arc::new(Self {
                api,
                ice_servers,
                peers: Mutex::new(HashMap::new()),
                events_tx,
            }),
            events_rx,
        )
    }

    /// Create (or replace) a peer connection for `peer_id`.
    ///
    /// Only the initiator creates data channels up front; the responder
    /// accepts them as they arrive, matched by label.
    pub async fn create_connection(self: &Arc<Self>, peer_id: String, initiator: bool) -> Result<(), PeerError> {
        self.destroy(&peer_id).await;

        let config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };
        let connection = Arc::new(self.api.new_peer_connection(config).await?);

        let session = Arc::new(PeerSession {
            connection: connection.clone(),
            channels: RwLock::new(HashMap::new()),
            role_initiator: initiator,
        });

        self.install_callbacks(peer_id.clone(), session.clone());

        if initiator {
            create_data_channels(&peer_id, &session, &self.events_tx).await?;
            let offer = connection.create_offer(None).await?;
            connection.set_local_description(offer.clone()).await?;
            let _ = self
                .events_tx
                .send(PeerEvent::Signal {
                    peer_id: peer_id.clone(),
                    data: serde_json::json!({ "sdp": offer.sdp, "type": "offer" }),
                })
                .await;
        }

        self.peers.lock().await.insert(peer_id, session);
        Ok(())
    }

    fn install_callbacks(&self, peer_id: String, session: Arc<PeerSession>) {
        let events_tx = self.events_tx.clone();
        let connection = session.connection.clone();

        let ice_peer_id = peer_id.clone();
        let ice_events_tx = events_tx.clone();
        connection.on_ice_candidate(Box::new(move |candidate| {
            let peer_id = ice_peer_id.clone();
            let events_tx = ice_events_tx.clone();
            Box::pin(async move {
                if let Some(candidate) = candidate {
                    if let Ok(init) = candidate.to_json() {
                        let _ = events_tx
                            .send(PeerEvent::Signal {
                                peer_id,
                                data: serde_json::json!({
                                    "candidate": init.candidate,
                                    "sdpMid": init.sdp_mid,
                                    "sdpMLineIndex": init.sdp_mline_index,
                                }),
                            })
                            .await;
                    }
                }
            })
        }));

        let state_peer_id = peer_id.clone();
        let state_events_tx = events_tx.clone();
        connection.on_ice_connection_state_change(Box::new(move |ice_state| {
            let peer_id = state_peer_id.clone();
            let events_tx = state_events_tx.clone();
            Box::pin(async move {
                let state = match ice_state {
                    RTCIceConnectionState::Connected | RTCIceConnectionState::Completed => {
                        Some(PeerState::Connected)
                    }
                    RTCIceConnectionState::Disconnected => Some(PeerState::Disconnected),
                    RTCIceConnectionState::Failed => Some(PeerState::Failed),
                    _ => None,
                };
                if let Some(state) = state {
                    let _ = events_tx.send(PeerEvent::StateChanged { peer_id: peer_id.clone(), state }).await;
                    if state == PeerState::Connected {
                        let _ = events_tx.send(PeerEvent::Connected { peer_id }).await;
                    }
                }
            })
        }));

        let conn_peer_id = peer_id.clone();
        let conn_events_tx = events_tx.clone();
        connection.on_peer_connection_state_change(Box::new(move |pc_state| {
            let peer_id = conn_peer_id.clone();
            let events_tx = conn_events_tx.clone();
            Box::pin(async move {
                if pc_state == RTCPeerConnectionState::Failed {
                    let _ = events_tx
                        .send(PeerEvent::Error {
                            peer_id,
                            message: "peer connection transitioned to failed".to_string(),
                        })
                        .await;
                }
            })
        }));

        let dc_peer_id = peer_id.clone();
        let dc_events_tx = events_tx.clone();
        let dc_session = session.clone();
        connection.on_data_channel(Box::new(move |channel| {
            let peer_id = dc_peer_id.clone();
            let events_tx = dc_events_tx.clone();
            let session = dc_session.clone();
            Box::pin(async move {
                if let Some(name) = ChannelName::from_str(&channel.label()) {
                    register_channel(peer_id, name, channel, session, events_tx).await;
                } else {
                    tracing::warn!("ignoring data channel with unrecognized label {}", channel.label());
                }
            })
        }));
    }

    /// Feed a remote SDP offer/answer or ICE candidate into a peer.
    pub async fn signal(&self, peer_id: &str, data: Value) -> Result<(), PeerError> {
        let session = self.get(peer_id).await?;

        if let Some(sdp_type) = data.get("type").and_then(|v| v.as_str()) {
            let sdp = data.get("sdp").and_then(|v| v.as_str()).unwrap_or_default();
            let description = match sdp_type {
                "offer" => RTCSessionDescription::offer(sdp.to_string())?,
                "answer" => RTCSessionDescription::answer(sdp.to_string())?,
                _ => return Ok(()),
            };
            let is_offer = sdp_type == "offer";
            session.connection.set_remote_description(description).await?;

            if is_offer {
                let answer = session.connection.create_answer(None).await?;
                session.connection.set_local_description(answer.clone()).await?;
                let _ = self
                    .events_tx
                    .send(PeerEvent::Signal {
                        peer_id: peer_id.to_string(),
                        data: serde_json::json!({ "sdp": answer.sdp, "type": "answer" }),
                    })
                    .await;
            }
            return Ok(());
        }

        if let Some(candidate) = data.get("candidate").and_then(|v| v.as_str()) {
            use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
            let init = RTCIceCandidateInit {
                candidate: candidate.to_string(),
                sdp_mid: data.get("sdpMid").and_then(|v| v.as_str()).map(String::from),
                sdp_mline_index: data.get("sdpMLineIndex").and_then(|v| v.as_u64()).map(|n| n as u16),
                ..Default::default()
            };
            session.connection.add_ice_candidate(init).await?;
        }

        Ok(())
    }

    /// Send bytes on a channel. Returns `false` (never errors) when the
    /// peer or channel isn't open — callers decide what to do.
    pub async fn send(&self, peer_id: &str, bytes: &[u8], channel: ChannelName) -> bool {
        let Ok(session) = self.get(peer_id).await else {
            return false;
        };
        let channels = session.channels.read().await;
        let Some(dc) = channels.get(&channel) else {
            return false;
        };
        if dc.ready_state() != RTCDataChannelState::Open {
            return false;
        }
        dc.send(&bytes::Bytes::copy_from_slice(bytes)).await.is_ok()
    }

    pub async fn destroy(&self, peer_id: &str) {
        if let Some(session) = self.peers.lock().await.remove(peer_id) {
            let _ = session.connection.close().await;
            let _ = self
                .events_tx
                .send(PeerEvent::Closed { peer_id: peer_id.to_string() })
                .await;
        }
    }

    pub async fn destroy_all(&self) {
        let ids: Vec<String> = self.peers.lock().await.keys().cloned().collect();
        for id in ids {
            self.destroy(&id).await;
        }
    }

    async fn get(&self, peer_id: &str) -> Result<Arc<PeerSession>, PeerError> {
        self.peers
            .lock()
            .await
            .get(peer_id)
            .cloned()
            .ok_or_else(|| PeerError::UnknownPeer(peer_id.to_string()))
    }
}

/// Create the three data channels with their fixed reliability policy.
/// Only called by the initiator.
async fn create_data_channels(
    peer_id: &str,
    session: &Arc<PeerSession>,
    events_tx: &mpsc::Sender<PeerEvent>,
) -> Result<(), PeerError> {
    let control = session
        .connection
        .create_data_channel(ChannelName::Control.as_str(), None)
        .await?;
    let terminal = session
        .connection
        .create_data_channel(
            ChannelName::Terminal.as_str(),
            Some(RTCDataChannelInit {
                ordered: Some(false),
                max_retransmits: Some(0),
                ..Default::default()
            }),
        )
        .await?;
    let files = session
        .connection
        .create_data_channel(ChannelName::Files.as_str(), None)
        .await?;

    register_channel(peer_id.to_string(), ChannelName::Control, control, session.clone(), events_tx.clone()).await;
    register_channel(peer_id.to_string(), ChannelName::Terminal, terminal, session.clone(), events_tx.clone()).await;
    register_channel(peer_id.to_string(), ChannelName::Files, files, session.clone(), events_tx.clone()).await;

    Ok(())
}

/// Wire an `on_message` callback into the shared event stream and stash the
/// channel handle so `send` can find it by name.
async fn register_channel(
    peer_id: String,
    name: ChannelName,
    channel: Arc<RTCDataChannel>,
    session: Arc<PeerSession>,
    events_tx: mpsc::Sender<PeerEvent>,
) {
    let msg_peer_id = peer_id.clone();
    let msg_events_tx = events_tx.clone();
    channel.on_message(Box::new(move |msg| {
        let peer_id = msg_peer_id.clone();
        let events_tx = msg_events_tx.clone();
        Box::pin(async move {
            let _ = events_tx
                .send(PeerEvent::Data {
                    peer_id,
                    channel: name,
                    bytes: msg.data.to_vec(),
                })
                .await;
        })
    }));

    session.channels.write().await.insert(name, channel);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_peer_send_returns_false_without_panicking() {
        let (manager, _rx) = PeerManager::new(&Config::default());
        let sent = manager.send("ghost", b"hi", ChannelName::Control).await;
        assert!(!sent);
    }

    #[tokio::test]
    async fn signal_to_unknown_peer_is_an_error_not_a_panic() {
        let (manager, _rx) = PeerManager::new(&Config::default());
        let result = manager.signal("ghost", serde_json::json!({})).await;
        assert!(matches!(result, Err(PeerError::UnknownPeer(_))));
    }

    #[tokio::test]
    async fn destroy_on_missing_peer_is_a_no_op() {
        let (manager, _rx) = PeerManager::new(&Config::default());
        manager.destroy("ghost").await; // must not panic
    }
}
