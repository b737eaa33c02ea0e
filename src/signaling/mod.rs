//! Resilient WebSocket signaling client.
//!
//! Maintains a single WebSocket to a rendezvous server, joins a room, and
//! relays WebRTC offer/answer/ICE payloads between peers. Handles
//! reconnection with exponential backoff and jitter, a connection timeout
//! that bounds the time spent connecting (including the wait for the
//! server's `join` frame), and a clean distinction between intentional and
//! unintentional closes.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_tungstenite::tokio::connect_async;
use async_tungstenite::tungstenite::Message as WsMessage;
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

use crate::config::Config;

/// Connection lifecycle state, as observed by callers via [`SignalingEvent::StateChanged`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Events emitted by the signaling client.
#[derive(Debug, Clone)]
pub enum SignalingEvent {
    StateChanged(ConnectionState),
    /// The local join completed; carries this peer's id and the peers
    /// already present in the room.
    Joined { peer_id: String, existing_peers: Vec<String> },
    PeerJoined(String),
    PeerLeft(String),
    Offer { peer_id: String, data: Value },
    Answer { peer_id: String, data: Value },
    Ice { peer_id: String, data: Value },
    Error(String),
    Disconnected(String),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ClientFrame<'a> {
    #[serde(rename = "offer")]
    Offer { peer_id: &'a str, data: Value },
    #[serde(rename = "answer")]
    Answer { peer_id: &'a str, data: Value },
    #[serde(rename = "ice")]
    Ice { peer_id: &'a str, data: Value },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ServerFrame {
    #[serde(rename = "join")]
    Join {
        #[serde(rename = "peerId")]
        peer_id: String,
        data: JoinData,
    },
    #[serde(rename = "peer-joined")]
    PeerJoined {
        #[serde(rename = "peerId")]
        peer_id: String,
    },
    #[serde(rename = "peer-left")]
    PeerLeft {
        #[serde(rename = "peerId")]
        peer_id: String,
    },
    #[serde(rename = "offer")]
    Offer {
        #[serde(rename = "peerId")]
        peer_id: String,
        data: Value,
    },
    #[serde(rename = "answer")]
    Answer {
        #[serde(rename = "peerId")]
        peer_id: String,
        data: Value,
    },
    #[serde(rename = "ice")]
    Ice {
        #[serde(rename = "peerId")]
        peer_id: String,
        data: Value,
    },
    #[serde(rename = "error")]
    Error { data: ErrorData },
}

#[derive(Debug, Deserialize)]
struct JoinData {
    peers: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorData {
    message: String,
}

enum OutboundCommand {
    Send(WsMessage),
    Leave,
}

/// A WebSocket connection to the rendezvous server for one room.
///
/// Cloning a client shares the underlying connection; the background task
/// that owns the socket is torn down when the last clone is dropped or
/// [`SignalingClient::leave`] is called.
pub struct SignalingClient {
    outbound_tx: mpsc::Sender<OutboundCommand>,
    events_tx: broadcast::Sender<SignalingEvent>,
    intentional_close: Arc<AtomicBool>,
    reconnect_attempts: Arc<AtomicU32>,
    /// Mirrors the `connected` wire state: only `true` once the server's
    /// `join` frame has been received. Sends are rejected rather than
    /// queued while this is `false`.
    connected: Arc<AtomicBool>,
    _task: Arc<tokio::task::JoinHandle<()>>,
}

impl SignalingClient {
    /// Connect to `<config.signaling_url>/room/<room_id>` and begin the
    /// reconnect-managing background task.
    pub fn connect(config: Config, room_id: impl Into<String>) -> Self {
        let room_id = room_id.into();
        let (outbound_tx, outbound_rx) = mpsc::channel(32);
        let (events_tx, _) = broadcast::channel(128);
        let intentional_close = Arc::new(AtomicBool::new(false));
        let reconnect_attempts = Arc::new(AtomicU32::new(0));
        let connected = Arc::new(AtomicBool::new(false));

        let task = tokio::spawn(run_client(
            config,
            room_id,
            outbound_rx,
            events_tx.clone(),
            intentional_close.clone(),
            reconnect_attempts.clone(),
            connected.clone(),
        ));

        Self {
            outbound_tx,
            events_tx,
            intentional_close,
            reconnect_attempts,
            connected,
            _task: Arc::new(task),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SignalingEvent> {
        self.events_tx.subscribe()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::SeqCst)
    }

    /// Whether the socket is currently `OPEN` (i.e. joined).
    pub fn is_open(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Serialize `{type, data}` and hand it to the writer task iff the
    /// socket is currently open. No buffering: when not open, the frame is
    /// dropped and `false` is returned rather than queued for later.
    fn send_frame(&self, frame: ClientFrame<'_>) -> bool {
        if !self.is_open() {
            return false;
        }
        let Ok(json) = serde_json::to_string(&frame) else {
            return false;
        };
        self.outbound_tx
            .try_send(OutboundCommand::Send(WsMessage::Text(json)))
            .is_ok()
    }

    pub fn send_offer(&self, peer_id: &str, data: Value) -> bool {
        self.send_frame(ClientFrame::Offer { peer_id, data })
    }

    pub fn send_answer(&self, peer_id: &str, data: Value) -> bool {
        self.send_frame(ClientFrame::Answer { peer_id, data })
    }

    pub fn send_ice(&self, peer_id: &str, data: Value) -> bool {
        self.send_frame(ClientFrame::Ice { peer_id, data })
    }

    /// Intentionally leave the room. No further reconnect attempts occur.
    pub async fn leave(&self) {
        self.intentional_close.store(true, Ordering::SeqCst);
        let _ = self.outbound_tx.send(OutboundCommand::Leave).await;
    }
}

/// Exponential backoff with up to 30% jitter, capped at `max_delay`.
fn backoff_delay(attempt: u32, base: Duration, max_delay: Duration) -> Duration {
    let exp = base.as_millis().saturating_mul(1u128 << attempt.saturating_sub(1).min(20));
    let jitter = rand::thread_rng().gen_range(0.0..0.3);
    let jittered = (exp as f64 * (1.0 + jitter)) as u128;
    Duration::from_millis(jittered.min(max_delay.as_millis()) as u64)
}

async fn run_client(
    config: Config,
    room_id: String,
    mut outbound_rx: mpsc::Receiver<OutboundCommand>,
    events_tx: broadcast::Sender<SignalingEvent>,
    intentional_close: Arc<AtomicBool>,
    reconnect_attempts: Arc<AtomicU32>,
    connected: Arc<AtomicBool>,
) {
    let url = format!("{}/room/{}", config.signaling_url, room_id);

    loop {
        connected.store(false, Ordering::SeqCst);
        let _ = events_tx.send(SignalingEvent::StateChanged(ConnectionState::Connecting));

        // The connection timeout bounds the entire "connecting" state: the
        // TCP/TLS handshake AND the subsequent wait for the server's `join`
        // frame, per the state machine's `connecting` exit conditions.
        let deadline = Instant::now() + config.connection_timeout();

        let ws_stream = match tokio::time::timeout_at(deadline, connect_async(&url)).await {
            Ok(Ok((stream, _))) => stream,
            Ok(Err(e)) => {
                tracing::warn!("signaling connect failed: {e}");
                if !schedule_reconnect(&config, &reconnect_attempts, &events_tx).await {
                    return;
                }
                continue;
            }
            Err(_) => {
                tracing::warn!("signaling connect timed out after {:?}", config.connection_timeout());
                if !schedule_reconnect(&config, &reconnect_attempts, &events_tx).await {
                    return;
                }
                continue;
            }
        };

        let (mut write, mut read) = ws_stream.split();

        let joined = loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    tracing::warn!("signaling timed out waiting for join");
                    let _ = write.send(WsMessage::Close(None)).await;
                    break false;
                }
                outbound = outbound_rx.recv() => {
                    match outbound {
                        // Nothing is open yet; per the no-buffering rule
                        // these are simply not sendable before `join`.
                        Some(OutboundCommand::Send(_)) => {}
                        Some(OutboundCommand::Leave) | None => {
                            let _ = write.send(WsMessage::Close(None)).await;
                            let _ = events_tx.send(SignalingEvent::StateChanged(ConnectionState::Disconnected));
                            return;
                        }
                    }
                }
                incoming = read.next() => {
                    match incoming {
                        Some(Ok(WsMessage::Text(text))) => {
                            if handle_frame(&text, &events_tx, &reconnect_attempts) {
                                break true;
                            }
                        }
                        Some(Ok(WsMessage::Close(_))) | None => break false,
                        Some(Err(e)) => {
                            tracing::warn!("signaling read error while awaiting join: {e}");
                            break false;
                        }
                        _ => {}
                    }
                }
            }
        };

        if !joined {
            if !schedule_reconnect(&config, &reconnect_attempts, &events_tx).await {
                return;
            }
            continue;
        }

        connected.store(true, Ordering::SeqCst);
        let _ = events_tx.send(SignalingEvent::StateChanged(ConnectionState::Connected));

        let closed_intentionally = loop {
            tokio::select! {
                outbound = outbound_rx.recv() => {
                    match outbound {
                        Some(OutboundCommand::Send(msg)) => {
                            if write.send(msg).await.is_err() {
                                break false;
                            }
                        }
                        Some(OutboundCommand::Leave) | None => {
                            let _ = write.send(WsMessage::Close(None)).await;
                            break true;
                        }
                    }
                }
                incoming = read.next() => {
                    match incoming {
                        Some(Ok(WsMessage::Text(text))) => {
                            handle_frame(&text, &events_tx, &reconnect_attempts);
                        }
                        Some(Ok(WsMessage::Close(_))) | None => break false,
                        Some(Err(e)) => {
                            tracing::warn!("signaling read error: {e}");
                            break false;
                        }
                        _ => {}
                    }
                }
            }
        };

        connected.store(false, Ordering::SeqCst);

        if closed_intentionally || intentional_close.load(Ordering::SeqCst) {
            let _ = events_tx.send(SignalingEvent::StateChanged(ConnectionState::Disconnected));
            return;
        }

        if !schedule_reconnect(&config, &reconnect_attempts, &events_tx).await {
            return;
        }
    }
}

/// Parses and broadcasts one server frame. Returns `true` iff the frame was
/// a `join`, so callers waiting to leave the `connecting` state know to
/// stop.
fn handle_frame(text: &str, events_tx: &broadcast::Sender<SignalingEvent>, reconnect_attempts: &Arc<AtomicU32>) -> bool {
    let frame: ServerFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!("ignoring malformed signaling frame: {e}");
            return false;
        }
    };

    let (event, is_join) = match frame {
        ServerFrame::Join { peer_id, data } => {
            reconnect_attempts.store(0, Ordering::SeqCst);
            (
                SignalingEvent::Joined {
                    peer_id,
                    existing_peers: data.peers,
                },
                true,
            )
        }
        ServerFrame::PeerJoined { peer_id } => (SignalingEvent::PeerJoined(peer_id), false),
        ServerFrame::PeerLeft { peer_id } => (SignalingEvent::PeerLeft(peer_id), false),
        ServerFrame::Offer { peer_id, data } => (SignalingEvent::Offer { peer_id, data }, false),
        ServerFrame::Answer { peer_id, data } => (SignalingEvent::Answer { peer_id, data }, false),
        ServerFrame::Ice { peer_id, data } => (SignalingEvent::Ice { peer_id, data }, false),
        ServerFrame::Error { data } => (SignalingEvent::Error(data.message), false),
    };

    let _ = events_tx.send(event);
    is_join
}

/// Waits out a backoff delay and bumps the attempt counter, unless the
/// configured maximum has been reached. Returns `false` when the caller
/// should give up.
async fn schedule_reconnect(
    config: &Config,
    reconnect_attempts: &Arc<AtomicU32>,
    events_tx: &broadcast::Sender<SignalingEvent>,
) -> bool {
    let attempt = reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
    if attempt > config.max_reconnect_attempts {
        let _ = events_tx.send(SignalingEvent::Error("Max reconnection attempts reached".to_string()));
        let _ = events_tx.send(SignalingEvent::Disconnected("max reconnect attempts reached".to_string()));
        let _ = events_tx.send(SignalingEvent::StateChanged(ConnectionState::Disconnected));
        return false;
    }

    let _ = events_tx.send(SignalingEvent::StateChanged(ConnectionState::Reconnecting));
    let delay = backoff_delay(attempt, config.reconnect_base_delay(), config.reconnect_max_delay());
    tracing::info!("signaling reconnect attempt {attempt} in {delay:?}");
    tokio::time::sleep(delay).await;
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        let base = Duration::from_millis(1000);
        let max = Duration::from_millis(30_000);

        let d1 = backoff_delay(1, base, max);
        assert!(d1.as_millis() >= 1000 && d1.as_millis() <= 1300);

        let d3 = backoff_delay(3, base, max);
        assert!(d3.as_millis() >= 4000 && d3.as_millis() <= 5200);

        let d_large = backoff_delay(20, base, max);
        assert_eq!(d_large, max);
    }

    #[test]
    fn handle_frame_resets_attempts_on_join_and_reports_it() {
        let (tx, mut rx) = broadcast::channel(8);
        let attempts = Arc::new(AtomicU32::new(3));
        let frame = r#"{"type":"join","peerId":"me","data":{"peers":["a","b"]}}"#;
        assert!(handle_frame(frame, &tx, &attempts));
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
        match rx.try_recv().unwrap() {
            SignalingEvent::Joined { peer_id, existing_peers } => {
                assert_eq!(peer_id, "me");
                assert_eq!(existing_peers, vec!["a".to_string(), "b".to_string()]);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn handle_frame_ignores_malformed_json() {
        let (tx, mut rx) = broadcast::channel(8);
        let attempts = Arc::new(AtomicU32::new(0));
        assert!(!handle_frame("not json", &tx, &attempts));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn handle_frame_surfaces_peer_presence_and_is_not_join() {
        let (tx, mut rx) = broadcast::channel(8);
        let attempts = Arc::new(AtomicU32::new(0));
        assert!(!handle_frame(r#"{"type":"peer-joined","peerId":"p1"}"#, &tx, &attempts));
        match rx.try_recv().unwrap() {
            SignalingEvent::PeerJoined(id) => assert_eq!(id, "p1"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn send_before_open_is_rejected_without_buffering() {
        let config = Config::default();
        let client = SignalingClient::connect(config, "test-room");
        // The background task hasn't connected yet, so `is_open` is false
        // and the send must be rejected rather than queued.
        assert!(!client.is_open());
        assert!(!client.send_offer("peer-1", serde_json::json!({})));
    }
}
