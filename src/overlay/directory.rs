use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{GoConnectError, Result};
use crate::ids::PeerId;
use crate::peer::signaling::SignalingAdapter;

use super::model::TunnelConfig;

/// A single Phoenix-channel-shaped frame: `topic`/`event`/`payload`/`ref`,
/// the same wire shape this lineage's sibling VPN client uses for its
/// control-plane channel to its own directory server (grounded in the
/// `phoenix-channel` crate's framing). `ref` correlates a request with its
/// reply; inbound pushes (no matching pending request) carry no `ref`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct PhoenixFrame {
    topic: String,
    event: String,
    payload: Value,
    #[serde(rename = "ref")]
    frame_ref: Option<String>,
}

/// What the directory sync loop hands back to the overlay engine once it
/// has a reply to a `sync` request, or an unsolicited push.
#[derive(Debug, Clone)]
pub enum DirectoryPush {
    TunnelConfig(TunnelConfig),
    SignalOffer { from: PeerId, ufrag: String, pwd: String },
    SignalAnswer { from: PeerId, ufrag: String, pwd: String },
    SignalCandidate { from: PeerId, candidate: String },
    VoiceSignal { from: PeerId, to: PeerId, payload: Value },
}

/// WebSocket client for the directory service's signaling/sync channel.
/// Reconnects with `backoff::ExponentialBackoff`, matching the reconnection
/// idiom this lineage already uses elsewhere for outbound network
/// collaborators.
pub struct DirectoryClient {
    url: Url,
    auth_token: String,
    outbound: mpsc::Sender<PhoenixFrame>,
    pending: Arc<Mutex<HashMap<String, oneshot::Sender<Value>>>>,
    next_ref: AtomicU64,
    push_tx: mpsc::Sender<DirectoryPush>,
}

impl DirectoryClient {
    /// Returns the client plus the two receivers its owner must drive: the
    /// outbound-frame receiver (fed into [`DirectoryClient::run`]) and the
    /// inbound-push receiver the overlay engine reads from.
    pub fn new(
        url: Url,
        auth_token: String,
    ) -> (Self, mpsc::Receiver<PhoenixFrame>, mpsc::Receiver<DirectoryPush>) {
        let (outbound, outbound_rx) = mpsc::channel(256);
        let (push_tx, push_rx) = mpsc::channel(256);
        let client = Self {
            url,
            auth_token,
            outbound,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_ref: AtomicU64::new(1),
            push_tx,
        };
        (client, outbound_rx, push_rx)
    }

    /// Hands out a cloned sender so a [`DirectorySignaling`] adapter can
    /// push frames onto the same outbound channel the connection loop
    /// drains.
    pub fn outbound_sender(&self) -> mpsc::Sender<PhoenixFrame> {
        self.outbound.clone()
    }

    fn alloc_ref(&self) -> String {
        self.next_ref.fetch_add(1, Ordering::Relaxed).to_string()
    }

    /// Sends a request and awaits its correlated reply. Used by directory
    /// sync (`event = "sync"`) and voice-signal relay.
    async fn request(&self, topic: &str, event: &str, payload: Value) -> Result<Value> {
        let frame_ref = self.alloc_ref();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(frame_ref.clone(), tx);

        self.outbound
            .send(PhoenixFrame {
                topic: topic.to_string(),
                event: event.to_string(),
                payload,
                frame_ref: Some(frame_ref.clone()),
            })
            .await
            .map_err(|_| GoConnectError::TransientNetwork("directory channel closed".into()))?;

        tokio::time::timeout(Duration::from_secs(10), rx)
            .await
            .map_err(|_| GoConnectError::TransientNetwork("directory request timed out".into()))?
            .map_err(|_| GoConnectError::TransientNetwork("directory reply dropped".into()))
    }

    /// Pulls the per-device tunnel configuration for `network_id`.
    pub async fn sync_tunnel_config(&self, network_id: &str) -> Result<TunnelConfig> {
        let reply = self
            .request(
                &format!("network:{network_id}"),
                "sync",
                serde_json::json!({ "auth_token": self.auth_token }),
            )
            .await?;
        serde_json::from_value(reply)
            .map_err(|err| GoConnectError::TransientNetwork(format!("malformed sync reply: {err}")))
    }

    /// Runs the reconnecting connection loop. Intended to be spawned as its
    /// own long-lived task by the overlay engine; exits on cancellation.
    pub async fn run(
        self: Arc<Self>,
        mut outbound_rx: mpsc::Receiver<PhoenixFrame>,
        cancel: CancellationToken,
    ) {
        let mut backoff = ExponentialBackoff {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(30),
            max_elapsed_time: None,
            ..Default::default()
        };

        loop {
            if cancel.is_cancelled() {
                return;
            }
            match self.connect_once(&mut outbound_rx, cancel.clone()).await {
                Ok(()) => {
                    // Clean close (e.g. directory-initiated); reset backoff
                    // and retry immediately rather than treating it as a
                    // failure.
                    backoff.reset();
                }
                Err(err) => {
                    let wait = backoff.next_backoff().unwrap_or(Duration::from_secs(30));
                    warn!(%err, wait_secs = wait.as_secs(), "directory channel disconnected; reconnecting");
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        _ = cancel.cancelled() => return,
                    }
                }
            }
        }
    }

    async fn connect_once(
        &self,
        outbound_rx: &mut mpsc::Receiver<PhoenixFrame>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let (ws, _response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|err| GoConnectError::TransientNetwork(format!("directory connect failed: {err}")))?;
        info!(url = %self.url, "connected to directory signaling channel");
        let (mut write, mut read) = ws.split();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = write.close().await;
                    return Ok(());
                }
                frame = outbound_rx.recv() => {
                    match frame {
                        Some(frame) => {
                            let text = serde_json::to_string(&frame)
                                .map_err(|err| GoConnectError::TransientNetwork(err.to_string()))?;
                            write.send(Message::Text(text.into())).await
                                .map_err(|err| GoConnectError::TransientNetwork(err.to_string()))?;
                        }
                        None => return Ok(()),
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_inbound(&text).await;
                        }
                        Some(Ok(Message::Close(_))) | None => return Ok(()),
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            return Err(GoConnectError::TransientNetwork(err.to_string()));
                        }
                    }
                }
            }
        }
    }

    async fn handle_inbound(&self, text: &str) {
        let frame: PhoenixFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(err) => {
                debug!(%err, "dropping malformed directory frame");
                return;
            }
        };

        if let Some(frame_ref) = &frame.frame_ref
            && let Some(tx) = self.pending.lock().await.remove(frame_ref)
        {
            let _ = tx.send(frame.payload);
            return;
        }

        let push = match frame.event.as_str() {
            "offer" => parse_signal(&frame.payload, |from, ufrag, pwd| DirectoryPush::SignalOffer { from, ufrag, pwd }),
            "answer" => parse_signal(&frame.payload, |from, ufrag, pwd| DirectoryPush::SignalAnswer { from, ufrag, pwd }),
            "candidate" => parse_candidate_push(&frame.payload),
            "voice_signal" => parse_voice_push(&frame.payload),
            "tunnel_config" => serde_json::from_value(frame.payload.clone())
                .ok()
                .map(DirectoryPush::TunnelConfig),
            other => {
                debug!(event = other, "ignoring unknown directory push event");
                None
            }
        };

        if let Some(push) = push {
            let _ = self.push_tx.send(push).await;
        }
    }
}

fn parse_signal(
    payload: &Value,
    make: impl Fn(PeerId, String, String) -> DirectoryPush,
) -> Option<DirectoryPush> {
    let from = payload.get("from")?.as_str()?;
    let ufrag = payload.get("ufrag")?.as_str()?;
    let pwd = payload.get("pwd")?.as_str()?;
    Some(make(PeerId::new(from), ufrag.to_string(), pwd.to_string()))
}

fn parse_candidate_push(payload: &Value) -> Option<DirectoryPush> {
    let from = payload.get("from")?.as_str()?;
    let candidate = payload.get("candidate")?.as_str()?;
    Some(DirectoryPush::SignalCandidate {
        from: PeerId::new(from),
        candidate: candidate.to_string(),
    })
}

fn parse_voice_push(payload: &Value) -> Option<DirectoryPush> {
    let from = payload.get("from")?.as_str()?;
    let to = payload.get("to")?.as_str()?;
    let inner = payload.get("payload")?.clone();
    Some(DirectoryPush::VoiceSignal {
        from: PeerId::new(from),
        to: PeerId::new(to),
        payload: inner,
    })
}

/// Adapts the directory WebSocket channel to the `SignalingAdapter`
/// capability the P2P connection manager depends on (spec §4.4 / §9: the
/// signaling adapter is a plain capability, ignorant of the transport
/// underneath).
pub struct DirectorySignaling {
    outbound: mpsc::Sender<PhoenixFrame>,
    network_topic: String,
}

impl DirectorySignaling {
    pub fn new(outbound: mpsc::Sender<PhoenixFrame>, network_id: &str) -> Self {
        Self {
            outbound,
            network_topic: format!("network:{network_id}"),
        }
    }

    async fn push(&self, event: &str, payload: Value) -> Result<()> {
        self.outbound
            .send(PhoenixFrame {
                topic: self.network_topic.clone(),
                event: event.to_string(),
                payload,
                frame_ref: None,
            })
            .await
            .map_err(|_| GoConnectError::TransientNetwork("directory channel closed".into()))
    }
}

#[async_trait]
impl SignalingAdapter for DirectorySignaling {
    async fn send_offer(&self, to_peer: &PeerId, ufrag: &str, pwd: &str) -> Result<()> {
        self.push("offer", serde_json::json!({ "to": to_peer.as_str(), "ufrag": ufrag, "pwd": pwd }))
            .await
    }

    async fn send_answer(&self, to_peer: &PeerId, ufrag: &str, pwd: &str) -> Result<()> {
        self.push("answer", serde_json::json!({ "to": to_peer.as_str(), "ufrag": ufrag, "pwd": pwd }))
            .await
    }

    async fn send_candidate(&self, to_peer: &PeerId, candidate: &str) -> Result<()> {
        self.push("candidate", serde_json::json!({ "to": to_peer.as_str(), "candidate": candidate }))
            .await
    }
}

#[cfg(test)]
#[path = "directory_tests.rs"]
mod tests;
