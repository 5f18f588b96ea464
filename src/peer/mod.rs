pub mod ice;
pub mod metrics;
pub mod reconnect;
pub mod signaling;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{GoConnectError, Result};
use crate::ids::PeerId;
use crate::overlay::events::EventBus;
use crate::overlay::model::Event;

use ice::{IceEvent, IceHandle, IceOutcome};
use reconnect::ReconnectState;
use signaling::SignalingAdapter;

/// How long an outbound/inbound connect waits for ICE to either nominate a
/// pair or report disconnection before giving up (spec §4.4 step 5 blocks
/// "on the PendingAnswer channel or context cancel" — this is the analogous
/// bound on the ICE establishment that follows the answer).
const ICE_ESTABLISH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerState {
    New,
    Checking,
    Connected,
    Completed,
    Failed,
    Closed,
}

impl PeerState {
    pub fn is_connected(self) -> bool {
        matches!(self, PeerState::Connected | PeerState::Completed)
    }
}

struct Session {
    state: PeerState,
    rtt_ms: Option<f64>,
    is_relay: bool,
    ice: IceHandle,
    cancel: CancellationToken,
}

type Sessions = Arc<RwLock<HashMap<PeerId, Session>>>;

#[derive(Debug, Clone, Serialize)]
pub struct PeerStatus {
    pub connected: bool,
    pub connection_state: PeerState,
    pub latency_ms: Option<f64>,
    pub is_relay: bool,
}

type PendingAnswers = Arc<Mutex<HashMap<PeerId, oneshot::Sender<(String, String)>>>>;

/// Owns exactly one ICE agent per peer and the reconnection loops that
/// recreate failed/closed sessions. All session-affecting operations for a
/// given `peer_id` are serialized through the sessions map's write lock so
/// `connect`, `handle_offer`, and teardown never interleave for that peer.
pub struct PeerManager {
    local_peer_id: PeerId,
    sessions: Sessions,
    pending_answers: PendingAnswers,
    signaling: Arc<dyn SignalingAdapter>,
    events: EventBus,
    stun_server: String,
}

impl PeerManager {
    pub fn new(
        local_peer_id: PeerId,
        signaling: Arc<dyn SignalingAdapter>,
        events: EventBus,
        stun_server: String,
    ) -> Self {
        Self {
            local_peer_id,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            pending_answers: Arc::new(Mutex::new(HashMap::new())),
            signaling,
            events,
            stun_server,
        }
    }

    /// Outbound `Connect(ctx, peer_id)` per the P2P manager's connect
    /// protocol: reject if a session already exists, create a controlling
    /// ICE agent, install a rendezvous slot, send the offer, then block on
    /// the answer or cancellation.
    pub async fn connect(&self, peer_id: &PeerId) -> Result<()> {
        {
            let sessions = self.sessions.read().await;
            if sessions.contains_key(peer_id) {
                return Err(GoConnectError::already_exists(peer_id.as_str()));
            }
        }

        debug!(local = %self.local_peer_id, %peer_id, "initiating outbound ICE connect");

        let (ice, (local_ufrag, local_pwd), ice_events) = ice::spawn_driver(true, &self.stun_server).await?;
        let cancel = CancellationToken::new();
        let (ready_tx, ready_rx) = oneshot::channel();

        {
            let mut sessions = self.sessions.write().await;
            sessions.insert(
                peer_id.clone(),
                Session {
                    state: PeerState::Checking,
                    rtt_ms: None,
                    is_relay: false,
                    ice,
                    cancel: cancel.clone(),
                },
            );
        }
        self.spawn_ice_pump(peer_id.clone(), ice_events, Some(ready_tx));

        let (answer_tx, answer_rx) = oneshot::channel();
        self.pending_answers
            .lock()
            .await
            .insert(peer_id.clone(), answer_tx);

        self.signaling
            .send_offer(peer_id, &local_ufrag, &local_pwd)
            .await?;

        tokio::select! {
            answer = answer_rx => {
                match answer {
                    Ok((remote_ufrag, remote_pwd)) => self.dial(peer_id, &remote_ufrag, &remote_pwd, ready_rx).await,
                    Err(_) => {
                        self.teardown(peer_id).await;
                        Err(GoConnectError::TransientNetwork(format!(
                            "pending answer slot dropped for {peer_id}"
                        )))
                    }
                }
            }
            _ = cancel.cancelled() => {
                self.pending_answers.lock().await.remove(peer_id);
                self.teardown(peer_id).await;
                Err(GoConnectError::TransientNetwork(format!("connect to {peer_id} cancelled")))
            }
        }
    }

    /// Step 6 of the outbound connect protocol: `Dial(ctx, remote_ufrag,
    /// remote_pwd)`. Success is conditioned on the ICE driver actually
    /// nominating a candidate pair, not assumed — `ready_rx` resolves once
    /// the driver's first decisive outcome (nominated or disconnected)
    /// arrives, or the attempt times out.
    async fn dial(
        &self,
        peer_id: &PeerId,
        remote_ufrag: &str,
        remote_pwd: &str,
        ready_rx: oneshot::Receiver<bool>,
    ) -> Result<()> {
        {
            let sessions = self.sessions.read().await;
            if let Some(session) = sessions.get(peer_id) {
                session.ice.set_remote_credentials(remote_ufrag, remote_pwd);
            }
        }

        match tokio::time::timeout(ICE_ESTABLISH_TIMEOUT, ready_rx).await {
            Ok(Ok(true)) => {
                self.spawn_metrics_loop(peer_id.clone());
                Ok(())
            }
            Ok(Ok(false)) | Ok(Err(_)) => {
                self.teardown(peer_id).await;
                Err(GoConnectError::TransientNetwork(format!("ICE failed for {peer_id}")))
            }
            Err(_) => {
                self.teardown(peer_id).await;
                Err(GoConnectError::TransientNetwork(format!(
                    "ICE establishment timed out for {peer_id}"
                )))
            }
        }
    }

    /// Inbound `handleOffer` — symmetric to `connect` but controlled, and it
    /// answers immediately instead of waiting for one.
    pub async fn handle_offer(
        &self,
        peer_id: &PeerId,
        remote_ufrag: &str,
        remote_pwd: &str,
    ) -> Result<()> {
        {
            let sessions = self.sessions.read().await;
            if sessions.contains_key(peer_id) {
                return Err(GoConnectError::already_exists(peer_id.as_str()));
            }
        }

        let (ice, (local_ufrag, local_pwd), ice_events) = ice::spawn_driver(false, &self.stun_server).await?;
        ice.set_remote_credentials(remote_ufrag, remote_pwd);
        let cancel = CancellationToken::new();
        let (ready_tx, ready_rx) = oneshot::channel();

        {
            let mut sessions = self.sessions.write().await;
            if sessions.contains_key(peer_id) {
                return Err(GoConnectError::already_exists(peer_id.as_str()));
            }
            sessions.insert(
                peer_id.clone(),
                Session {
                    state: PeerState::Checking,
                    rtt_ms: None,
                    is_relay: false,
                    ice,
                    cancel,
                },
            );
        }
        self.spawn_ice_pump(peer_id.clone(), ice_events, Some(ready_tx));

        self.signaling
            .send_answer(peer_id, &local_ufrag, &local_pwd)
            .await?;

        match tokio::time::timeout(ICE_ESTABLISH_TIMEOUT, ready_rx).await {
            Ok(Ok(true)) => {
                self.spawn_metrics_loop(peer_id.clone());
                Ok(())
            }
            Ok(Ok(false)) | Ok(Err(_)) => {
                self.teardown(peer_id).await;
                Err(GoConnectError::TransientNetwork(format!("ICE failed for {peer_id}")))
            }
            Err(_) => {
                self.teardown(peer_id).await;
                Err(GoConnectError::TransientNetwork(format!(
                    "ICE establishment timed out for {peer_id}"
                )))
            }
        }
    }

    /// Resolves a pending answer slot for an outbound `connect`.
    pub async fn handle_answer(&self, peer_id: &PeerId, ufrag: &str, pwd: &str) {
        if let Some(tx) = self.pending_answers.lock().await.remove(peer_id) {
            let _ = tx.send((ufrag.to_string(), pwd.to_string()));
        } else {
            debug!(%peer_id, "answer arrived with no pending connect; dropping");
        }
    }

    /// Forwards a remote candidate. Candidates that arrive before the
    /// session exists are dropped silently, as documented for the inbound
    /// accept protocol.
    pub async fn handle_candidate(&self, peer_id: &PeerId, candidate_sdp: &str) -> Result<()> {
        let sessions = self.sessions.read().await;
        match sessions.get(peer_id) {
            Some(session) => {
                if let Err(err) = session.ice.add_remote_candidate(candidate_sdp) {
                    warn!(%peer_id, %err, "dropping unparseable remote candidate");
                }
                Ok(())
            }
            None => {
                debug!(%peer_id, "remote candidate arrived before session existed; dropping");
                Ok(())
            }
        }
    }

    /// Pumps one session's ICE event stream for its lifetime: forwards
    /// gathered local candidates over signaling, applies connection-state
    /// and nomination outcomes to the session map, and handles the in-band
    /// ping/pong metrics frame (spec §4.4). `ready_tx`, if still present,
    /// resolves the first decisive outcome back to whichever of
    /// `connect`/`handle_offer` is waiting on it.
    fn spawn_ice_pump(
        &self,
        peer_id: PeerId,
        mut ice_events: mpsc::UnboundedReceiver<IceEvent>,
        mut ready_tx: Option<oneshot::Sender<bool>>,
    ) {
        let sessions = self.sessions.clone();
        let signaling = self.signaling.clone();
        let events = self.events.clone();

        tokio::spawn(async move {
            while let Some(event) = ice_events.recv().await {
                match event {
                    IceEvent::LocalCandidate(candidate) => {
                        if let Err(err) = signaling.send_candidate(&peer_id, &candidate).await {
                            warn!(%peer_id, %err, "failed to forward local ICE candidate");
                        }
                    }
                    IceEvent::Outcome(IceOutcome::Connected) => {
                        if let Some(session) = sessions.write().await.get_mut(&peer_id) {
                            session.state = PeerState::Connected;
                        }
                    }
                    IceEvent::Outcome(IceOutcome::Nominated { is_relay }) => {
                        if let Some(session) = sessions.write().await.get_mut(&peer_id) {
                            session.state = PeerState::Completed;
                            session.is_relay = is_relay;
                        }
                        events
                            .publish(Event::StatusChanged {
                                network_id: String::new(),
                                connected: true,
                            })
                            .await;
                        if let Some(tx) = ready_tx.take() {
                            let _ = tx.send(true);
                        }
                    }
                    IceEvent::Outcome(IceOutcome::Disconnected) => {
                        if let Some(session) = sessions.write().await.get_mut(&peer_id) {
                            session.state = PeerState::Failed;
                        }
                        events
                            .publish(Event::StatusChanged {
                                network_id: String::new(),
                                connected: false,
                            })
                            .await;
                        if let Some(tx) = ready_tx.take() {
                            let _ = tx.send(false);
                        }
                        return;
                    }
                    IceEvent::Data(payload) => {
                        let Some((tag, ts)) = metrics::decode_frame(&payload) else {
                            continue;
                        };
                        match tag {
                            metrics::FRAME_PING => {
                                if let Some(session) = sessions.read().await.get(&peer_id) {
                                    session.ice.send_datagram(metrics::encode_pong(ts).to_vec());
                                }
                            }
                            metrics::FRAME_PONG => {
                                store_rtt(&sessions, &peer_id, metrics::compute_rtt_ms(ts)).await;
                            }
                            _ => {}
                        }
                    }
                }
            }
        });
    }

    pub async fn teardown(&self, peer_id: &PeerId) {
        let removed = self.sessions.write().await.remove(peer_id);
        self.pending_answers.lock().await.remove(peer_id);
        if let Some(session) = removed {
            session.cancel.cancel();
            self.events
                .publish(Event::StatusChanged {
                    network_id: String::new(),
                    connected: false,
                })
                .await;
        }
    }

    pub async fn is_connected(&self, peer_id: &PeerId) -> bool {
        self.sessions
            .read()
            .await
            .get(peer_id)
            .map(|s| s.state.is_connected())
            .unwrap_or(false)
    }

    pub async fn status(&self, peer_id: &PeerId) -> Option<PeerStatus> {
        let sessions = self.sessions.read().await;
        sessions.get(peer_id).map(|s| PeerStatus {
            connected: s.state.is_connected(),
            connection_state: s.state,
            latency_ms: s.rtt_ms,
            is_relay: s.is_relay,
        })
    }

    pub async fn list_peer_ids(&self) -> Vec<PeerId> {
        self.sessions.read().await.keys().cloned().collect()
    }

    /// Sends the `0x01`+timestamp ping frame every `PING_INTERVAL` over the
    /// nominated pair until the session is no longer connected (spec §4.4
    /// metrics loop). The echoed pong and resulting RTT store are handled
    /// by `spawn_ice_pump`, which owns the receive side of the same socket.
    fn spawn_metrics_loop(&self, peer_id: PeerId) {
        let sessions = self.sessions.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(metrics::PING_INTERVAL);
            loop {
                interval.tick().await;
                let ice = {
                    let guard = sessions.read().await;
                    match guard.get(&peer_id) {
                        Some(session) if session.state.is_connected() => Some(session.ice.clone()),
                        _ => None,
                    }
                };
                let Some(ice) = ice else { break };
                ice.send_datagram(metrics::encode_ping().to_vec());
            }
        });
    }

    pub async fn record_rtt(&self, peer_id: &PeerId, rtt_ms: f64) {
        store_rtt(&self.sessions, peer_id, rtt_ms).await;
    }

    /// Drives the reconnect supervisor for a peer with no live session:
    /// retries with exponential backoff until `is_connected` becomes true.
    pub async fn run_reconnect_loop(self: Arc<Self>, peer_id: PeerId, cancel: CancellationToken) {
        let mut state = ReconnectState::immediate(Instant::now());
        loop {
            if cancel.is_cancelled() {
                return;
            }
            if self.is_connected(&peer_id).await {
                return;
            }
            let now = Instant::now();
            if !state.is_due(now) {
                let remaining = state.next_attempt_at.saturating_duration_since(now);
                tokio::select! {
                    _ = tokio::time::sleep(remaining) => {}
                    _ = cancel.cancelled() => return,
                }
                continue;
            }
            match self.connect(&peer_id).await {
                Ok(()) => {
                    info!(%peer_id, "reconnect succeeded");
                    return;
                }
                Err(err) => {
                    let wait = state.schedule_failure(Instant::now());
                    warn!(%peer_id, %err, next_attempt_in_secs = wait.as_secs(), "reconnect attempt failed");
                }
            }
        }
    }
}

async fn store_rtt(sessions: &Sessions, peer_id: &PeerId, rtt_ms: f64) {
    if let Some(session) = sessions.write().await.get_mut(peer_id) {
        session.rtt_ms = Some(rtt_ms);
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
