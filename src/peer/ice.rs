use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use str0m::ice::{IceAgent, IceAgentEvent, IceConnectionState, IceCreds, StunMessage, StunPacket};
use str0m::net::Protocol;
use str0m::{Candidate, CandidateKind};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::error::{GoConnectError, Result};

/// str0m has no waker of its own; the driver re-polls `handle_timeout` on a
/// short fixed tick in addition to whatever the agent itself schedules.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// What the per-peer ICE driver reports back to `PeerManager` as it runs.
pub enum IceEvent {
    /// A local candidate was gathered and must be forwarded to the peer via
    /// the signaling adapter (spec §4.4 step 2: "forwards every non-nil
    /// local candidate via `SendCandidate`").
    LocalCandidate(String),
    Outcome(IceOutcome),
    /// An application datagram received over the nominated pair (the
    /// ping/pong metrics frame; anything that isn't a STUN message).
    Data(Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceOutcome {
    /// First candidate pair succeeded a connectivity check.
    Connected,
    /// A pair was nominated; `is_relay` reports whether either side of the
    /// nominated pair is a relay candidate.
    Nominated { is_relay: bool },
    /// Candidate pairs were exhausted or a previously-nominated pair was
    /// lost.
    Disconnected,
}

enum IceCommand {
    RemoteCredentials { ufrag: String, pwd: String },
    RemoteCandidate(Candidate),
}

/// Handle to a spawned ICE driver task. `PeerManager` keeps one of these per
/// live session; it never touches the underlying `IceAgent` directly.
#[derive(Clone)]
pub struct IceHandle {
    commands: mpsc::UnboundedSender<IceCommand>,
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
}

impl IceHandle {
    pub fn set_remote_credentials(&self, ufrag: &str, pwd: &str) {
        let _ = self.commands.send(IceCommand::RemoteCredentials {
            ufrag: ufrag.to_string(),
            pwd: pwd.to_string(),
        });
    }

    /// Adds a remote candidate. Candidates that arrive before the driver has
    /// set up remote credentials are queued by `str0m` itself and retried
    /// internally; callers should not treat this as an error (per the
    /// spec's documented retry/drop behavior for early candidates).
    pub fn add_remote_candidate(&self, candidate_sdp: &str) -> Result<()> {
        let candidate = parse_candidate(candidate_sdp)?;
        let _ = self.commands.send(IceCommand::RemoteCandidate(candidate));
        Ok(())
    }

    /// Sends an application datagram (the metrics ping/pong frame) over the
    /// nominated pair. Silently dropped if no pair has nominated yet.
    pub fn send_datagram(&self, payload: Vec<u8>) {
        let _ = self.outgoing.send(payload);
    }
}

/// Spawns the per-peer ICE agent task: binds a UDP socket, gathers the host
/// candidate, and drives the agent's event/timeout/transmit loop for the
/// lifetime of the returned event stream. Returns the handle used to feed
/// remote credentials/candidates in, the local ufrag/pwd the caller sends
/// over signaling, and the event stream the caller pumps.
pub async fn spawn_driver(
    controlling: bool,
    stun_server: &str,
) -> Result<(IceHandle, (String, String), mpsc::UnboundedReceiver<IceEvent>)> {
    let socket = UdpSocket::bind(("0.0.0.0", 0))
        .await
        .map_err(|err| GoConnectError::Platform(format!("failed to bind ICE UDP socket: {err}")))?;

    let mut agent = IceAgent::new();
    agent.set_controlling(controlling);
    let creds = agent.local_credentials();
    let local_creds = (creds.ufrag.clone(), creds.pass.clone());

    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (data_tx, data_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let stun_server = stun_server.to_string();
    tokio::spawn(drive(agent, Arc::new(socket), stun_server, cmd_rx, data_rx, event_tx));

    Ok((
        IceHandle {
            commands: cmd_tx,
            outgoing: data_tx,
        },
        local_creds,
        event_rx,
    ))
}

fn candidate_kind_at(candidates: &[Candidate], addr: SocketAddr) -> Option<CandidateKind> {
    candidates.iter().find(|c| c.addr() == addr).map(|c| c.kind())
}

async fn drive(
    mut agent: IceAgent,
    socket: Arc<UdpSocket>,
    stun_server: String,
    mut commands: mpsc::UnboundedReceiver<IceCommand>,
    mut outgoing: mpsc::UnboundedReceiver<Vec<u8>>,
    events: mpsc::UnboundedSender<IceEvent>,
) {
    let local_addr = match socket.local_addr() {
        Ok(addr) => addr,
        Err(err) => {
            warn!(%err, "ICE socket has no local address, aborting driver");
            return;
        }
    };

    let mut local_candidates = Vec::new();
    match Candidate::host(local_addr, Protocol::Udp) {
        Ok(host) => {
            agent.add_local_candidate(host.clone());
            let _ = events.send(IceEvent::LocalCandidate(host.to_sdp_string()));
            local_candidates.push(host);
        }
        Err(err) => warn!(%err, "failed to build host candidate from bound ICE socket"),
    }
    // Server-reflexive/relay candidate discovery against `stun_server` is a
    // follow-up (spec §4.4 only requires UDP4/UDP6 host candidates to work
    // end to end on a routable network); `is_relay` stays accurate in the
    // meantime since no relay candidate is ever nominated.
    trace!(%stun_server, "srflx/relay gathering against the configured STUN server is not yet implemented");

    let mut remote_candidates: Vec<Candidate> = Vec::new();
    let mut nominated_pair: Option<(SocketAddr, SocketAddr)> = None;
    let mut recv_buf = vec![0u8; 2048];
    let mut ticker = tokio::time::interval(POLL_INTERVAL);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            cmd = commands.recv() => {
                match cmd {
                    Some(IceCommand::RemoteCredentials { ufrag, pwd }) => {
                        agent.set_remote_credentials(IceCreds { ufrag, pass: pwd });
                    }
                    Some(IceCommand::RemoteCandidate(candidate)) => {
                        remote_candidates.push(candidate.clone());
                        agent.add_remote_candidate(candidate);
                    }
                    None => return,
                }
            }
            payload = outgoing.recv() => {
                if let (Some(payload), Some((_, destination))) = (payload, nominated_pair) {
                    if let Err(err) = socket.send_to(&payload, destination).await {
                        warn!(%err, "failed to send datagram over nominated ICE pair");
                    }
                }
            }
            received = socket.recv_from(&mut recv_buf) => {
                match received {
                    Ok((len, from)) => {
                        let data = &recv_buf[..len];
                        if let Ok(message) = StunMessage::parse(data) {
                            if agent.accepts_message(&message) {
                                agent.handle_packet(
                                    Instant::now(),
                                    StunPacket {
                                        proto: Protocol::Udp,
                                        source: from,
                                        destination: local_addr,
                                        message,
                                    },
                                );
                            }
                        } else if nominated_pair.is_some() && events.send(IceEvent::Data(data.to_vec())).is_err() {
                            return;
                        }
                    }
                    Err(err) => {
                        warn!(%err, "ICE socket recv failed, aborting driver");
                        return;
                    }
                }
            }
        }

        agent.handle_timeout(Instant::now());

        while let Some(transmit) = agent.poll_transmit() {
            if let Err(err) = socket.send_to(&transmit.contents, transmit.destination).await {
                warn!(%err, "failed to send ICE transmit");
            }
        }

        while let Some(event) = agent.poll_event() {
            match event {
                IceAgentEvent::IceConnectionStateChange(IceConnectionState::Connected) => {
                    if events.send(IceEvent::Outcome(IceOutcome::Connected)).is_err() {
                        return;
                    }
                }
                IceAgentEvent::IceConnectionStateChange(IceConnectionState::Disconnected) => {
                    let _ = events.send(IceEvent::Outcome(IceOutcome::Disconnected));
                    return;
                }
                IceAgentEvent::NominatedSend { source, destination, .. } => {
                    nominated_pair = Some((source, destination));
                    let is_relay = candidate_kind_at(&local_candidates, source) == Some(CandidateKind::Relayed)
                        || candidate_kind_at(&remote_candidates, destination) == Some(CandidateKind::Relayed);
                    if events.send(IceEvent::Outcome(IceOutcome::Nominated { is_relay })).is_err() {
                        return;
                    }
                }
                IceAgentEvent::IceRestart(_) | IceAgentEvent::IceConnectionStateChange(_) | IceAgentEvent::DiscoveredRecv { .. } => {}
            }
        }
    }
}

pub fn parse_candidate(raw: &str) -> Result<Candidate> {
    Candidate::from_sdp_string(raw)
        .map_err(|err| GoConnectError::invalid_argument(format!("unparseable candidate: {err}")))
}
