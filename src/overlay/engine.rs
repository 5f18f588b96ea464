use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;

use crate::config::{Config, Paths};
use crate::error::{GoConnectError, Result};
use crate::identity::Identity;
use crate::ids::{DeviceId, NetworkId, PeerId};
use crate::peer::{PeerManager, PeerStatus};

use super::chat::ChatStore;
use super::directory::{DirectoryClient, DirectoryPush, DirectorySignaling};
use super::events::EventBus;
use super::hosts::HostsFile;
use super::model::{ChatMessage, DaemonStatus, Event, NetworkMembership, TunnelConfig};
use super::transfer::TransferManager;
use super::tunnel::TunnelConfigurator;

/// Attempts the auto-connect loop makes before giving up (spec §4.5: every
/// `AUTO_CONNECT_INTERVAL` up to `AUTO_CONNECT_MAX_ATTEMPTS`).
pub const AUTO_CONNECT_MAX_ATTEMPTS: u32 = 12;
pub const AUTO_CONNECT_INTERVAL: Duration = Duration::from_secs(5);

const SIGNALING_TOPIC: &str = "signaling";

/// The overlay engine (C5): the only component allowed to mutate the
/// tunnel interface and the only writer of the event fan-out. Owns the
/// chat store, transfer sessions, the applied `TunnelConfig` per network,
/// and drives directory sync. The P2P session manager is created on
/// `connect` (bound to that connection's directory signaling channel) and
/// torn down on `disconnect`, rather than held open across reconnects.
pub struct Engine {
    paths: Paths,
    config: RwLock<Config>,
    identity: RwLock<Identity>,
    events: EventBus,
    peers: RwLock<Option<Arc<PeerManager>>>,
    chat: Arc<ChatStore>,
    transfers: Arc<TransferManager>,
    hosts: Arc<HostsFile>,
    tunnel: TunnelConfigurator,
    networks: RwLock<HashMap<NetworkId, NetworkMembership>>,
    applied: RwLock<HashMap<NetworkId, TunnelConfig>>,
    directory: RwLock<Option<Arc<DirectoryClient>>>,
    started_at: RwLock<Option<Instant>>,
    connected: RwLock<bool>,
    stun_server: String,
}

impl Engine {
    pub async fn new(
        paths: Paths,
        config: Config,
        identity: Identity,
        events: EventBus,
    ) -> Result<Self> {
        let chat = ChatStore::open(&paths.chat_db)
            .await
            .map_err(|err| GoConnectError::Platform(err.to_string()))?;
        let stun_server = config.p2p.stun_server.clone();
        let hosts_path = default_hosts_path();

        Ok(Self {
            paths,
            config: RwLock::new(config),
            identity: RwLock::new(identity),
            events: events.clone(),
            peers: RwLock::new(None),
            chat: Arc::new(chat),
            transfers: Arc::new(TransferManager::new(events)),
            hosts: Arc::new(HostsFile::new(hosts_path)),
            tunnel: TunnelConfigurator::new(),
            networks: RwLock::new(HashMap::new()),
            applied: RwLock::new(HashMap::new()),
            directory: RwLock::new(None),
            started_at: RwLock::new(None),
            connected: RwLock::new(false),
            stun_server,
        })
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn chat(&self) -> &Arc<ChatStore> {
        &self.chat
    }

    pub fn transfers(&self) -> &Arc<TransferManager> {
        &self.transfers
    }

    /// `Start`/`Stop` own the long-lived worker tasks. `start` is
    /// idempotent; calling it twice just resets the uptime clock and spawns
    /// a second (harmless, racing) auto-connect attempt.
    pub async fn start(self: &Arc<Self>, cancel: CancellationToken) {
        *self.started_at.write().await = Some(Instant::now());

        let auto_connect_engine = self.clone();
        let auto_connect_cancel = cancel.clone();
        tokio::spawn(async move { auto_connect_engine.auto_connect_loop(auto_connect_cancel).await });

        let sync_engine = self.clone();
        tokio::spawn(async move { sync_engine.directory_sync_loop(cancel).await });
    }

    pub async fn stop(&self) {
        self.disconnect().await;
        if let Err(err) = self.chat.checkpoint_and_close().await {
            warn!(%err, "failed to checkpoint chat store on shutdown");
        }
    }

    /// `Connect` -- idempotent. Opens the directory signaling/sync channel,
    /// stands up the P2P session manager bound to it, and runs an initial
    /// sync across every joined network.
    pub async fn connect(&self) -> Result<()> {
        if *self.connected.read().await {
            return Ok(());
        }

        let directory_url = {
            let config = self.config.read().await;
            config
                .directory_url()
                .ok_or_else(|| GoConnectError::Config("no server.url configured".into()))?
                .to_string()
        };
        let auth_token = self
            .identity
            .read()
            .await
            .retrieve_auth_token()
            .map_err(|err| GoConnectError::Auth(err.to_string()))?
            .ok_or_else(|| GoConnectError::Auth("no auth token stored".into()))?;

        let url = Url::parse(&directory_url)
            .map_err(|err| GoConnectError::Config(format!("invalid server.url: {err}")))?;
        let (client, outbound_rx, mut push_rx) = DirectoryClient::new(url, auth_token);
        let client = Arc::new(client);
        *self.directory.write().await = Some(client.clone());

        let run_client = client.clone();
        let run_cancel = CancellationToken::new();
        tokio::spawn(async move { run_client.run(outbound_rx, run_cancel).await });

        let local_peer_id = PeerId::new(
            self.identity
                .read()
                .await
                .device_id()
                .unwrap_or("self")
                .to_string(),
        );
        let signaling: Arc<dyn crate::peer::signaling::SignalingAdapter> = Arc::new(
            DirectorySignaling::new(client.outbound_sender(), SIGNALING_TOPIC),
        );
        let peer_manager = Arc::new(PeerManager::new(
            local_peer_id,
            signaling,
            self.events.clone(),
            self.stun_server.clone(),
        ));
        *self.peers.write().await = Some(peer_manager.clone());

        let events = self.events.clone();
        tokio::spawn(async move {
            while let Some(push) = push_rx.recv().await {
                match push {
                    DirectoryPush::SignalOffer { from, ufrag, pwd } => {
                        if let Err(err) = peer_manager.handle_offer(&from, &ufrag, &pwd).await {
                            warn!(%from, %err, "failed to handle inbound offer");
                        }
                    }
                    DirectoryPush::SignalAnswer { from, ufrag, pwd } => {
                        peer_manager.handle_answer(&from, &ufrag, &pwd).await;
                    }
                    DirectoryPush::SignalCandidate { from, candidate } => {
                        if let Err(err) = peer_manager.handle_candidate(&from, &candidate).await {
                            warn!(%from, %err, "failed to handle inbound candidate");
                        }
                    }
                    DirectoryPush::VoiceSignal { from, to, payload } => {
                        events
                            .publish(Event::VoiceSignal {
                                from_peer: from.to_string(),
                                to_peer: to.to_string(),
                                payload,
                            })
                            .await;
                    }
                    // Per-network tunnel config is pulled by the sync loop's
                    // own request/reply round trip, not pushed unsolicited;
                    // an out-of-band push just means "something changed,
                    // re-sync soon" and is handled by the next periodic tick.
                    DirectoryPush::TunnelConfig(_) => {}
                }
            }
        });

        *self.connected.write().await = true;
        self.sync_all().await?;
        self.events
            .publish(Event::StatusChanged {
                network_id: String::new(),
                connected: true,
            })
            .await;
        Ok(())
    }

    /// `Disconnect` -- tears down every applied tunnel interface, clears the
    /// hosts-file managed block, and drops all P2P sessions.
    pub async fn disconnect(&self) {
        let network_ids: Vec<NetworkId> = self.applied.read().await.keys().cloned().collect();
        for network_id in network_ids {
            if let Some(config) = self.applied.write().await.remove(&network_id) {
                let _ = self.tunnel.teardown(&config.interface_name).await;
            }
        }
        let _ = self.hosts.update(&[]).await;

        if let Some(peer_manager) = self.peers.write().await.take() {
            for peer_id in peer_manager.list_peer_ids().await {
                peer_manager.teardown(&peer_id).await;
            }
        }

        *self.directory.write().await = None;
        *self.connected.write().await = false;
        self.events
            .publish(Event::StatusChanged {
                network_id: String::new(),
                connected: false,
            })
            .await;
    }

    /// Auto-connect loop (spec §4.5): at startup, every `AUTO_CONNECT_INTERVAL`
    /// up to `AUTO_CONNECT_MAX_ATTEMPTS`, if a device id and auth token are
    /// both present, invoke `connect`. Exits on success, on cancellation, or
    /// after exhausting its attempt budget.
    async fn auto_connect_loop(&self, cancel: CancellationToken) {
        let auto_connect_enabled = self.config.read().await.settings.auto_connect;
        if !auto_connect_enabled {
            return;
        }

        for attempt in 1..=AUTO_CONNECT_MAX_ATTEMPTS {
            if cancel.is_cancelled() {
                return;
            }

            let has_credentials = {
                let identity = self.identity.read().await;
                identity.device_id().is_some()
                    && identity.retrieve_auth_token().ok().flatten().is_some()
            };
            if has_credentials {
                match self.connect().await {
                    Ok(()) => {
                        info!(attempt, "auto-connect succeeded");
                        return;
                    }
                    Err(err) => warn!(attempt, %err, "auto-connect attempt failed"),
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(AUTO_CONNECT_INTERVAL) => {}
                _ = cancel.cancelled() => return,
            }
        }
        warn!(
            attempts = AUTO_CONNECT_MAX_ATTEMPTS,
            "auto-connect exhausted retry budget"
        );
    }

    /// Directory sync (spec §4.5 "Directory sync — periodic", §5's
    /// standalone "directory sync" task): while connected, re-pulls and
    /// re-applies every joined network's tunnel config on
    /// `daemon.health_check_interval`, independent of `connect`'s own
    /// initial sync and the resume-detection poke, so directory-side
    /// config changes are picked up without waiting for either.
    async fn directory_sync_loop(&self, cancel: CancellationToken) {
        let interval = Duration::from_secs(self.config.read().await.daemon.health_check_interval.max(1));
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    if !*self.connected.read().await {
                        continue;
                    }
                    if let Err(err) = self.sync_all().await {
                        warn!(%err, "periodic directory sync failed");
                    }
                }
            }
        }
    }

    /// Pulled by the resume-detection poke in C1: forces an immediate
    /// re-sync across all joined networks without tearing down existing
    /// peer sessions.
    pub async fn poke_reconnect(&self) {
        if let Err(err) = self.sync_all().await {
            warn!(%err, "resume-triggered directory sync failed");
        }
    }

    async fn sync_all(&self) -> Result<()> {
        let network_ids: Vec<NetworkId> = self.networks.read().await.keys().cloned().collect();
        for network_id in network_ids {
            if let Err(err) = self.sync_network(&network_id).await {
                warn!(%network_id, %err, "directory sync failed for network");
            }
        }
        Ok(())
    }

    /// Directory sync for one network: pull the tunnel config, diff against
    /// what's applied, and apply it plus the union of all networks' host
    /// entries if it changed.
    async fn sync_network(&self, network_id: &NetworkId) -> Result<()> {
        let directory = self.require_directory().await?;

        let new_config = directory.sync_tunnel_config(network_id.as_str()).await?;

        let previous = self.applied.read().await.get(network_id).cloned();
        if previous.as_ref() == Some(&new_config) {
            return Ok(());
        }

        self.tunnel
            .apply(&new_config)
            .await
            .map_err(|err| GoConnectError::Platform(err.to_string()))?;

        let host_entries = self.all_host_entries_with(network_id, &new_config).await;
        self.hosts
            .update(&host_entries)
            .await
            .map_err(|err| GoConnectError::Platform(err.to_string()))?;

        self.applied
            .write()
            .await
            .insert(network_id.clone(), new_config);

        self.events
            .publish(Event::StatusChanged {
                network_id: network_id.to_string(),
                connected: true,
            })
            .await;
        Ok(())
    }

    async fn all_host_entries_with(
        &self,
        network_id: &NetworkId,
        updated: &TunnelConfig,
    ) -> Vec<(String, String)> {
        let mut applied = self.applied.read().await.clone();
        applied.insert(network_id.clone(), updated.clone());
        applied.values().flat_map(|c| c.host_entries()).collect()
    }

    // --- Network control-plane operations. Business policy (membership
    // limits, invite validity, tenant quotas) is enforced server-side per
    // spec §1 non-goals; the engine just relays and caches the result. ---

    pub async fn create_network(&self, name: &str) -> Result<NetworkMembership> {
        require_non_empty(name, "name")?;
        let directory = self.require_directory().await?;
        let reply = directory
            .request("directory", "create_network", serde_json::json!({ "name": name }))
            .await?;
        let membership: NetworkMembership = serde_json::from_value(reply).map_err(|err| {
            GoConnectError::TransientNetwork(format!("malformed create_network reply: {err}"))
        })?;
        self.networks
            .write()
            .await
            .insert(membership.network_id.clone(), membership.clone());
        Ok(membership)
    }

    pub async fn join_network(&self, invite_code: &str) -> Result<NetworkMembership> {
        require_non_empty(invite_code, "invite_code")?;
        let directory = self.require_directory().await?;
        let reply = directory
            .request(
                "directory",
                "join_network",
                serde_json::json!({ "invite_code": invite_code }),
            )
            .await?;
        let membership: NetworkMembership = serde_json::from_value(reply).map_err(|err| {
            GoConnectError::TransientNetwork(format!("malformed join_network reply: {err}"))
        })?;
        self.networks
            .write()
            .await
            .insert(membership.network_id.clone(), membership.clone());
        self.sync_network(&membership.network_id).await?;
        Ok(membership)
    }

    pub async fn list_networks(&self) -> Vec<NetworkMembership> {
        self.networks.read().await.values().cloned().collect()
    }

    pub async fn generate_invite(
        &self,
        network_id: &str,
        max_uses: u32,
        expires_hours: u32,
    ) -> Result<String> {
        require_non_empty(network_id, "network_id")?;
        let directory = self.require_directory().await?;
        let reply = directory
            .request(
                "directory",
                "generate_invite",
                serde_json::json!({
                    "network_id": network_id,
                    "max_uses": max_uses,
                    "expires_hours": expires_hours,
                }),
            )
            .await?;
        reply
            .get("invite_code")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| GoConnectError::TransientNetwork("malformed invite reply".into()))
    }

    pub async fn leave_network(&self, network_id: &str) -> Result<()> {
        require_non_empty(network_id, "network_id")?;
        let id = NetworkId::new(network_id);
        let removed = self.networks.write().await.remove(&id);
        if removed.is_none() {
            return Err(GoConnectError::not_found(format!("network {network_id}")));
        }
        if let Some(config) = self.applied.write().await.remove(&id) {
            let _ = self.tunnel.teardown(&config.interface_name).await;
        }
        if let Ok(directory) = self.require_directory().await {
            let _ = directory
                .request(
                    "directory",
                    "leave_network",
                    serde_json::json!({ "network_id": network_id }),
                )
                .await;
        }
        Ok(())
    }

    pub async fn delete_network(&self, network_id: &str) -> Result<()> {
        self.leave_network(network_id).await
    }

    async fn require_directory(&self) -> Result<Arc<DirectoryClient>> {
        self.directory
            .read()
            .await
            .clone()
            .ok_or_else(|| GoConnectError::TransientNetwork("not connected to directory".into()))
    }

    async fn require_peers(&self) -> Result<Arc<PeerManager>> {
        self.peers
            .read()
            .await
            .clone()
            .ok_or_else(|| GoConnectError::PeerState("not connected".into()))
    }

    // --- Peer operations ---

    pub async fn p2p_connect(&self, peer_id: &str) -> Result<()> {
        require_non_empty(peer_id, "peer_id")?;
        self.require_peers().await?.connect(&PeerId::new(peer_id)).await
    }

    pub async fn get_peers(&self) -> Vec<PeerId> {
        match self.peers.read().await.clone() {
            Some(peers) => peers.list_peer_ids().await,
            None => Vec::new(),
        }
    }

    pub async fn get_peer(&self, peer_id: &str) -> Result<PeerStatus> {
        self.require_peers()
            .await?
            .status(&PeerId::new(peer_id))
            .await
            .ok_or_else(|| GoConnectError::not_found(format!("peer {peer_id}")))
    }

    pub async fn kick_peer(&self, network_id: &str, peer_id: &str, reason: &str) -> Result<()> {
        require_non_empty(network_id, "network_id")?;
        require_non_empty(peer_id, "peer_id")?;
        let directory = self.require_directory().await?;
        directory
            .request(
                "directory",
                "kick_peer",
                serde_json::json!({ "network_id": network_id, "peer_id": peer_id, "reason": reason }),
            )
            .await?;
        if let Some(peers) = self.peers.read().await.clone() {
            peers.teardown(&PeerId::new(peer_id)).await;
        }
        Ok(())
    }

    pub async fn ban_peer(&self, network_id: &str, peer_id: &str) -> Result<()> {
        require_non_empty(network_id, "network_id")?;
        require_non_empty(peer_id, "peer_id")?;
        let directory = self.require_directory().await?;
        directory
            .request(
                "directory",
                "ban_peer",
                serde_json::json!({ "network_id": network_id, "peer_id": peer_id }),
            )
            .await?;
        if let Some(peers) = self.peers.read().await.clone() {
            peers.teardown(&PeerId::new(peer_id)).await;
        }
        Ok(())
    }

    pub async fn unban_peer(&self, network_id: &str, peer_id: &str) -> Result<()> {
        require_non_empty(network_id, "network_id")?;
        require_non_empty(peer_id, "peer_id")?;
        let directory = self.require_directory().await?;
        directory
            .request(
                "directory",
                "unban_peer",
                serde_json::json!({ "network_id": network_id, "peer_id": peer_id }),
            )
            .await?;
        Ok(())
    }

    // --- Chat ---

    pub async fn send_chat_message(
        &self,
        from: &str,
        content: &str,
        network_id: &str,
    ) -> Result<ChatMessage> {
        require_non_empty(content, "content")?;
        require_non_empty(network_id, "network_id")?;
        let message = ChatMessage {
            id: String::new(),
            from_peer: from.to_string(),
            content: content.to_string(),
            timestamp: now_unix(),
            network_id: network_id.to_string(),
            created_at: 0,
        };
        let saved = self
            .chat
            .save(message)
            .await
            .map_err(|err| GoConnectError::Platform(err.to_string()))?;
        self.events
            .publish(Event::ChatMessage {
                message: saved.clone(),
            })
            .await;
        Ok(saved)
    }

    pub async fn list_chat_messages(
        &self,
        network_id: &str,
        limit: usize,
        before_id: &str,
    ) -> Result<Vec<ChatMessage>> {
        self.chat
            .list(network_id, limit, before_id)
            .await
            .map_err(|err| GoConnectError::Platform(err.to_string()))
    }

    // --- Transfers ---

    pub async fn send_file_request(
        &self,
        peer_id: &str,
        file_path: &str,
        file_name: &str,
        file_size: u64,
    ) -> Result<super::model::TransferSession> {
        require_non_empty(peer_id, "peer_id")?;
        self.transfers
            .request_send(
                PeerId::new(peer_id),
                file_path.to_string(),
                file_name.to_string(),
                file_size,
            )
            .await
    }

    // --- Voice ---

    pub async fn send_voice_signal(&self, from_peer: &str, to_peer: &str, payload: Value) -> Result<()> {
        require_non_empty(to_peer, "to_peer")?;
        let directory = self.require_directory().await?;
        directory
            .request(
                "directory",
                "voice_signal",
                serde_json::json!({ "from": from_peer, "to": to_peer, "payload": payload }),
            )
            .await?;
        Ok(())
    }

    // --- Status ---

    pub async fn status(&self) -> DaemonStatus {
        let identity = self.identity.read().await;
        let uptime_secs = self
            .started_at
            .read()
            .await
            .map(|t| t.elapsed().as_secs())
            .unwrap_or(0);
        DaemonStatus {
            version: env!("CARGO_PKG_VERSION").to_string(),
            registered: identity.device_id().is_some(),
            device_id: identity.device_id().map(DeviceId::new),
            connected_networks: self
                .networks
                .read()
                .await
                .keys()
                .map(|id| id.to_string())
                .collect(),
            uptime_secs,
        }
    }

    pub async fn update_device_id(&self, device_id: String) -> Result<()> {
        let mut identity = self.identity.write().await;
        identity
            .update_device_id(&self.paths, device_id)
            .map_err(|err| GoConnectError::Fatal(err.to_string()))
    }

    /// `Register` -- the HTTP bridge's one-shot pairing call: stores the
    /// server-assigned device id and bearer token so the auto-connect loop
    /// can pick them up on its next tick.
    pub async fn register(&self, device_id: String, auth_token: String) -> Result<()> {
        require_non_empty(&device_id, "device_id")?;
        require_non_empty(&auth_token, "auth_token")?;
        {
            let identity = self.identity.read().await;
            identity
                .store_auth_token(&auth_token)
                .map_err(|err| GoConnectError::Auth(err.to_string()))?;
        }
        self.update_device_id(device_id).await
    }

    pub async fn get_config(&self) -> Config {
        self.config.read().await.clone()
    }

    pub async fn update_config(&self, config: Config) -> Result<()> {
        config
            .save(&self.paths.config)
            .await
            .map_err(|err| GoConnectError::Config(err.to_string()))?;
        *self.config.write().await = config;
        Ok(())
    }
}

fn require_non_empty(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(GoConnectError::invalid_argument(format!(
            "{field} must not be empty"
        )));
    }
    Ok(())
}

fn default_hosts_path() -> std::path::PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::path::PathBuf::from(r"C:\Windows\System32\drivers\etc\hosts")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::path::PathBuf::from("/etc/hosts")
    }
}

fn now_unix() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
