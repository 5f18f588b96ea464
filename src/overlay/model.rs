use serde::{Deserialize, Serialize};

use crate::ids::{DeviceId, NetworkId, PeerId};

/// Mirrored from the directory service. C5 owns this; created on join,
/// mutated by periodic sync, destroyed on leave.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkMembership {
    pub network_id: NetworkId,
    pub name: String,
    pub cidr: String,
    pub virtual_ip: String,
    pub role: String,
}

/// A single tunnel peer entry as delivered by the directory for a network.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TunnelPeer {
    pub peer_id: PeerId,
    pub public_key: String,
    pub endpoint: Option<String>,
    pub allowed_ips: Vec<String>,
    pub preshared_key: Option<String>,
    pub keepalive_interval_secs: Option<u32>,
    pub friendly_name: String,
    pub hostname: Option<String>,
}

/// Produced by C5 per network and applied atomically to the platform VPN
/// interface. The hostname->IP map here is mirrored into the hosts file
/// managed block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TunnelConfig {
    pub network_id: NetworkId,
    pub interface_name: String,
    pub listen_port: u16,
    pub addresses: Vec<String>,
    pub dns_servers: Vec<String>,
    pub mtu: u32,
    pub peers: Vec<TunnelPeer>,
}

impl TunnelConfig {
    /// `(ip, hostname)` pairs for the hosts-file managed block, skipping
    /// peers without an assigned hostname.
    pub fn host_entries(&self) -> Vec<(String, String)> {
        self.peers
            .iter()
            .filter_map(|p| {
                let hostname = p.hostname.clone()?;
                let ip = p.allowed_ips.first()?.split('/').next()?.to_string();
                Some((ip, hostname))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSession {
    pub id: String,
    pub peer_id: PeerId,
    pub file_path: String,
    pub file_name: String,
    pub file_size: u64,
    pub sent_bytes: u64,
    pub status: TransferStatus,
    pub is_sender: bool,
    pub start_time: i64,
    pub end_time: Option<i64>,
    pub error: Option<String>,
}

impl TransferSession {
    /// `speed = sent_bytes / elapsed_seconds`, `0` when nothing has elapsed.
    pub fn speed_bytes_per_sec(&self, now_unix: i64) -> f64 {
        let elapsed = (now_unix - self.start_time).max(0) as f64;
        if elapsed <= 0.0 {
            return 0.0;
        }
        self.sent_bytes as f64 / elapsed
    }

    /// `eta = remaining_bytes / speed`, `0` once complete or speed is zero.
    pub fn eta_secs(&self, now_unix: i64) -> f64 {
        if self.sent_bytes >= self.file_size {
            return 0.0;
        }
        let speed = self.speed_bytes_per_sec(now_unix);
        if speed <= 0.0 {
            return 0.0;
        }
        let remaining = (self.file_size - self.sent_bytes) as f64;
        remaining / speed
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub from_peer: String,
    pub content: String,
    pub timestamp: i64,
    pub network_id: String,
    pub created_at: i64,
}

/// Discriminant used for `Subscribe` event-type filtering. Kept separate
/// from `Event` so filters can be sent over the wire as a plain string list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    StatusChanged,
    Notification,
    ChatMessage,
    TransferProgress,
    TransferRequest,
    VoiceSignal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    StatusChanged {
        network_id: String,
        connected: bool,
    },
    Notification {
        message: String,
    },
    ChatMessage {
        message: ChatMessage,
    },
    TransferProgress {
        transfer: TransferSession,
    },
    TransferRequest {
        transfer: TransferSession,
    },
    VoiceSignal {
        from_peer: String,
        to_peer: String,
        payload: serde_json::Value,
    },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::StatusChanged { .. } => EventKind::StatusChanged,
            Event::Notification { .. } => EventKind::Notification,
            Event::ChatMessage { .. } => EventKind::ChatMessage,
            Event::TransferProgress { .. } => EventKind::TransferProgress,
            Event::TransferRequest { .. } => EventKind::TransferRequest,
            Event::VoiceSignal { .. } => EventKind::VoiceSignal,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DaemonStatus {
    pub version: String,
    pub registered: bool,
    pub device_id: Option<DeviceId>,
    pub connected_networks: Vec<String>,
    pub uptime_secs: u64,
}

#[cfg(test)]
#[path = "model_tests.rs"]
mod tests;
