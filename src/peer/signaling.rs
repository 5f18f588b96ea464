use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};

use crate::error::Result;
use crate::ids::PeerId;

/// What arrives over the signaling channel, keyed by the peer that sent it.
#[derive(Debug, Clone)]
pub enum SignalMessage {
    Offer { ufrag: String, pwd: String },
    Answer { ufrag: String, pwd: String },
    Candidate { candidate: String },
}

/// Abstract capability for exchanging ICE handshake material with a peer.
/// Deliberately ignorant of the transport underneath: the loopback HTTP
/// bridge, a directory WebSocket, or an in-memory channel for tests can all
/// implement this the same way. `PeerManager` depends only on this trait.
#[async_trait]
pub trait SignalingAdapter: Send + Sync {
    async fn send_offer(&self, to_peer: &PeerId, ufrag: &str, pwd: &str) -> Result<()>;
    async fn send_answer(&self, to_peer: &PeerId, ufrag: &str, pwd: &str) -> Result<()>;
    async fn send_candidate(&self, to_peer: &PeerId, candidate: &str) -> Result<()>;
}

/// In-memory loopback used by tests and by two daemons sharing a process in
/// integration tests: messages sent "to" a peer id are delivered to whatever
/// inbox was registered under that id.
#[derive(Clone, Default)]
pub struct InMemorySignaling {
    inboxes: Arc<Mutex<HashMap<PeerId, mpsc::Sender<(PeerId, SignalMessage)>>>>,
}

impl InMemorySignaling {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, peer_id: PeerId) -> mpsc::Receiver<(PeerId, SignalMessage)> {
        let (tx, rx) = mpsc::channel(64);
        self.inboxes.lock().await.insert(peer_id, tx);
        rx
    }

    async fn deliver(&self, from: &PeerId, to: &PeerId, msg: SignalMessage) -> Result<()> {
        let inboxes = self.inboxes.lock().await;
        if let Some(tx) = inboxes.get(to) {
            let _ = tx.send((from.clone(), msg)).await;
        }
        Ok(())
    }
}

#[async_trait]
impl SignalingAdapter for InMemorySignaling {
    async fn send_offer(&self, to_peer: &PeerId, ufrag: &str, pwd: &str) -> Result<()> {
        self.deliver(
            &PeerId::new("self"),
            to_peer,
            SignalMessage::Offer {
                ufrag: ufrag.to_string(),
                pwd: pwd.to_string(),
            },
        )
        .await
    }

    async fn send_answer(&self, to_peer: &PeerId, ufrag: &str, pwd: &str) -> Result<()> {
        self.deliver(
            &PeerId::new("self"),
            to_peer,
            SignalMessage::Answer {
                ufrag: ufrag.to_string(),
                pwd: pwd.to_string(),
            },
        )
        .await
    }

    async fn send_candidate(&self, to_peer: &PeerId, candidate: &str) -> Result<()> {
        self.deliver(
            &PeerId::new("self"),
            to_peer,
            SignalMessage::Candidate {
                candidate: candidate.to_string(),
            },
        )
        .await
    }
}
