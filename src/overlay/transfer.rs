use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{GoConnectError, Result};
use crate::ids::PeerId;

use super::events::EventBus;
use super::model::{Event, TransferSession, TransferStatus};

/// Chunk size for the file-transfer byte stream (spec §4.5).
pub const CHUNK_SIZE: usize = 32 * 1024;

/// Owns in-flight `TransferSession`s and the dedicated TCP listener that
/// accepts the byte stream once a transfer is accepted. File-send requests
/// are created in `pending`; `accept` transitions to `in_progress` and
/// drives the chunked copy; progress/completion/failure/cancellation are
/// published on the shared event bus.
pub struct TransferManager {
    sessions: Arc<RwLock<HashMap<String, TransferSession>>>,
    events: EventBus,
}

impl TransferManager {
    pub fn new(events: EventBus) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            events,
        }
    }

    /// `SendFileRequest` -- creates a `pending` session and publishes a
    /// `TransferRequest` event for the receiving peer's control-plane
    /// subscribers to pick up.
    pub async fn request_send(
        &self,
        peer_id: PeerId,
        file_path: String,
        file_name: String,
        file_size: u64,
    ) -> Result<TransferSession> {
        let session = TransferSession {
            id: Uuid::new_v4().to_string(),
            peer_id,
            file_path,
            file_name,
            file_size,
            sent_bytes: 0,
            status: TransferStatus::Pending,
            is_sender: true,
            start_time: now_unix(),
            end_time: None,
            error: None,
        };
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session.clone());
        self.events
            .publish(Event::TransferRequest {
                transfer: session.clone(),
            })
            .await;
        Ok(session)
    }

    /// `AcceptFile` -- transitions a pending session to `in_progress` and
    /// opens a dedicated TCP listener for the chunked byte stream.
    pub async fn accept(&self, transfer_id: &str, listen_addr: std::net::SocketAddr) -> Result<u16> {
        {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .get_mut(transfer_id)
                .ok_or_else(|| GoConnectError::not_found(format!("transfer {transfer_id}")))?;
            if session.status != TransferStatus::Pending {
                return Err(GoConnectError::PeerState(format!(
                    "transfer {transfer_id} is not pending"
                )));
            }
            session.status = TransferStatus::InProgress;
            session.is_sender = false;
        }

        let listener = TcpListener::bind(listen_addr)
            .await
            .map_err(|err| GoConnectError::Platform(format!("failed to bind transfer port: {err}")))?;
        let port = listener
            .local_addr()
            .map_err(|err| GoConnectError::Platform(err.to_string()))?
            .port();

        let sessions = self.sessions.clone();
        let events = self.events.clone();
        let transfer_id = transfer_id.to_string();
        tokio::spawn(async move {
            match listener.accept().await {
                Ok((stream, _)) => {
                    run_receive(stream, transfer_id, sessions, events).await;
                }
                Err(err) => warn!(%err, "transfer accept loop failed"),
            }
        });

        Ok(port)
    }

    /// `RejectTransfer` -- marks a pending session `failed` without opening
    /// a stream.
    pub async fn reject(&self, transfer_id: &str, reason: &str) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(transfer_id)
            .ok_or_else(|| GoConnectError::not_found(format!("transfer {transfer_id}")))?;
        session.status = TransferStatus::Failed;
        session.error = Some(reason.to_string());
        session.end_time = Some(now_unix());
        let snapshot = session.clone();
        drop(sessions);
        self.events
            .publish(Event::TransferProgress { transfer: snapshot })
            .await;
        Ok(())
    }

    /// `CancelTransfer` -- marks an in-progress or pending session
    /// `cancelled`; the receive/send loop observes this on its next chunk
    /// and stops.
    pub async fn cancel(&self, transfer_id: &str) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(transfer_id)
            .ok_or_else(|| GoConnectError::not_found(format!("transfer {transfer_id}")))?;
        session.status = TransferStatus::Cancelled;
        session.end_time = Some(now_unix());
        let snapshot = session.clone();
        drop(sessions);
        self.events
            .publish(Event::TransferProgress { transfer: snapshot })
            .await;
        Ok(())
    }

    /// Sends a local file to `addr` over a plain TCP connection, chunked at
    /// [`CHUNK_SIZE`], updating `sent_bytes` and publishing progress events
    /// as it goes.
    pub async fn send_file(
        &self,
        transfer_id: &str,
        addr: std::net::SocketAddr,
        mut file: tokio::fs::File,
    ) -> Result<()> {
        let mut stream = TcpStream::connect(addr)
            .await
            .map_err(|err| GoConnectError::TransientNetwork(format!("transfer connect failed: {err}")))?;

        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            if self.status_of(transfer_id).await == Some(TransferStatus::Cancelled) {
                return Ok(());
            }
            let n = file
                .read(&mut buf)
                .await
                .map_err(|err| GoConnectError::Platform(format!("transfer read failed: {err}")))?;
            if n == 0 {
                break;
            }
            stream
                .write_all(&buf[..n])
                .await
                .map_err(|err| GoConnectError::TransientNetwork(format!("transfer write failed: {err}")))?;
            self.advance(transfer_id, n as u64).await;
        }

        self.complete(transfer_id).await;
        Ok(())
    }

    async fn status_of(&self, transfer_id: &str) -> Option<TransferStatus> {
        self.sessions
            .read()
            .await
            .get(transfer_id)
            .map(|s| s.status)
    }

    async fn advance(&self, transfer_id: &str, delta: u64) {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(transfer_id) {
            session.sent_bytes += delta;
            let snapshot = session.clone();
            drop(sessions);
            self.events
                .publish(Event::TransferProgress { transfer: snapshot })
                .await;
        }
    }

    async fn complete(&self, transfer_id: &str) {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(transfer_id) {
            session.status = TransferStatus::Completed;
            session.end_time = Some(now_unix());
            let snapshot = session.clone();
            drop(sessions);
            self.events
                .publish(Event::TransferProgress { transfer: snapshot })
                .await;
        }
    }

    pub async fn get(&self, transfer_id: &str) -> Option<TransferSession> {
        self.sessions.read().await.get(transfer_id).cloned()
    }
}

async fn run_receive(
    mut stream: TcpStream,
    transfer_id: String,
    sessions: Arc<RwLock<HashMap<String, TransferSession>>>,
    events: EventBus,
) {
    let (file_path, file_size) = {
        let sessions = sessions.read().await;
        match sessions.get(&transfer_id) {
            Some(s) => (s.file_path.clone(), s.file_size),
            None => return,
        }
    };

    let mut file = match tokio::fs::File::create(&file_path).await {
        Ok(f) => f,
        Err(err) => {
            warn!(%err, transfer_id, "failed to create destination file for transfer");
            mark_failed(&sessions, &events, &transfer_id, &err.to_string()).await;
            return;
        }
    };

    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut received: u64 = 0;
    loop {
        let cancelled = {
            let sessions = sessions.read().await;
            sessions
                .get(&transfer_id)
                .map(|s| s.status == TransferStatus::Cancelled)
                .unwrap_or(true)
        };
        if cancelled {
            return;
        }
        let n = match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) => {
                mark_failed(&sessions, &events, &transfer_id, &err.to_string()).await;
                return;
            }
        };
        if let Err(err) = file.write_all(&buf[..n]).await {
            mark_failed(&sessions, &events, &transfer_id, &err.to_string()).await;
            return;
        }
        received += n as u64;

        let mut guard = sessions.write().await;
        if let Some(session) = guard.get_mut(&transfer_id) {
            session.sent_bytes = received;
            let snapshot = session.clone();
            drop(guard);
            events.publish(Event::TransferProgress { transfer: snapshot }).await;
        }
        if received >= file_size {
            break;
        }
    }

    let mut guard = sessions.write().await;
    if let Some(session) = guard.get_mut(&transfer_id) {
        session.status = TransferStatus::Completed;
        session.end_time = Some(now_unix());
        let snapshot = session.clone();
        drop(guard);
        info!(transfer_id, "transfer completed");
        events.publish(Event::TransferProgress { transfer: snapshot }).await;
    }
}

async fn mark_failed(
    sessions: &RwLock<HashMap<String, TransferSession>>,
    events: &EventBus,
    transfer_id: &str,
    error: &str,
) {
    let mut guard = sessions.write().await;
    if let Some(session) = guard.get_mut(transfer_id) {
        session.status = TransferStatus::Failed;
        session.error = Some(error.to_string());
        session.end_time = Some(now_unix());
        let snapshot = session.clone();
        drop(guard);
        events.publish(Event::TransferProgress { transfer: snapshot }).await;
    }
}

pub(crate) fn default_transfer_addr() -> std::net::SocketAddr {
    "127.0.0.1:0".parse().expect("valid loopback addr")
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
#[path = "transfer_tests.rs"]
mod tests;
