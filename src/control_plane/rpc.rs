use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use async_stream::stream;
use serde_json::Value;
use tokio_stream::Stream;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::{info, warn};

use crate::error::GoConnectError;
use crate::overlay::events::SubscriberId;
use crate::overlay::transfer::default_transfer_addr;
use crate::overlay::{Engine, Event, EventKind};

use super::ipc_token::IpcToken;
use super::pb;

/// Unary+streaming bearer-token guard for every RPC (spec §4.3): rejects
/// anything missing, or not matching, the `x-goconnect-ipc-token` metadata
/// entry via [`IpcToken::verify`]'s constant-time comparison.
#[derive(Clone)]
pub struct AuthInterceptor {
    token: Arc<IpcToken>,
}

impl AuthInterceptor {
    pub fn new(token: Arc<IpcToken>) -> Self {
        Self { token }
    }
}

impl tonic::service::Interceptor for AuthInterceptor {
    fn call(&mut self, request: Request<()>) -> Result<Request<()>, Status> {
        let candidate = request
            .metadata()
            .get("x-goconnect-ipc-token")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| Status::unauthenticated("missing x-goconnect-ipc-token"))?;
        if self.token.verify(candidate) {
            Ok(request)
        } else {
            Err(Status::unauthenticated("invalid ipc token"))
        }
    }
}

/// Unsubscribes from the event bus when the owning stream is dropped
/// (client disconnect or cancellation), since neither outcome runs any
/// code past the `stream!` generator's last `yield`.
struct SubscriptionGuard {
    events: crate::overlay::EventBus,
    id: SubscriberId,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        let events = self.events.clone();
        let id = self.id;
        tokio::spawn(async move { events.unsubscribe(id).await });
    }
}

fn parse_event_kinds(raw: &[String]) -> Vec<EventKind> {
    raw.iter()
        .filter_map(|s| serde_json::from_value::<EventKind>(Value::String(s.clone())).ok())
        .collect()
}

/// Implements all four RPC services (spec §4.3) over the same shared
/// [`Engine`]. Cloning is cheap: the only field is an `Arc`.
#[derive(Clone)]
pub struct RpcHandler {
    engine: Arc<Engine>,
}

impl RpcHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }
}

fn into_status(err: GoConnectError) -> Status {
    Status::from(err)
}

fn empty_reply() -> Response<pb::Empty> {
    Response::new(pb::Empty {})
}

fn network_reply(m: crate::overlay::NetworkMembership) -> pb::NetworkReply {
    pb::NetworkReply {
        network_id: m.network_id.to_string(),
        name: m.name,
        cidr: m.cidr,
        virtual_ip: m.virtual_ip,
        role: m.role,
    }
}

fn peer_status_reply(s: crate::peer::PeerStatus) -> pb::PeerStatusReply {
    pb::PeerStatusReply {
        connected: s.connected,
        connection_state: format!("{:?}", s.connection_state).to_lowercase(),
        latency_ms: s.latency_ms,
        is_relay: s.is_relay,
    }
}

fn transfer_reply(t: crate::overlay::TransferSession) -> pb::TransferReply {
    pb::TransferReply {
        id: t.id,
        peer_id: t.peer_id.to_string(),
        file_path: t.file_path,
        file_name: t.file_name,
        file_size: t.file_size,
        sent_bytes: t.sent_bytes,
        status: format!("{:?}", t.status).to_lowercase(),
        is_sender: t.is_sender,
        start_time: t.start_time,
        end_time: t.end_time.unwrap_or_default(),
        error: t.error.unwrap_or_default(),
    }
}

fn chat_message_reply(m: crate::overlay::ChatMessage) -> pb::ChatMessageReply {
    pb::ChatMessageReply {
        id: m.id,
        from_peer: m.from_peer,
        content: m.content,
        timestamp: m.timestamp,
        network_id: m.network_id,
        created_at: m.created_at,
    }
}

type EventResultStream = Pin<Box<dyn Stream<Item = Result<pb::EventMessage, Status>> + Send>>;
type TransferResultStream = Pin<Box<dyn Stream<Item = Result<pb::TransferReply, Status>> + Send>>;
type ChatResultStream = Pin<Box<dyn Stream<Item = Result<pb::ChatMessageReply, Status>> + Send>>;
type VoiceResultStream = Pin<Box<dyn Stream<Item = Result<pb::VoiceSignalReply, Status>> + Send>>;

#[tonic::async_trait]
impl pb::daemon_service_server::DaemonService for RpcHandler {
    async fn get_status(&self, _request: Request<pb::Empty>) -> Result<Response<pb::StatusReply>, Status> {
        let status = self.engine.status().await;
        Ok(Response::new(pb::StatusReply {
            version: status.version,
            registered: status.registered,
            device_id: status.device_id.map(|d| d.to_string()).unwrap_or_default(),
            connected_networks: status.connected_networks,
            uptime_secs: status.uptime_secs,
        }))
    }

    async fn get_version(&self, _request: Request<pb::Empty>) -> Result<Response<pb::VersionReply>, Status> {
        Ok(Response::new(pb::VersionReply {
            version: env!("CARGO_PKG_VERSION").to_string(),
        }))
    }

    type SubscribeStream = EventResultStream;

    async fn subscribe(
        &self,
        request: Request<pb::SubscribeRequest>,
    ) -> Result<Response<Self::SubscribeStream>, Status> {
        let filter = parse_event_kinds(&request.get_ref().event_types);
        let events = self.engine.events().clone();
        let output = stream! {
            let (id, mut rx) = events.subscribe(filter).await;
            let _guard = SubscriptionGuard { events: events.clone(), id };
            while let Some(event) = rx.recv().await {
                match serde_json::to_string(&event) {
                    Ok(json) => yield Ok(pb::EventMessage { json }),
                    Err(err) => warn!(%err, "failed to encode event for subscriber"),
                }
            }
        };
        Ok(Response::new(Box::pin(output)))
    }
}

#[tonic::async_trait]
impl pb::network_service_server::NetworkService for RpcHandler {
    async fn create_network(
        &self,
        request: Request<pb::CreateNetworkRequest>,
    ) -> Result<Response<pb::NetworkReply>, Status> {
        let name = request.into_inner().name;
        let membership = self.engine.create_network(&name).await.map_err(into_status)?;
        Ok(Response::new(network_reply(membership)))
    }

    async fn join_network(
        &self,
        request: Request<pb::JoinNetworkRequest>,
    ) -> Result<Response<pb::NetworkReply>, Status> {
        let invite_code = request.into_inner().invite_code;
        let membership = self
            .engine
            .join_network(&invite_code)
            .await
            .map_err(into_status)?;
        Ok(Response::new(network_reply(membership)))
    }

    async fn list_networks(
        &self,
        _request: Request<pb::Empty>,
    ) -> Result<Response<pb::ListNetworksReply>, Status> {
        let networks = self.engine.list_networks().await.into_iter().map(network_reply).collect();
        Ok(Response::new(pb::ListNetworksReply { networks }))
    }

    async fn generate_invite(
        &self,
        request: Request<pb::GenerateInviteRequest>,
    ) -> Result<Response<pb::InviteReply>, Status> {
        let req = request.into_inner();
        let invite_code = self
            .engine
            .generate_invite(&req.network_id, req.max_uses, req.expires_hours)
            .await
            .map_err(into_status)?;
        Ok(Response::new(pb::InviteReply { invite_code }))
    }

    async fn leave_network(
        &self,
        request: Request<pb::NetworkIdRequest>,
    ) -> Result<Response<pb::Empty>, Status> {
        self.engine
            .leave_network(&request.into_inner().network_id)
            .await
            .map_err(into_status)?;
        Ok(empty_reply())
    }

    async fn delete_network(
        &self,
        request: Request<pb::NetworkIdRequest>,
    ) -> Result<Response<pb::Empty>, Status> {
        self.engine
            .delete_network(&request.into_inner().network_id)
            .await
            .map_err(into_status)?;
        Ok(empty_reply())
    }
}

#[tonic::async_trait]
impl pb::peer_service_server::PeerService for RpcHandler {
    async fn get_peers(&self, _request: Request<pb::Empty>) -> Result<Response<pb::PeerListReply>, Status> {
        let peer_ids = self
            .engine
            .get_peers()
            .await
            .into_iter()
            .map(|id| id.to_string())
            .collect();
        Ok(Response::new(pb::PeerListReply { peer_ids }))
    }

    async fn get_peer(
        &self,
        request: Request<pb::PeerIdRequest>,
    ) -> Result<Response<pb::PeerStatusReply>, Status> {
        let status = self
            .engine
            .get_peer(&request.into_inner().peer_id)
            .await
            .map_err(into_status)?;
        Ok(Response::new(peer_status_reply(status)))
    }

    async fn kick_peer(&self, request: Request<pb::PeerActionRequest>) -> Result<Response<pb::Empty>, Status> {
        let req = request.into_inner();
        self.engine
            .kick_peer(&req.network_id, &req.peer_id, &req.reason)
            .await
            .map_err(into_status)?;
        Ok(empty_reply())
    }

    async fn ban_peer(&self, request: Request<pb::PeerActionRequest>) -> Result<Response<pb::Empty>, Status> {
        let req = request.into_inner();
        self.engine
            .ban_peer(&req.network_id, &req.peer_id)
            .await
            .map_err(into_status)?;
        Ok(empty_reply())
    }

    async fn unban_peer(&self, request: Request<pb::PeerActionRequest>) -> Result<Response<pb::Empty>, Status> {
        let req = request.into_inner();
        self.engine
            .unban_peer(&req.network_id, &req.peer_id)
            .await
            .map_err(into_status)?;
        Ok(empty_reply())
    }
}

#[tonic::async_trait]
impl pb::exchange_service_server::ExchangeService for RpcHandler {
    async fn send_file_request(
        &self,
        request: Request<pb::SendFileRequestMsg>,
    ) -> Result<Response<pb::TransferReply>, Status> {
        let req = request.into_inner();
        let session = self
            .engine
            .send_file_request(&req.peer_id, &req.file_path, &req.file_name, req.file_size)
            .await
            .map_err(into_status)?;
        Ok(Response::new(transfer_reply(session)))
    }

    async fn accept_file(
        &self,
        request: Request<pb::TransferIdRequest>,
    ) -> Result<Response<pb::Empty>, Status> {
        let transfer_id = request.into_inner().transfer_id;
        self.engine
            .transfers()
            .accept(&transfer_id, default_transfer_addr())
            .await
            .map_err(into_status)?;
        Ok(empty_reply())
    }

    async fn reject_transfer(
        &self,
        request: Request<pb::RejectTransferRequest>,
    ) -> Result<Response<pb::Empty>, Status> {
        let req = request.into_inner();
        self.engine
            .transfers()
            .reject(&req.transfer_id, &req.reason)
            .await
            .map_err(into_status)?;
        Ok(empty_reply())
    }

    async fn cancel_transfer(
        &self,
        request: Request<pb::TransferIdRequest>,
    ) -> Result<Response<pb::Empty>, Status> {
        self.engine
            .transfers()
            .cancel(&request.into_inner().transfer_id)
            .await
            .map_err(into_status)?;
        Ok(empty_reply())
    }

    type SubscribeTransfersStream = TransferResultStream;

    async fn subscribe_transfers(
        &self,
        _request: Request<pb::Empty>,
    ) -> Result<Response<Self::SubscribeTransfersStream>, Status> {
        let events = self.engine.events().clone();
        let output = stream! {
            let filter = vec![EventKind::TransferProgress, EventKind::TransferRequest];
            let (id, rx) = events.subscribe(filter).await;
            let _guard = SubscriptionGuard { events: events.clone(), id };
            let mut rx = ReceiverStream::new(rx);
            while let Some(event) = rx.next().await {
                if let Some(transfer) = transfer_from_event(event) {
                    yield Ok(transfer_reply(transfer));
                }
            }
        };
        Ok(Response::new(Box::pin(output)))
    }

    async fn send_chat_message(
        &self,
        request: Request<pb::SendChatMessageRequest>,
    ) -> Result<Response<pb::ChatMessageReply>, Status> {
        let req = request.into_inner();
        let message = self
            .engine
            .send_chat_message(&req.from_peer, &req.content, &req.network_id)
            .await
            .map_err(into_status)?;
        Ok(Response::new(chat_message_reply(message)))
    }

    type SubscribeMessagesStream = ChatResultStream;

    async fn subscribe_messages(
        &self,
        request: Request<pb::SubscribeMessagesRequest>,
    ) -> Result<Response<Self::SubscribeMessagesStream>, Status> {
        let network_id = request.into_inner().network_id;
        let events = self.engine.events().clone();
        let output = stream! {
            let (id, rx) = events.subscribe(vec![EventKind::ChatMessage]).await;
            let _guard = SubscriptionGuard { events: events.clone(), id };
            let mut rx = ReceiverStream::new(rx);
            while let Some(event) = rx.next().await {
                if let Event::ChatMessage { message } = event
                    && (network_id.is_empty() || message.network_id == network_id)
                {
                    yield Ok(chat_message_reply(message));
                }
            }
        };
        Ok(Response::new(Box::pin(output)))
    }

    async fn send_voice_signal(
        &self,
        request: Request<pb::VoiceSignalRequest>,
    ) -> Result<Response<pb::Empty>, Status> {
        let req = request.into_inner();
        let payload: Value = serde_json::from_str(&req.payload_json).unwrap_or(Value::Null);
        self.engine
            .send_voice_signal(&req.from_peer, &req.to_peer, payload)
            .await
            .map_err(into_status)?;
        Ok(empty_reply())
    }

    type SubscribeVoiceSignalsStream = VoiceResultStream;

    async fn subscribe_voice_signals(
        &self,
        _request: Request<pb::Empty>,
    ) -> Result<Response<Self::SubscribeVoiceSignalsStream>, Status> {
        let events = self.engine.events().clone();
        let output = stream! {
            let (id, rx) = events.subscribe(vec![EventKind::VoiceSignal]).await;
            let _guard = SubscriptionGuard { events: events.clone(), id };
            let mut rx = ReceiverStream::new(rx);
            while let Some(event) = rx.next().await {
                if let Event::VoiceSignal { from_peer, to_peer, payload } = event {
                    yield Ok(pb::VoiceSignalReply {
                        from_peer,
                        to_peer,
                        payload_json: payload.to_string(),
                    });
                }
            }
        };
        Ok(Response::new(Box::pin(output)))
    }
}

fn transfer_from_event(event: Event) -> Option<crate::overlay::TransferSession> {
    match event {
        Event::TransferProgress { transfer } | Event::TransferRequest { transfer } => Some(transfer),
        _ => None,
    }
}

/// Serves all four RPC services over a Unix domain socket at `socket_path`,
/// created with owner-only (0600) permissions, until `cancel` fires.
#[cfg(unix)]
pub async fn serve_unix(
    socket_path: &Path,
    engine: Arc<Engine>,
    token: Arc<IpcToken>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    use tokio::net::UnixListener;
    use tokio_stream::wrappers::UnixListenerStream;

    let _ = tokio::fs::remove_file(socket_path).await;
    if let Some(parent) = socket_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let listener = UnixListener::bind(socket_path)?;
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
    }
    info!(path = %socket_path.display(), "RPC surface listening on unix socket");

    let handler = RpcHandler::new(engine);
    let interceptor = AuthInterceptor::new(token);

    Server::builder()
        .add_service(pb::daemon_service_server::DaemonServiceServer::with_interceptor(
            handler.clone(),
            interceptor.clone(),
        ))
        .add_service(pb::network_service_server::NetworkServiceServer::with_interceptor(
            handler.clone(),
            interceptor.clone(),
        ))
        .add_service(pb::peer_service_server::PeerServiceServer::with_interceptor(
            handler.clone(),
            interceptor.clone(),
        ))
        .add_service(pb::exchange_service_server::ExchangeServiceServer::with_interceptor(
            handler,
            interceptor,
        ))
        .serve_with_incoming_shutdown(UnixListenerStream::new(listener), cancel.cancelled_owned())
        .await?;
    Ok(())
}

/// Serves all four RPC services over the well-known named pipe on Windows
/// (spec §6: `\\.\pipe\goconnect-daemon`), until `cancel` fires.
#[cfg(windows)]
pub async fn serve_windows_pipe(
    pipe_name: &str,
    engine: Arc<Engine>,
    token: Arc<IpcToken>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    use windows_pipe::incoming;

    info!(pipe_name, "RPC surface listening on named pipe");
    let handler = RpcHandler::new(engine);
    let interceptor = AuthInterceptor::new(token);

    Server::builder()
        .add_service(pb::daemon_service_server::DaemonServiceServer::with_interceptor(
            handler.clone(),
            interceptor.clone(),
        ))
        .add_service(pb::network_service_server::NetworkServiceServer::with_interceptor(
            handler.clone(),
            interceptor.clone(),
        ))
        .add_service(pb::peer_service_server::PeerServiceServer::with_interceptor(
            handler.clone(),
            interceptor.clone(),
        ))
        .add_service(pb::exchange_service_server::ExchangeServiceServer::with_interceptor(
            handler,
            interceptor,
        ))
        .serve_with_incoming_shutdown(incoming(pipe_name), cancel.cancelled_owned())
        .await?;
    Ok(())
}

#[cfg(windows)]
mod windows_pipe {
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
    use tokio::net::windows::named_pipe::{NamedPipeServer, ServerOptions};
    use tonic::transport::server::Connected;

    /// Wraps a single named-pipe instance so it can stand in for the
    /// Unix-socket connection type tonic otherwise expects.
    pub struct PipeConnection(NamedPipeServer);

    impl Connected for PipeConnection {
        type ConnectInfo = ();
        fn connect_info(&self) -> Self::ConnectInfo {}
    }

    impl AsyncRead for PipeConnection {
        fn poll_read(
            self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            Pin::new(&mut self.get_mut().0).poll_read(cx, buf)
        }
    }

    impl AsyncWrite for PipeConnection {
        fn poll_write(
            self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            Pin::new(&mut self.get_mut().0).poll_write(cx, buf)
        }

        fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Pin::new(&mut self.get_mut().0).poll_flush(cx)
        }

        fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Pin::new(&mut self.get_mut().0).poll_shutdown(cx)
        }
    }

    /// Each accepted connection gets its own pipe instance; a fresh one is
    /// created before the wait completes so the next client has somewhere
    /// to connect to, matching `ServerOptions::create`'s one-shot-per-instance
    /// model.
    pub fn incoming(
        pipe_name: &str,
    ) -> impl tokio_stream::Stream<Item = std::io::Result<PipeConnection>> {
        let pipe_name = pipe_name.to_string();
        async_stream::stream! {
            let mut server = ServerOptions::new().first_pipe_instance(true).create(&pipe_name)?;
            loop {
                server.connect().await?;
                let next = ServerOptions::new().create(&pipe_name)?;
                let connected = std::mem::replace(&mut server, next);
                yield Ok(PipeConnection(connected));
            }
        }
    }
}
