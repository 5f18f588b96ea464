use std::convert::Infallible;
use std::sync::Arc;

use async_stream::stream;
use axum::Json;
use axum::extract::State;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use tokio_stream::Stream;

use crate::config::Config;
use crate::error::{GoConnectError, http_status};
use crate::overlay::{ChatMessage, Engine, EventBus, NetworkMembership, TransferSession};

/// Wraps every fallible handler's error so it renders the way spec §4.3
/// wants: the mapped HTTP status plus a `{"message": "..."}` JSON body.
struct ApiError(GoConnectError);

impl From<GoConnectError> for ApiError {
    fn from(err: GoConnectError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = http_status(&self.0);
        (status, Json(serde_json::json!({ "message": self.0.to_string() }))).into_response()
    }
}

#[derive(Serialize)]
struct OkResponse {
    ok: bool,
}

impl OkResponse {
    fn ok() -> Json<Self> {
        Json(Self { ok: true })
    }
}

#[derive(Deserialize)]
struct RegisterRequest {
    device_id: String,
    auth_token: String,
}

#[derive(Deserialize)]
struct P2pConnectRequest {
    peer_id: String,
}

#[derive(Deserialize)]
struct ChatSendRequest {
    from_peer: String,
    content: String,
    network_id: String,
}

#[derive(Deserialize)]
struct FileSendRequest {
    peer_id: String,
    file_path: String,
    file_name: String,
    file_size: u64,
}

#[derive(Deserialize)]
struct FileAcceptRequest {
    transfer_id: String,
}

#[derive(Deserialize)]
struct CreateNetworkRequest {
    name: String,
}

#[derive(Deserialize)]
struct JoinNetworkRequest {
    invite_code: String,
}

async fn get_status(State(engine): State<Arc<Engine>>) -> impl IntoResponse {
    Json(engine.status().await)
}

async fn register(
    State(engine): State<Arc<Engine>>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<OkResponse>, ApiError> {
    engine.register(req.device_id, req.auth_token).await?;
    Ok(OkResponse::ok())
}

async fn connect(State(engine): State<Arc<Engine>>) -> Result<Json<OkResponse>, ApiError> {
    engine.connect().await?;
    Ok(OkResponse::ok())
}

async fn disconnect(State(engine): State<Arc<Engine>>) -> Json<OkResponse> {
    engine.disconnect().await;
    OkResponse::ok()
}

async fn p2p_connect(
    State(engine): State<Arc<Engine>>,
    Json(req): Json<P2pConnectRequest>,
) -> Result<Json<OkResponse>, ApiError> {
    engine.p2p_connect(&req.peer_id).await?;
    Ok(OkResponse::ok())
}

async fn chat_send(
    State(engine): State<Arc<Engine>>,
    Json(req): Json<ChatSendRequest>,
) -> Result<Json<ChatMessage>, ApiError> {
    let message = engine
        .send_chat_message(&req.from_peer, &req.content, &req.network_id)
        .await?;
    Ok(Json(message))
}

async fn file_send(
    State(engine): State<Arc<Engine>>,
    Json(req): Json<FileSendRequest>,
) -> Result<Json<TransferSession>, ApiError> {
    let session = engine
        .send_file_request(&req.peer_id, &req.file_path, &req.file_name, req.file_size)
        .await?;
    Ok(Json(session))
}

async fn file_accept(
    State(engine): State<Arc<Engine>>,
    Json(req): Json<FileAcceptRequest>,
) -> Result<Json<OkResponse>, ApiError> {
    engine
        .transfers()
        .accept(&req.transfer_id, crate::overlay::transfer::default_transfer_addr())
        .await
        .map_err(ApiError::from)?;
    Ok(OkResponse::ok())
}

async fn get_config(State(engine): State<Arc<Engine>>) -> Json<Config> {
    Json(engine.get_config().await)
}

async fn post_config(
    State(engine): State<Arc<Engine>>,
    Json(config): Json<Config>,
) -> Result<Json<OkResponse>, ApiError> {
    engine.update_config(config).await?;
    Ok(OkResponse::ok())
}

async fn list_networks(State(engine): State<Arc<Engine>>) -> Json<Vec<NetworkMembership>> {
    Json(engine.list_networks().await)
}

async fn networks_create(
    State(engine): State<Arc<Engine>>,
    Json(req): Json<CreateNetworkRequest>,
) -> Result<Json<NetworkMembership>, ApiError> {
    let membership = engine.create_network(&req.name).await?;
    Ok(Json(membership))
}

async fn networks_join(
    State(engine): State<Arc<Engine>>,
    Json(req): Json<JoinNetworkRequest>,
) -> Result<Json<NetworkMembership>, ApiError> {
    let membership = engine.join_network(&req.invite_code).await?;
    Ok(Json(membership))
}

/// `GET /events` -- every engine event as `data: <json>\n\n`, unfiltered.
/// Unsubscribes from the event bus once the client goes away (the SSE
/// stream future is dropped), same as the RPC surface's streaming calls.
async fn events(
    State(engine): State<Arc<Engine>>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let events: EventBus = engine.events().clone();
    let output = stream! {
        let (id, mut rx) = events.subscribe(Vec::new()).await;
        struct Guard { events: EventBus, id: crate::overlay::events::SubscriberId }
        impl Drop for Guard {
            fn drop(&mut self) {
                let events = self.events.clone();
                let id = self.id;
                tokio::spawn(async move { events.unsubscribe(id).await });
            }
        }
        let _guard = Guard { events: events.clone(), id };
        while let Some(event) = rx.recv().await {
            if let Ok(json) = serde_json::to_string(&event) {
                yield Ok(SseEvent::default().data(json));
            }
        }
    };
    Sse::new(output).keep_alive(KeepAlive::default())
}

/// Builds the loopback HTTP/SSE bridge router (spec §4.3/§6). `directory_origin`
/// feeds the CORS predicate so a directory-hosted control UI can reach this
/// bridge directly; see [`super::cors::build`]. Paths matched with the wrong
/// method (e.g. `DELETE /status`) fall through to axum's default 405.
pub fn router(engine: Arc<Engine>, directory_origin: Option<String>) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .route("/register", post(register))
        .route("/connect", post(connect))
        .route("/disconnect", post(disconnect))
        .route("/p2p/connect", post(p2p_connect))
        .route("/chat/send", post(chat_send))
        .route("/file/send", post(file_send))
        .route("/file/accept", post(file_accept))
        .route("/config", get(get_config).post(post_config))
        .route("/networks", get(list_networks))
        .route("/networks/create", post(networks_create))
        .route("/networks/join", post(networks_join))
        .route("/events", get(events))
        .layer(super::cors::build(directory_origin))
        .with_state(engine)
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
