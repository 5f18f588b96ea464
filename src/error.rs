use thiserror::Error;

/// The daemon's error taxonomy. Every fallible engine operation that can
/// reach the control plane resolves to one of these variants so RPC/HTTP
/// handlers can map on the variant instead of matching error text.
#[derive(Debug, Error)]
pub enum GoConnectError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("transient network error: {0}")]
    TransientNetwork(String),

    #[error("peer state error: {0}")]
    PeerState(String),

    #[error("platform error: {0}")]
    Platform(String),

    #[error("fatal startup error: {0}")]
    Fatal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    ChatStore(#[from] rusqlite::Error),
}

impl GoConnectError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn already_exists(peer_id: &str) -> Self {
        Self::PeerState(format!("peer session already exists: {peer_id}"))
    }
}

pub type Result<T> = std::result::Result<T, GoConnectError>;

impl From<&GoConnectError> for tonic::Status {
    fn from(err: &GoConnectError) -> Self {
        match err {
            GoConnectError::Auth(msg) => tonic::Status::unauthenticated(msg.clone()),
            GoConnectError::InvalidArgument(msg) => tonic::Status::invalid_argument(msg.clone()),
            GoConnectError::NotFound(msg) => tonic::Status::not_found(msg.clone()),
            GoConnectError::PeerState(msg) => tonic::Status::failed_precondition(msg.clone()),
            other => tonic::Status::internal(other.to_string()),
        }
    }
}

impl From<GoConnectError> for tonic::Status {
    fn from(err: GoConnectError) -> Self {
        tonic::Status::from(&err)
    }
}

/// Mirrors `From<&GoConnectError> for tonic::Status` for the HTTP/SSE surface.
pub fn http_status(err: &GoConnectError) -> axum::http::StatusCode {
    use axum::http::StatusCode;
    match err {
        GoConnectError::Auth(_) => StatusCode::UNAUTHORIZED,
        GoConnectError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        GoConnectError::NotFound(_) => StatusCode::NOT_FOUND,
        GoConnectError::PeerState(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
