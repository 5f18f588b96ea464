use super::*;
use crate::config::Paths;
use crate::identity::Identity;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

async fn test_router() -> (Router, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let paths = Paths::from_root(dir.path().to_path_buf());
    paths.ensure_root_exists().unwrap();
    let identity = Identity::load_or_generate(&paths).unwrap();
    let engine = Arc::new(
        Engine::new(paths, Config::default(), identity, EventBus::new())
            .await
            .unwrap(),
    );
    (router(engine, None), dir)
}

#[tokio::test]
async fn status_returns_unregistered_daemon() {
    let (router, _dir) = test_router().await;
    let response = router
        .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn wrong_method_on_status_is_rejected() {
    let (router, _dir) = test_router().await;
    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn chat_send_with_empty_content_maps_to_bad_request() {
    let (router, _dir) = test_router().await;
    let body = serde_json::json!({ "from_peer": "peer-1", "content": "", "network_id": "net-1" });
    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/chat/send")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn chat_send_persists_and_returns_message() {
    let (router, _dir) = test_router().await;
    let body = serde_json::json!({ "from_peer": "peer-1", "content": "hi", "network_id": "net-1" });
    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/chat/send")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn p2p_connect_without_directory_maps_to_conflict() {
    let (router, _dir) = test_router().await;
    let body = serde_json::json!({ "peer_id": "peer-1" });
    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/p2p/connect")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}
