use super::*;
use crate::config::Config;

async fn test_engine() -> (Engine, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let paths = Paths::from_root(dir.path().to_path_buf());
    paths.ensure_root_exists().unwrap();
    let identity = Identity::load_or_generate(&paths).unwrap();
    let engine = Engine::new(paths, Config::default(), identity, EventBus::new())
        .await
        .unwrap();
    (engine, dir)
}

#[tokio::test]
async fn status_before_start_reports_zero_uptime_and_unregistered() {
    let (engine, _dir) = test_engine().await;
    let status = engine.status().await;
    assert_eq!(status.uptime_secs, 0);
    assert!(!status.registered);
    assert!(status.device_id.is_none());
}

#[tokio::test]
async fn operations_requiring_directory_fail_cleanly_when_disconnected() {
    let (engine, _dir) = test_engine().await;
    let err = engine.create_network("home").await.unwrap_err();
    assert!(matches!(err, GoConnectError::TransientNetwork(_)));

    let err = engine.p2p_connect("peer-1").await.unwrap_err();
    assert!(matches!(err, GoConnectError::PeerState(_)));

    assert!(engine.get_peers().await.is_empty());
}

#[tokio::test]
async fn leave_network_on_unknown_id_is_not_found() {
    let (engine, _dir) = test_engine().await;
    let err = engine.leave_network("does-not-exist").await.unwrap_err();
    assert!(matches!(err, GoConnectError::NotFound(_)));
}

#[tokio::test]
async fn chat_round_trip_persists_and_lists() {
    let (engine, _dir) = test_engine().await;
    let saved = engine
        .send_chat_message("peer-1", "hello", "net-1")
        .await
        .unwrap();
    assert_eq!(saved.content, "hello");
    assert_eq!(saved.network_id, "net-1");

    let messages = engine.list_chat_messages("net-1", 10, "").await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, saved.id);
}

#[tokio::test]
async fn send_chat_message_rejects_empty_content() {
    let (engine, _dir) = test_engine().await;
    let err = engine
        .send_chat_message("peer-1", "", "net-1")
        .await
        .unwrap_err();
    assert!(matches!(err, GoConnectError::InvalidArgument(_)));
}

#[tokio::test]
async fn send_file_request_creates_pending_session() {
    let (engine, _dir) = test_engine().await;
    let session = engine
        .send_file_request("peer-1", "/tmp/example.bin", "example.bin", 4096)
        .await
        .unwrap();
    assert_eq!(session.file_name, "example.bin");
    assert_eq!(session.status, super::super::model::TransferStatus::Pending);
}
