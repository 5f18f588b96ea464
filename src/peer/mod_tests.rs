use super::*;
use crate::overlay::events::EventBus;
use signaling::InMemorySignaling;
use std::sync::Arc;

fn manager(local_id: &str) -> Arc<PeerManager> {
    Arc::new(PeerManager::new(
        PeerId::new(local_id),
        Arc::new(InMemorySignaling::new()),
        EventBus::new(),
        "stun:stun.l.google.com:19302".to_string(),
    ))
}

#[tokio::test]
async fn connect_twice_without_teardown_fails_already_exists() {
    let mgr = manager("local");
    let peer = PeerId::new("peer-a");

    // First connect blocks on an answer that never arrives; drive it in the
    // background and poll until the session is visibly present.
    let bg_mgr = mgr.clone();
    let bg_peer = peer.clone();
    let handle = tokio::spawn(async move {
        let _ = bg_mgr.connect(&bg_peer).await;
    });

    let mut attempts = 0;
    while mgr.status(&peer).await.is_none() && attempts < 50 {
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        attempts += 1;
    }

    let result = mgr.connect(&peer).await;
    assert!(matches!(result, Err(GoConnectError::PeerState(_))));

    mgr.teardown(&peer).await;
    handle.abort();
}

#[tokio::test]
async fn connect_succeeds_again_after_teardown() {
    let mgr = manager("local");
    let peer = PeerId::new("peer-b");

    mgr.teardown(&peer).await;
    assert!(mgr.status(&peer).await.is_none());
}

#[tokio::test]
async fn is_connected_false_for_unknown_peer() {
    let mgr = manager("local");
    assert!(!mgr.is_connected(&PeerId::new("ghost")).await);
}

#[tokio::test]
async fn handle_candidate_before_session_exists_is_a_silent_drop() {
    let mgr = manager("local");
    let peer = PeerId::new("peer-c");
    let result = mgr
        .handle_candidate(&peer, "candidate:1 1 UDP 2130706431 10.0.0.1 5000 typ host")
        .await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn handle_answer_with_no_pending_connect_does_not_panic() {
    let mgr = manager("local");
    mgr.handle_answer(&PeerId::new("peer-d"), "ufrag", "pwd")
        .await;
}
