use super::*;
use crate::ids::PeerId;

#[tokio::test]
async fn request_send_creates_pending_session_and_publishes_event() {
    let events = EventBus::new();
    let (_id, mut rx) = events.subscribe(vec![]).await;
    let manager = TransferManager::new(events);

    let session = manager
        .request_send(PeerId::new("peer-1"), "/tmp/f".into(), "f.bin".into(), 100)
        .await
        .unwrap();

    assert_eq!(session.status, TransferStatus::Pending);
    assert!(matches!(rx.recv().await, Some(Event::TransferRequest { .. })));
}

#[tokio::test]
async fn cancel_unknown_transfer_is_not_found() {
    let manager = TransferManager::new(EventBus::new());
    let err = manager.cancel("missing").await.unwrap_err();
    assert!(matches!(err, GoConnectError::NotFound(_)));
}

#[tokio::test]
async fn reject_marks_pending_session_failed() {
    let events = EventBus::new();
    let manager = TransferManager::new(events);
    let session = manager
        .request_send(PeerId::new("peer-1"), "/tmp/f".into(), "f.bin".into(), 100)
        .await
        .unwrap();

    manager.reject(&session.id, "no thanks").await.unwrap();
    let updated = manager.get(&session.id).await.unwrap();
    assert_eq!(updated.status, TransferStatus::Failed);
    assert_eq!(updated.error.as_deref(), Some("no thanks"));
}
