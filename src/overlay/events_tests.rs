use super::*;

fn notif(msg: &str) -> Event {
    Event::Notification {
        message: msg.to_string(),
    }
}

#[tokio::test]
async fn broadcast_delivers_to_all_matching_subscribers() {
    let bus = EventBus::new();
    let (_id_a, mut rx_a) = bus.subscribe(vec![]).await;
    let (_id_b, mut rx_b) = bus.subscribe(vec![]).await;

    bus.publish(notif("hello")).await;

    assert!(matches!(rx_a.recv().await, Some(Event::Notification { .. })));
    assert!(matches!(rx_b.recv().await, Some(Event::Notification { .. })));
}

#[tokio::test]
async fn filter_excludes_non_matching_event_kinds() {
    let bus = EventBus::new();
    let (_id, mut rx) = bus.subscribe(vec![EventKind::StatusChanged]).await;

    bus.publish(notif("should be dropped")).await;
    bus.publish(Event::StatusChanged {
        network_id: "net-123".to_string(),
        connected: true,
    })
    .await;

    let received = rx.recv().await.unwrap();
    match received {
        Event::StatusChanged { network_id, .. } => assert_eq!(network_id, "net-123"),
        other => panic!("unexpected event delivered: {other:?}"),
    }
}

#[tokio::test]
async fn full_subscriber_queue_does_not_block_others() {
    let bus = EventBus::new();
    let (_slow_id, _slow_rx_not_drained) = bus.subscribe(vec![]).await;
    let (_fast_id, mut fast_rx) = bus.subscribe(vec![]).await;

    for i in 0..300 {
        bus.publish(notif(&format!("msg-{i}"))).await;
    }

    assert!(fast_rx.recv().await.is_some());
}

#[tokio::test]
async fn unsubscribe_removes_from_the_set() {
    let bus = EventBus::new();
    let (id, _rx) = bus.subscribe(vec![]).await;
    assert_eq!(bus.subscriber_count().await, 1);

    bus.unsubscribe(id).await;
    assert_eq!(bus.subscriber_count().await, 0);
}
