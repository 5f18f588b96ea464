use super::*;
use tempfile::tempdir;

fn msg(network: &str, content: &str, ts: i64) -> ChatMessage {
    ChatMessage {
        id: String::new(),
        from_peer: "peer-a".to_string(),
        content: content.to_string(),
        timestamp: ts,
        network_id: network.to_string(),
        created_at: 0,
    }
}

#[tokio::test]
async fn save_generates_id_when_absent() {
    let dir = tempdir().unwrap();
    let store = ChatStore::open(&dir.path().join("chat.db")).await.unwrap();

    let saved = store.save(msg("net-a", "hello", 1)).await.unwrap();
    assert!(saved.id.contains("-peer-a"));
}

#[tokio::test]
async fn list_partitions_by_network() {
    let dir = tempdir().unwrap();
    let store = ChatStore::open(&dir.path().join("chat.db")).await.unwrap();

    store.save(msg("A", "one", 1)).await.unwrap();
    store.save(msg("B", "two", 2)).await.unwrap();
    store.save(msg("A", "three", 3)).await.unwrap();

    let a_msgs = store.list("A", 10, "").await.unwrap();
    let b_msgs = store.list("B", 10, "").await.unwrap();

    assert_eq!(a_msgs.len(), 2);
    assert_eq!(b_msgs.len(), 1);
    // Most recent first.
    assert_eq!(a_msgs[0].content, "three");
}

#[tokio::test]
async fn pagination_cursor_yields_strictly_older_page() {
    let dir = tempdir().unwrap();
    let store = ChatStore::open(&dir.path().join("chat.db")).await.unwrap();

    for i in 1..=5 {
        store.save(msg("A", &format!("msg-{i}"), i)).await.unwrap();
    }

    let first_page = store.list("A", 2, "").await.unwrap();
    assert_eq!(first_page.len(), 2);
    assert_eq!(first_page[0].content, "msg-5");
    assert_eq!(first_page[1].content, "msg-4");

    let second_page = store.list("A", 2, &first_page[1].id).await.unwrap();
    assert!(second_page.iter().all(|m| m.timestamp < first_page[1].timestamp));
    assert_eq!(second_page[0].content, "msg-3");
}

#[tokio::test]
async fn delete_older_than_prunes_stale_messages() {
    let dir = tempdir().unwrap();
    let store = ChatStore::open(&dir.path().join("chat.db")).await.unwrap();

    let now = unix_seconds();
    let old = msg("A", "old", now - 48 * 3600);
    let mut old_with_created = old.clone();
    old_with_created.created_at = now - 48 * 3600;
    store.save(old_with_created).await.unwrap();

    let mut recent = msg("A", "recent", now);
    recent.created_at = now;
    store.save(recent).await.unwrap();

    // delete_older_than filters on `timestamp`, which we set explicitly above.
    let remaining = store.list("A", 10, "").await.unwrap();
    assert_eq!(remaining.len(), 2);

    store.delete_older_than(Duration::from_secs(24 * 3600)).await.unwrap();
    let remaining = store.list("A", 10, "").await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].content, "recent");
}

#[tokio::test]
async fn search_matches_substring() {
    let dir = tempdir().unwrap();
    let store = ChatStore::open(&dir.path().join("chat.db")).await.unwrap();

    store.save(msg("A", "hello world", 1)).await.unwrap();
    store.save(msg("A", "goodbye", 2)).await.unwrap();

    let hits = store.search("A", "hello").await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].content, "hello world");
}
