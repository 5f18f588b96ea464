use super::*;
use tempfile::tempdir;

#[tokio::test]
async fn inserts_block_when_absent() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("hosts");
    tokio::fs::write(&path, "127.0.0.1 localhost\n").await.unwrap();

    let hosts = HostsFile::new(path.clone());
    hosts
        .update(&[("10.0.0.1".into(), "peer-1".into())])
        .await
        .unwrap();

    let content = tokio::fs::read_to_string(&path).await.unwrap();
    assert_eq!(content.matches(BEGIN_MARKER).count(), 1);
    assert_eq!(content.matches(END_MARKER).count(), 1);
    assert!(content.contains("127.0.0.1 localhost"));
    assert!(content.contains("10.0.0.1 peer-1 # GoConnect"));
}

#[tokio::test]
async fn empty_entries_removes_block() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("hosts");
    let hosts = HostsFile::new(path.clone());

    hosts
        .update(&[("10.0.0.1".into(), "peer-1".into())])
        .await
        .unwrap();
    hosts.update(&[]).await.unwrap();

    let content = tokio::fs::read_to_string(&path).await.unwrap();
    assert!(!content.contains(BEGIN_MARKER));
    assert!(!content.contains(END_MARKER));
}

#[tokio::test]
async fn reapplying_same_list_is_byte_identical() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("hosts");
    let hosts = HostsFile::new(path.clone());
    let entries = vec![("10.0.0.1".to_string(), "peer-1".to_string())];

    hosts.update(&entries).await.unwrap();
    let first = tokio::fs::read_to_string(&path).await.unwrap();
    hosts.update(&entries).await.unwrap();
    let second = tokio::fs::read_to_string(&path).await.unwrap();

    assert_eq!(first, second);
}

#[tokio::test]
async fn coalesces_duplicate_blocks() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("hosts");
    let malformed = format!(
        "keep me\n{BEGIN_MARKER}\n10.0.0.1 stale # GoConnect\n{END_MARKER}\n{BEGIN_MARKER}\n10.0.0.2 also-stale # GoConnect\n{END_MARKER}\n"
    );
    tokio::fs::write(&path, malformed).await.unwrap();

    let hosts = HostsFile::new(path.clone());
    hosts
        .update(&[("10.0.0.9".into(), "peer-9".into())])
        .await
        .unwrap();

    let content = tokio::fs::read_to_string(&path).await.unwrap();
    assert_eq!(content.matches(BEGIN_MARKER).count(), 1);
    assert_eq!(content.matches(END_MARKER).count(), 1);
    assert!(content.contains("keep me"));
    assert!(content.contains("10.0.0.9 peer-9 # GoConnect"));
    assert!(!content.contains("stale"));
}
