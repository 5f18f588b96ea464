//! Property-style tests for the hosts-file, IPC token, and transfer-math
//! invariants (per the daemon's `proptest` dev-dependency).

use goconnect_daemon::control_plane::IpcToken;
use goconnect_daemon::overlay::hosts::HostsFile;
use goconnect_daemon::overlay::model::{TransferSession, TransferStatus};
use proptest::prelude::*;
use tempfile::tempdir;

fn arb_entries() -> impl Strategy<Value = Vec<(String, String)>> {
    prop::collection::vec(
        (
            (0u8..=255, 0u8..=255, 0u8..=255, 0u8..=255)
                .prop_map(|(a, b, c, d)| format!("{a}.{b}.{c}.{d}")),
            "[a-z][a-z0-9-]{0,15}",
        ),
        0..8,
    )
}

proptest! {
    /// For any entry list, updating twice in a row produces byte-identical
    /// output, and exactly one BEGIN/END pair is ever present.
    #[test]
    fn hosts_update_is_idempotent(entries in arb_entries()) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let dir = tempdir().unwrap();
            let path = dir.path().join("hosts");
            let hosts = HostsFile::new(path.clone());

            hosts.update(&entries).await.unwrap();
            let first = tokio::fs::read_to_string(&path).await.unwrap();
            hosts.update(&entries).await.unwrap();
            let second = tokio::fs::read_to_string(&path).await.unwrap();

            prop_assert_eq!(&first, &second);
            let begin_count = first.matches("# BEGIN GoConnect Managed Block").count();
            let end_count = first.matches("# END GoConnect Managed Block").count();
            if entries.is_empty() {
                prop_assert_eq!(begin_count, 0);
                prop_assert_eq!(end_count, 0);
            } else {
                prop_assert_eq!(begin_count, 1);
                prop_assert_eq!(end_count, 1);
            }
            Ok(())
        })?;
    }

    /// Content outside the managed block survives any sequence of updates
    /// byte-for-byte.
    #[test]
    fn hosts_update_preserves_surrounding_content(entries in arb_entries()) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let dir = tempdir().unwrap();
            let path = dir.path().join("hosts");
            let preexisting = "127.0.0.1 localhost\n::1 localhost\n";
            tokio::fs::write(&path, preexisting).await.unwrap();

            let hosts = HostsFile::new(path.clone());
            hosts.update(&entries).await.unwrap();

            let content = tokio::fs::read_to_string(&path).await.unwrap();
            prop_assert!(content.contains("127.0.0.1 localhost"));
            prop_assert!(content.contains("::1 localhost"));
            Ok(())
        })?;
    }
}

proptest! {
    /// Independently-generated tokens never collide and are always 64 hex
    /// characters (32 random bytes, hex-encoded).
    #[test]
    fn ipc_tokens_are_64_hex_chars_and_distinct(seed in 0u8..=255) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let dir = tempdir().unwrap();
            let path = dir.path().join(format!("ipc-token-{seed}"));

            let a = IpcToken::generate(&path).await.unwrap();
            let first_value = a.value().to_string();
            prop_assert_eq!(first_value.len(), 64);
            prop_assert!(first_value.chars().all(|c| c.is_ascii_hexdigit()));

            let b = IpcToken::generate(&path).await.unwrap();
            prop_assert_ne!(first_value, b.value().to_string());
            prop_assert!(b.verify(b.value()));
            prop_assert!(!a.verify(b.value()));
            Ok(())
        })?;
    }
}

fn transfer(file_size: u64, sent_bytes: u64, start_time: i64) -> TransferSession {
    TransferSession {
        id: "transfer-1".to_string(),
        peer_id: "peer-1".to_string().into(),
        file_path: "/tmp/file.bin".to_string(),
        file_name: "file.bin".to_string(),
        file_size,
        sent_bytes,
        status: TransferStatus::InProgress,
        is_sender: true,
        start_time,
        end_time: None,
        error: None,
    }
}

proptest! {
    /// `eta == 0` whenever the transfer has fully landed, regardless of how
    /// much (simulated) time has elapsed.
    #[test]
    fn eta_is_zero_once_complete(file_size in 1u64..1_000_000, elapsed in 0i64..100_000) {
        let session = transfer(file_size, file_size, 0);
        prop_assert_eq!(session.eta_secs(elapsed), 0.0);
    }

    /// Speed and eta are never negative, and eta is zero exactly when speed
    /// is zero (for an incomplete transfer).
    #[test]
    fn speed_and_eta_are_non_negative(
        file_size in 2u64..1_000_000,
        sent_bytes in 0u64..1_000_000,
        elapsed in 0i64..100_000,
    ) {
        let sent_bytes = sent_bytes.min(file_size - 1);
        let session = transfer(file_size, sent_bytes, 0);
        let speed = session.speed_bytes_per_sec(elapsed);
        let eta = session.eta_secs(elapsed);

        prop_assert!(speed >= 0.0);
        prop_assert!(eta >= 0.0);
        if speed == 0.0 {
            prop_assert_eq!(eta, 0.0);
        }
    }
}
