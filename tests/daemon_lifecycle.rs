//! Daemon lifecycle integration test: starts a real daemon against a temp
//! state root, confirms the IPC token and lock file appear, then confirms
//! graceful shutdown cleans them up again.

use std::time::Duration;

use goconnect_daemon::daemon::{Environment, RunOptions, run};
use tempfile::tempdir;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

fn pick_free_port() -> u16 {
    let sock = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    sock.local_addr().unwrap().port()
}

#[tokio::test]
async fn graceful_shutdown_cleans_up_runtime_state() {
    let dir = tempdir().unwrap();
    let root = dir.path().to_path_buf();
    let port = pick_free_port();

    let config_path = root.join("config.yaml");
    tokio::fs::write(
        &config_path,
        format!("daemon:\n  local_port: {port}\n  health_check_interval: 1\n"),
    )
    .await
    .unwrap();

    let cancel = CancellationToken::new();
    let opts = RunOptions {
        root: Some(root.clone()),
        config_path: Some(config_path),
        log_path: None,
        env: Environment::Development,
        cancel: Some(cancel.clone()),
    };

    let handle = tokio::spawn(run(opts));

    // Give the daemon a moment to stand up its surfaces.
    let ipc_token_path = root.join("ipc-token");
    let mut waited = Duration::ZERO;
    while !ipc_token_path.exists() && waited < Duration::from_secs(5) {
        tokio::time::sleep(Duration::from_millis(50)).await;
        waited += Duration::from_millis(50);
    }
    assert!(ipc_token_path.exists(), "IPC token was not created");
    assert!(
        root.join("daemon.pid").exists(),
        "no daemon.pid lock file found under the state root"
    );

    cancel.cancel();
    let result = timeout(Duration::from_secs(10), handle)
        .await
        .expect("daemon did not shut down in time")
        .expect("daemon task panicked");
    assert!(result.is_ok(), "daemon run() returned an error: {result:?}");

    assert!(
        !ipc_token_path.exists(),
        "IPC token file was not removed on shutdown"
    );
}

#[tokio::test]
async fn two_daemons_on_the_same_root_conflict() {
    let dir = tempdir().unwrap();
    let root = dir.path().to_path_buf();
    let port = pick_free_port();
    let config_path = root.join("config.yaml");
    tokio::fs::write(&config_path, format!("daemon:\n  local_port: {port}\n"))
        .await
        .unwrap();

    let cancel_a = CancellationToken::new();
    let opts_a = RunOptions {
        root: Some(root.clone()),
        config_path: Some(config_path.clone()),
        log_path: None,
        env: Environment::Development,
        cancel: Some(cancel_a.clone()),
    };
    let handle_a = tokio::spawn(run(opts_a));

    let ipc_token_path = root.join("ipc-token");
    let mut waited = Duration::ZERO;
    while !ipc_token_path.exists() && waited < Duration::from_secs(5) {
        tokio::time::sleep(Duration::from_millis(50)).await;
        waited += Duration::from_millis(50);
    }
    assert!(ipc_token_path.exists(), "first daemon never became ready");

    let opts_b = RunOptions {
        root: Some(root.clone()),
        config_path: Some(config_path),
        log_path: None,
        env: Environment::Development,
        cancel: Some(CancellationToken::new()),
    };
    let second = run(opts_b).await;
    assert!(
        second.is_err(),
        "a second daemon on the same state root should fail to acquire the lock"
    );

    cancel_a.cancel();
    let _ = timeout(Duration::from_secs(10), handle_a).await;
}
