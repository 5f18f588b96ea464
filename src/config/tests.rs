use super::*;
use tempfile::tempdir;

#[test]
fn from_root_lays_out_expected_paths() {
    let dir = tempdir().unwrap();
    let paths = Paths::from_root(dir.path().to_path_buf());

    assert_eq!(paths.config, dir.path().join("config.yaml"));
    assert_eq!(paths.identity, dir.path().join("identity.json"));
    assert_eq!(paths.ipc_token, dir.path().join("ipc-token"));
    assert_eq!(paths.socket, dir.path().join("daemon.sock"));
    assert_eq!(paths.chat_db, dir.path().join("chat.db"));
    assert_eq!(paths.daemon_pid, dir.path().join("daemon.pid"));
}

#[test]
fn ensure_root_exists_creates_directory_with_owner_only_perms() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("goconnect");
    let paths = Paths::from_root(root.clone());

    paths.ensure_root_exists().unwrap();
    assert!(root.is_dir());

    #[cfg(unix)]
    {
        let meta = fs::metadata(&root).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o700);
    }
}

#[test]
fn ensure_root_exists_rejects_symlink() {
    #[cfg(unix)]
    {
        let dir = tempdir().unwrap();
        let real = dir.path().join("real");
        fs::create_dir(&real).unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let paths = Paths::from_root(link);
        assert!(paths.ensure_root_exists().is_err());
    }
}

#[test]
fn discover_with_override_prefers_explicit_root() {
    let dir = tempdir().unwrap();
    let paths = Paths::discover_with_override(Some(dir.path())).unwrap();
    assert_eq!(paths.root, dir.path());
}

#[tokio::test]
async fn load_missing_config_returns_defaults() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.yaml");

    let config = Config::load(&path).await.unwrap();
    assert!(config.server.is_none());
    assert!(config.wireguard.is_none());
    assert_eq!(config.daemon.local_port, 7230);
    assert_eq!(config.daemon.health_check_interval, 5);
    assert!(config.p2p.enabled);
    assert_eq!(config.p2p.stun_server, "stun:stun.l.google.com:19302");
    assert!(config.settings.auto_connect);
    assert!(config.settings.notifications_enabled);
}

#[tokio::test]
async fn save_then_load_roundtrips() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("config.yaml");

    let mut config = Config::default();
    config.server = Some(ServerSection {
        url: "https://directory.example.com".to_string(),
    });
    config.wireguard = Some(WireguardSection {
        interface_name: "goconnect0".to_string(),
    });
    config.daemon.local_port = 9000;
    config.p2p.enabled = false;

    config.save(&path).await.unwrap();
    let reloaded = Config::load(&path).await.unwrap();

    assert_eq!(
        reloaded.server.unwrap().url,
        "https://directory.example.com"
    );
    assert_eq!(reloaded.wireguard.unwrap().interface_name, "goconnect0");
    assert_eq!(reloaded.daemon.local_port, 9000);
    assert!(!reloaded.p2p.enabled);
}

#[test]
fn effective_local_port_prefers_cli_override() {
    let config = Config::default();
    assert_eq!(config.effective_local_port(Some(1234)), 1234);
    assert_eq!(config.effective_local_port(None), 7230);
}

#[test]
fn directory_url_is_none_without_server_section() {
    let config = Config::default();
    assert_eq!(config.directory_url(), None);
}
