use std::env;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Discovers and owns the daemon's on-disk layout: the config directory,
/// the identity file, the IPC token, the RPC socket, and the chat database.
/// Mirrors the split between directory discovery/hardening and the typed
/// settings struct below.
#[derive(Debug, Clone)]
pub struct Paths {
    pub root: PathBuf,
    pub data_root: PathBuf,
    pub config: PathBuf,
    pub identity: PathBuf,
    pub ipc_token: PathBuf,
    pub socket: PathBuf,
    pub chat_db: PathBuf,
    pub daemon_pid: PathBuf,
}

impl Paths {
    pub fn discover_with_override(override_root: Option<&Path>) -> Result<Self> {
        if let Some(root) = override_root {
            return Ok(Self::from_root(root.to_path_buf()));
        }

        if let Ok(root) = env::var("GOCONNECT_ROOT")
            && !root.trim().is_empty()
        {
            return Ok(Self::from_root(PathBuf::from(root)));
        }

        Self::discover()
    }

    pub fn discover() -> Result<Self> {
        let home = env::var("HOME").context("HOME is not set")?;
        let root = Path::new(&home).join(".goconnect");
        Ok(Self::from_root(root))
    }

    pub fn from_root(root: PathBuf) -> Self {
        let data_root = root.clone();
        Self {
            config: root.join("config.yaml"),
            identity: root.join("identity.json"),
            ipc_token: root.join("ipc-token"),
            socket: root.join("daemon.sock"),
            chat_db: data_root.join("chat.db"),
            daemon_pid: root.join("daemon.pid"),
            data_root,
            root,
        }
    }

    pub fn ensure_root_exists(&self) -> Result<()> {
        if self.root.exists() {
            let meta = fs::symlink_metadata(&self.root).with_context(|| {
                format!(
                    "failed to read metadata for GoConnect root: {}",
                    self.root.display()
                )
            })?;
            if meta.file_type().is_symlink() {
                anyhow::bail!(
                    "GoConnect root directory is a symlink (security violation): {}. \
                     Remove the symlink and restart.",
                    self.root.display()
                );
            }
        } else {
            fs::create_dir_all(&self.root).with_context(|| {
                format!(
                    "failed to create GoConnect root dir: {}",
                    self.root.display()
                )
            })?;
        }
        #[cfg(unix)]
        fs::set_permissions(&self.root, fs::Permissions::from_mode(0o700)).with_context(|| {
            format!(
                "failed to set GoConnect dir permissions: {}",
                self.root.display()
            )
        })?;
        Ok(())
    }
}

/// Windows named-pipe path for the RPC endpoint (see §6 of the spec).
pub const WINDOWS_PIPE_NAME: &str = r"\\.\pipe\goconnect-daemon";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerSection {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WireguardSection {
    pub interface_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DaemonSection {
    #[serde(default)]
    pub socket_path: Option<PathBuf>,
    #[serde(default)]
    pub ipc_token_path: Option<PathBuf>,
    #[serde(default = "default_local_port")]
    pub local_port: u16,
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval: u64,
}

fn default_local_port() -> u16 {
    7230
}

fn default_health_check_interval() -> u64 {
    5
}

impl Default for DaemonSection {
    fn default() -> Self {
        Self {
            socket_path: None,
            ipc_token_path: None,
            local_port: default_local_port(),
            health_check_interval: default_health_check_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct P2pSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_stun_server")]
    pub stun_server: String,
}

fn default_true() -> bool {
    true
}

fn default_stun_server() -> String {
    "stun:stun.l.google.com:19302".to_string()
}

impl Default for P2pSection {
    fn default() -> Self {
        Self {
            enabled: true,
            stun_server: default_stun_server(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SettingsSection {
    #[serde(default = "default_true")]
    pub auto_connect: bool,
    #[serde(default = "default_true")]
    pub notifications_enabled: bool,
}

impl Default for SettingsSection {
    fn default() -> Self {
        Self {
            auto_connect: true,
            notifications_enabled: true,
        }
    }
}

/// Top-level YAML config (see spec §6). Every section is optional so a
/// freshly-initialized daemon can start with defaults and be reconfigured
/// later via the `Config` RPC/HTTP endpoints.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: Option<ServerSection>,
    #[serde(default)]
    pub wireguard: Option<WireguardSection>,
    #[serde(default)]
    pub daemon: DaemonSection,
    #[serde(default)]
    pub p2p: P2pSection,
    #[serde(default)]
    pub settings: SettingsSection,
    #[serde(default)]
    pub identity_path: Option<PathBuf>,
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read config: {}", path.display()));
            }
        };
        let parsed = serde_yaml::from_str::<Config>(&raw)
            .with_context(|| format!("failed to parse config: {}", path.display()))?;
        Ok(parsed)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.exists()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create directory: {}", parent.display()))?;
        }
        let serialized = serde_yaml::to_string(self)
            .with_context(|| format!("failed to serialize config: {}", path.display()))?;
        tokio::fs::write(path, serialized)
            .await
            .with_context(|| format!("failed to write config: {}", path.display()))?;
        Ok(())
    }

    pub fn effective_local_port(&self, cli_override: Option<u16>) -> u16 {
        cli_override.unwrap_or(self.daemon.local_port)
    }

    pub fn directory_url(&self) -> Option<&str> {
        self.server.as_ref().map(|s| s.url.as_str())
    }
}

#[cfg(test)]
#[path = "tests.rs"]
mod tests;
