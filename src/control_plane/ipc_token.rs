use std::path::Path;

use anyhow::{Context, Result};
use subtle::ConstantTimeEq;
use tracing::info;

/// The per-install bearer token guarding the RPC surface (spec'd IPCToken).
/// Unlike the identity file, this is *not* load-or-generate: a fresh token
/// is minted on every daemon start and the file's existence is the
/// observable proof that the RPC surface is live.
#[derive(Clone)]
pub struct IpcToken {
    value: String,
}

impl IpcToken {
    /// Generates 32 random bytes, hex-encodes them (64 chars), and writes
    /// them atomically to `path` with 0600 permissions, overwriting any
    /// token left behind by a previous run.
    pub async fn generate(path: &Path) -> Result<Self> {
        let mut token_bytes = [0u8; 32];
        getrandom::getrandom(&mut token_bytes).context("failed to generate random IPC token")?;
        let value = hex::encode(token_bytes);

        if let Some(parent) = path.parent()
            && !parent.exists()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create directory: {}", parent.display()))?;
        }

        let mut tmp_name_bytes = [0u8; 8];
        getrandom::getrandom(&mut tmp_name_bytes)
            .context("failed to generate random temp filename")?;
        let tmp_path = path
            .parent()
            .unwrap_or(Path::new("."))
            .join(format!(".ipc-token.{}.tmp", hex::encode(tmp_name_bytes)));

        let value_clone = value.clone();
        let tmp_path_clone = tmp_path.clone();
        tokio::task::spawn_blocking(move || write_owner_only(&tmp_path_clone, &value_clone))
            .await
            .context("IPC token write task panicked")??;

        tokio::fs::rename(&tmp_path, path).await.with_context(|| {
            format!(
                "failed to rename IPC token into place: {}",
                path.display()
            )
        })?;

        info!(path = %path.display(), "generated IPC token for this run");
        Ok(Self { value })
    }

    /// Removes the token file. Idempotent: a missing file is not an error.
    pub async fn cleanup(path: &Path) -> Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("failed to remove IPC token: {}", path.display()))
            }
        }
    }

    /// Constant-time comparison against the `x-goconnect-ipc-token` header
    /// value. Length differences short-circuit (safe: token length is not
    /// secret, only its content is).
    pub fn verify(&self, candidate: &str) -> bool {
        if candidate.len() != self.value.len() {
            return false;
        }
        self.value.as_bytes().ct_eq(candidate.as_bytes()).into()
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

#[cfg(unix)]
fn write_owner_only(path: &Path, contents: &str) -> Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    file.write_all(contents.as_bytes())
        .context("failed to write IPC token")?;
    Ok(())
}

#[cfg(not(unix))]
fn write_owner_only(path: &Path, contents: &str) -> Result<()> {
    std::fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))
}

#[cfg(test)]
#[path = "ipc_token_tests.rs"]
mod tests;
