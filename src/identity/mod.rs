use std::fs;
use std::path::Path;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use anyhow::{Context, Result, anyhow};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::config::Paths;

const KEYRING_SERVICE: &str = "goconnect-daemon";
const KEYRING_USERNAME: &str = "auth-token";

/// Owns the device key pair and the directory-assigned device id. The
/// private key is clamped per X25519 conventions and never leaves the
/// process except to configure the tunnel interface (see spec §4.2).
///
/// Manual `Debug` so an accidental `{:?}` in a log line never prints the
/// private key.
#[derive(Clone)]
pub struct Identity {
    secret: StaticSecret,
    public_key_base64: String,
    device_id: Option<String>,
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("public_key", &self.public_key_base64)
            .field("device_id", &self.device_id)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedIdentity {
    private_key: String,
    public_key: String,
    #[serde(default)]
    device_id: Option<String>,
}

impl Identity {
    /// `LoadOrCreateIdentity` — idempotent. Generates 32 random bytes,
    /// clamps them for Curve25519, and persists base64-encoded key material
    /// to a 0600 identity file. Returns the existing identity on
    /// subsequent calls.
    pub fn load_or_generate(paths: &Paths) -> Result<Self> {
        paths.ensure_root_exists()?;

        if paths.identity.exists() {
            return Self::load(&paths.identity);
        }

        let secret = generate_clamped_secret()?;
        let public = PublicKey::from(&secret);
        let public_key_base64 = STANDARD.encode(public.as_bytes());

        let identity = Self {
            secret,
            public_key_base64,
            device_id: None,
        };
        identity.persist(&paths.identity)?;
        Ok(identity)
    }

    fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read identity file: {}", path.display()))?;
        let persisted: PersistedIdentity = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse identity file: {}", path.display()))?;

        let secret_bytes = STANDARD.decode(persisted.private_key.trim()).map_err(|err| {
            anyhow!(
                "invalid identity file at {}: private key is not valid base64 ({err})",
                path.display()
            )
        })?;
        let secret_bytes: [u8; 32] = secret_bytes.try_into().map_err(|v: Vec<u8>| {
            anyhow!(
                "invalid identity file at {}: expected 32-byte private key, got {}",
                path.display(),
                v.len()
            )
        })?;

        Ok(Self {
            secret: StaticSecret::from(secret_bytes),
            public_key_base64: persisted.public_key,
            device_id: persisted.device_id,
        })
    }

    fn persist(&self, path: &Path) -> Result<()> {
        let persisted = PersistedIdentity {
            private_key: STANDARD.encode(self.secret.to_bytes()),
            public_key: self.public_key_base64.clone(),
            device_id: self.device_id.clone(),
        };
        let serialized =
            serde_json::to_string_pretty(&persisted).context("failed to serialize identity")?;

        // Atomic write: temp file with a randomized name, then rename, matching
        // the daemon's existing token-file write discipline.
        let mut tmp_name_bytes = [0u8; 8];
        getrandom::getrandom(&mut tmp_name_bytes)
            .map_err(|err| anyhow!("failed to generate random temp filename: {err}"))?;
        let tmp_path = path
            .parent()
            .unwrap_or(Path::new("."))
            .join(format!(".identity.{}.tmp", hex::encode(tmp_name_bytes)));

        #[cfg(unix)]
        {
            use std::io::Write;
            use std::os::unix::fs::OpenOptionsExt;
            let mut file = fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .mode(0o600)
                .open(&tmp_path)
                .with_context(|| format!("failed to create {}", tmp_path.display()))?;
            file.write_all(serialized.as_bytes())
                .context("failed to write identity temp file")?;
        }
        #[cfg(not(unix))]
        {
            fs::write(&tmp_path, &serialized)
                .with_context(|| format!("failed to write {}", tmp_path.display()))?;
        }

        fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename identity file into place: {}", path.display()))?;
        #[cfg(unix)]
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))
            .with_context(|| format!("failed to set identity file permissions: {}", path.display()))?;
        Ok(())
    }

    /// `Update(device_id)` — stores the server-assigned opaque device
    /// identifier and re-persists the identity file.
    pub fn update_device_id(&mut self, paths: &Paths, device_id: String) -> Result<()> {
        self.device_id = Some(device_id);
        self.persist(&paths.identity)
    }

    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    pub fn public_key_base64(&self) -> &str {
        &self.public_key_base64
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::from(&self.secret)
    }

    pub fn diffie_hellman(&self, peer_public: &PublicKey) -> x25519_dalek::SharedSecret {
        self.secret.diffie_hellman(peer_public)
    }

    /// `StoreAuthToken` — stores the bearer token in the OS credential
    /// store under a well-known service name, never in the identity file.
    pub fn store_auth_token(&self, token: &str) -> Result<()> {
        let entry = keyring::Entry::new(KEYRING_SERVICE, KEYRING_USERNAME)
            .context("failed to open OS credential store entry")?;
        entry
            .set_password(token)
            .context("failed to store auth token in OS credential store")?;
        Ok(())
    }

    /// `RetrieveAuthToken` — fails with `NotFound` if no token has been
    /// stored yet.
    pub fn retrieve_auth_token(&self) -> Result<Option<String>> {
        let entry = keyring::Entry::new(KEYRING_SERVICE, KEYRING_USERNAME)
            .context("failed to open OS credential store entry")?;
        match entry.get_password() {
            Ok(token) => Ok(Some(token)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(err).context("failed to read auth token from OS credential store"),
        }
    }
}

/// Generates 32 random bytes and clamps them per X25519 conventions:
/// `buf[0] &= 248; buf[31] &= 127; buf[31] |= 64`.
fn generate_clamped_secret() -> Result<StaticSecret> {
    let mut buf = [0u8; 32];
    getrandom::getrandom(&mut buf).map_err(|err| anyhow!("failed to gather randomness: {err}"))?;
    buf[0] &= 248;
    buf[31] &= 127;
    buf[31] |= 64;
    Ok(StaticSecret::from(buf))
}

#[cfg(test)]
#[path = "tests.rs"]
mod tests;
