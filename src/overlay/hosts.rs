use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::sync::Mutex;

const BEGIN_MARKER: &str = "# BEGIN GoConnect Managed Block";
const END_MARKER: &str = "# END GoConnect Managed Block";

/// Rewrites the managed block of a hosts file, serializing every update
/// through a single lock (spec §5: "the hosts-file writer serializes all
/// updates through a single mutex"). Content outside the `BEGIN`/`END`
/// markers is preserved byte-for-byte; a duplicated or malformed block is
/// coalesced into exactly one pair on the next update.
pub struct HostsFile {
    path: PathBuf,
    lock: Mutex<()>,
}

impl HostsFile {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    /// Replaces the managed block with `entries` (`(ip, hostname)` pairs).
    /// An empty list removes the block entirely. Writes are atomic
    /// (write-then-rename) so a crash mid-update never leaves a partial
    /// file in place.
    pub async fn update(&self, entries: &[(String, String)]) -> Result<()> {
        let _guard = self.lock.lock().await;

        let existing = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read hosts file: {}", self.path.display()));
            }
        };

        let rewritten = rewrite(&existing, entries);

        write_atomic(&self.path, &rewritten)
            .await
            .with_context(|| format!("failed to write hosts file: {}", self.path.display()))
    }
}

/// Strips any existing `BEGIN`/`END` region(s) -- coalescing duplicates --
/// and appends one fresh block built from `entries`, unless `entries` is
/// empty, in which case no block is written at all.
fn rewrite(original: &str, entries: &[(String, String)]) -> String {
    let mut outside = Vec::new();
    let mut in_block = false;
    for line in original.lines() {
        let trimmed = line.trim_end();
        if trimmed == BEGIN_MARKER {
            in_block = true;
            continue;
        }
        if trimmed == END_MARKER {
            in_block = false;
            continue;
        }
        if !in_block {
            outside.push(line.to_string());
        }
    }
    // Trim trailing blank lines left behind by a removed block so repeated
    // updates don't accumulate blank padding.
    while matches!(outside.last(), Some(line) if line.is_empty()) {
        outside.pop();
    }

    let mut result = outside.join("\n");
    if !result.is_empty() {
        result.push('\n');
    }

    if !entries.is_empty() {
        result.push_str(BEGIN_MARKER);
        result.push('\n');
        for (ip, hostname) in entries {
            result.push_str(&format!("{ip} {hostname} # GoConnect\n"));
        }
        result.push_str(END_MARKER);
        result.push('\n');
    }

    result
}

async fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.exists()
    {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut tmp_name_bytes = [0u8; 8];
    getrandom::getrandom(&mut tmp_name_bytes).context("failed to generate random temp filename")?;
    let tmp_path = path
        .parent()
        .unwrap_or(Path::new("."))
        .join(format!(".hosts.{}.tmp", hex::encode(tmp_name_bytes)));

    tokio::fs::write(&tmp_path, contents).await?;
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

#[cfg(test)]
#[path = "hosts_tests.rs"]
mod tests;
