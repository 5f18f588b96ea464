use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use rusqlite::{Connection, params};
use tokio::sync::Mutex;

use super::model::ChatMessage;

const MEMORY_CACHE_CAPACITY: usize = 1000;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    from_peer TEXT NOT NULL,
    content TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    network_id TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_network ON messages(network_id);
CREATE INDEX IF NOT EXISTS idx_messages_timestamp ON messages(timestamp DESC);
CREATE INDEX IF NOT EXISTS idx_messages_from_peer ON messages(from_peer);
";

/// The embedded chat store (spec §4.5): one `rusqlite` connection opened in
/// WAL mode with a 5s busy timeout, driven from async code via
/// `spawn_blocking`, the same offload idiom the daemon's identity and IPC
/// token writers already use for blocking filesystem work. A bounded
/// in-memory cache mirrors the most recent rows so hot reads (the live chat
/// view) don't round-trip through SQLite.
pub struct ChatStore {
    conn: Arc<Mutex<Connection>>,
    cache: Mutex<VecDeque<ChatMessage>>,
}

impl ChatStore {
    pub async fn open(path: &Path) -> Result<Self> {
        let path = path.to_path_buf();
        let conn = tokio::task::spawn_blocking(move || open_connection(&path))
            .await
            .context("chat store open task panicked")??;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            cache: Mutex::new(VecDeque::with_capacity(MEMORY_CACHE_CAPACITY)),
        };
        store.warm_cache().await?;
        Ok(store)
    }

    async fn warm_cache(&self) -> Result<()> {
        let conn = self.conn.clone();
        let rows = tokio::task::spawn_blocking(move || -> rusqlite::Result<Vec<ChatMessage>> {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare(
                "SELECT id, from_peer, content, timestamp, network_id, created_at \
                 FROM messages ORDER BY timestamp DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![MEMORY_CACHE_CAPACITY as i64], row_to_message)?;
            rows.collect()
        })
        .await
        .context("chat store cache warm task panicked")??;

        let mut cache = self.cache.lock().await;
        cache.extend(rows);
        Ok(())
    }

    /// Saves a message, generating `id` as `<unixnano>-<from>` when absent
    /// (spec §4.5), and mirrors it into the bounded memory cache.
    pub async fn save(&self, mut message: ChatMessage) -> Result<ChatMessage> {
        if message.id.is_empty() {
            message.id = format!("{}-{}", unix_nanos(), message.from_peer);
        }
        if message.created_at == 0 {
            message.created_at = unix_seconds();
        }

        let conn = self.conn.clone();
        let to_insert = message.clone();
        tokio::task::spawn_blocking(move || -> rusqlite::Result<()> {
            let conn = conn.blocking_lock();
            conn.execute(
                "INSERT INTO messages (id, from_peer, content, timestamp, network_id, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    to_insert.id,
                    to_insert.from_peer,
                    to_insert.content,
                    to_insert.timestamp,
                    to_insert.network_id,
                    to_insert.created_at,
                ],
            )?;
            Ok(())
        })
        .await
        .context("chat store save task panicked")??;

        let mut cache = self.cache.lock().await;
        cache.push_front(message.clone());
        cache.truncate(MEMORY_CACHE_CAPACITY);

        Ok(message)
    }

    /// Paged list by network: `limit` most recent messages strictly older
    /// than `before_id`'s timestamp, or the newest `limit` when `before_id`
    /// is empty.
    pub async fn list(
        &self,
        network_id: &str,
        limit: usize,
        before_id: &str,
    ) -> Result<Vec<ChatMessage>> {
        let conn = self.conn.clone();
        let network_id = network_id.to_string();
        let before_id = before_id.to_string();
        let rows = tokio::task::spawn_blocking(move || -> rusqlite::Result<Vec<ChatMessage>> {
            let conn = conn.blocking_lock();
            if before_id.is_empty() {
                let mut stmt = conn.prepare(
                    "SELECT id, from_peer, content, timestamp, network_id, created_at \
                     FROM messages WHERE network_id = ?1 ORDER BY timestamp DESC LIMIT ?2",
                )?;
                let rows =
                    stmt.query_map(params![network_id, limit as i64], row_to_message)?;
                rows.collect()
            } else {
                let cursor_ts: Option<i64> = conn
                    .query_row(
                        "SELECT timestamp FROM messages WHERE id = ?1",
                        params![before_id],
                        |row| row.get(0),
                    )
                    .ok();
                let Some(cursor_ts) = cursor_ts else {
                    return Ok(Vec::new());
                };
                let mut stmt = conn.prepare(
                    "SELECT id, from_peer, content, timestamp, network_id, created_at \
                     FROM messages WHERE network_id = ?1 AND timestamp < ?2 \
                     ORDER BY timestamp DESC LIMIT ?3",
                )?;
                let rows = stmt.query_map(
                    params![network_id, cursor_ts, limit as i64],
                    row_to_message,
                )?;
                rows.collect()
            }
        })
        .await
        .context("chat store list task panicked")??;
        Ok(rows)
    }

    pub async fn search(&self, network_id: &str, substring: &str) -> Result<Vec<ChatMessage>> {
        let conn = self.conn.clone();
        let network_id = network_id.to_string();
        let pattern = format!("%{substring}%");
        let rows = tokio::task::spawn_blocking(move || -> rusqlite::Result<Vec<ChatMessage>> {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare(
                "SELECT id, from_peer, content, timestamp, network_id, created_at \
                 FROM messages WHERE network_id = ?1 AND content LIKE ?2 \
                 ORDER BY timestamp DESC",
            )?;
            let rows = stmt.query_map(params![network_id, pattern], row_to_message)?;
            rows.collect()
        })
        .await
        .context("chat store search task panicked")??;
        Ok(rows)
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let conn = self.conn.clone();
        let id_owned = id.to_string();
        tokio::task::spawn_blocking(move || -> rusqlite::Result<()> {
            let conn = conn.blocking_lock();
            conn.execute("DELETE FROM messages WHERE id = ?1", params![id_owned])?;
            Ok(())
        })
        .await
        .context("chat store delete task panicked")??;

        let mut cache = self.cache.lock().await;
        cache.retain(|m| m.id != id);
        Ok(())
    }

    /// Deletes messages older than `max_age`, relative to now.
    pub async fn delete_older_than(&self, max_age: Duration) -> Result<usize> {
        let cutoff = unix_seconds() - max_age.as_secs() as i64;
        let conn = self.conn.clone();
        let deleted = tokio::task::spawn_blocking(move || -> rusqlite::Result<usize> {
            let conn = conn.blocking_lock();
            conn.execute("DELETE FROM messages WHERE timestamp < ?1", params![cutoff])
        })
        .await
        .context("chat store delete_older_than task panicked")??;

        let mut cache = self.cache.lock().await;
        cache.retain(|m| m.timestamp >= cutoff);
        Ok(deleted)
    }

    /// Runs a WAL checkpoint-truncate, as the daemon does on clean shutdown
    /// (spec §5).
    pub async fn checkpoint_and_close(&self) -> Result<()> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || -> rusqlite::Result<()> {
            let conn = conn.blocking_lock();
            conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")
        })
        .await
        .context("chat store checkpoint task panicked")??;
        Ok(())
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatMessage> {
    Ok(ChatMessage {
        id: row.get(0)?,
        from_peer: row.get(1)?,
        content: row.get(2)?,
        timestamp: row.get(3)?,
        network_id: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn open_connection(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent()
        && !parent.exists()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create chat db directory: {}", parent.display()))?;
    }
    let conn = Connection::open(path)
        .with_context(|| format!("failed to open chat db: {}", path.display()))?;
    conn.busy_timeout(Duration::from_secs(5))
        .context("failed to set chat db busy timeout")?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")
        .context("failed to enable WAL journaling on chat db")?;
    conn.execute_batch(SCHEMA)
        .context("failed to apply chat db schema")?;
    Ok(conn)
}

fn unix_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

fn unix_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
}

pub(crate) fn chat_db_path(data_root: &Path) -> PathBuf {
    data_root.join("chat.db")
}

#[cfg(test)]
#[path = "chat_tests.rs"]
mod tests;
