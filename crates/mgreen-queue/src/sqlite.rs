//! SQLite-backed durable queue — survives restarts, shared between the
//! producing API process and the consumer process through one database file.
//! WAL mode so the producer's appends don't block the consumer's reads.

use crate::{Queue, QueueRecord};
use async_trait::async_trait;
use mgreen_core::{MGreenError, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

/// How often a blocked fetch re-checks the database for new records.
const FETCH_POLL_MS: u64 = 200;

pub struct SqliteQueue {
    conn: Mutex<Connection>,
}

impl SqliteQueue {
    /// Open or create the queue database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| MGreenError::Queue(format!("DB open: {e}")))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| MGreenError::Queue(format!("WAL: {e}")))?;
        // Bounded wait on a locked database instead of failing instantly
        // or blocking forever.
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| MGreenError::Queue(format!("Busy timeout: {e}")))?;
        let queue = Self {
            conn: Mutex::new(conn),
        };
        queue.migrate()?;
        Ok(queue)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|p| p.into_inner());
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS messages (
                offset INTEGER PRIMARY KEY AUTOINCREMENT,
                topic TEXT NOT NULL,
                payload BLOB NOT NULL,
                published_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_topic ON messages(topic, offset);

            CREATE TABLE IF NOT EXISTS consumer_offsets (
                group_id TEXT NOT NULL,
                topic TEXT NOT NULL,
                next_offset INTEGER NOT NULL DEFAULT 1,
                PRIMARY KEY (group_id, topic)
            );
            ",
        )
        .map_err(|e| MGreenError::Queue(format!("Migration: {e}")))?;
        Ok(())
    }

    fn pending(&self, group: &str, topic: &str, max: usize) -> Result<Vec<QueueRecord>> {
        let conn = self.conn.lock().unwrap_or_else(|p| p.into_inner());
        let mut stmt = conn
            .prepare_cached(
                "SELECT offset, payload FROM messages
                 WHERE topic = ?1
                   AND offset >= COALESCE(
                       (SELECT next_offset FROM consumer_offsets
                        WHERE group_id = ?2 AND topic = ?1), 1)
                 ORDER BY offset
                 LIMIT ?3",
            )
            .map_err(|e| MGreenError::Queue(format!("Prepare fetch: {e}")))?;
        let records = stmt
            .query_map(
                rusqlite::params![topic, group, max as i64],
                |row| {
                    Ok(QueueRecord {
                        offset: row.get::<_, i64>(0)? as u64,
                        payload: row.get(1)?,
                    })
                },
            )
            .map_err(|e| MGreenError::Queue(format!("Fetch: {e}")))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| MGreenError::Queue(format!("Fetch row: {e}")))?;
        Ok(records)
    }
}

#[async_trait]
impl Queue for SqliteQueue {
    async fn append(&self, topic: &str, payload: &[u8]) -> Result<u64> {
        let conn = self.conn.lock().unwrap_or_else(|p| p.into_inner());
        conn.execute(
            "INSERT INTO messages (topic, payload, published_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![topic, payload, chrono::Utc::now().to_rfc3339()],
        )
        .map_err(|e| MGreenError::Queue(format!("Append: {e}")))?;
        Ok(conn.last_insert_rowid() as u64)
    }

    async fn fetch(
        &self,
        group: &str,
        topic: &str,
        max: usize,
        wait: Duration,
    ) -> Result<Vec<QueueRecord>> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let records = self.pending(group, topic, max)?;
            if !records.is_empty() {
                return Ok(records);
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Ok(Vec::new());
            }
            tokio::time::sleep(remaining.min(Duration::from_millis(FETCH_POLL_MS))).await;
        }
    }

    async fn commit(&self, group: &str, topic: &str, offset: u64) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|p| p.into_inner());
        conn.execute(
            "INSERT INTO consumer_offsets (group_id, topic, next_offset)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(group_id, topic)
             DO UPDATE SET next_offset = MAX(next_offset, excluded.next_offset)",
            rusqlite::params![group, topic, offset as i64 + 1],
        )
        .map_err(|e| MGreenError::Queue(format!("Commit: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("mgreen-queue-test-{name}-{}.db", std::process::id()))
    }

    #[tokio::test]
    async fn test_append_fetch_commit() {
        let path = temp_db("basic");
        let q = SqliteQueue::open(&path).unwrap();

        let off_a = q.append("t", b"a").await.unwrap();
        let off_b = q.append("t", b"b").await.unwrap();
        assert!(off_b > off_a);

        let records = q.fetch("g", "t", 10, Duration::from_millis(10)).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].payload, b"a");

        q.commit("g", "t", off_a).await.unwrap();
        let records = q.fetch("g", "t", 10, Duration::from_millis(10)).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].payload, b"b");

        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn test_uncommitted_survive_reopen() {
        let path = temp_db("reopen");
        {
            let q = SqliteQueue::open(&path).unwrap();
            let first = q.append("t", b"keep").await.unwrap();
            q.append("t", b"redeliver").await.unwrap();
            q.commit("g", "t", first).await.unwrap();
        }
        // Reopen — only the uncommitted record should come back.
        let q = SqliteQueue::open(&path).unwrap();
        let records = q.fetch("g", "t", 10, Duration::from_millis(10)).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].payload, b"redeliver");

        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn test_commit_never_moves_backwards() {
        let path = temp_db("backwards");
        let q = SqliteQueue::open(&path).unwrap();
        let a = q.append("t", b"a").await.unwrap();
        let b = q.append("t", b"b").await.unwrap();

        q.commit("g", "t", b).await.unwrap();
        q.commit("g", "t", a).await.unwrap(); // stale commit, ignored

        let records = q.fetch("g", "t", 10, Duration::from_millis(10)).await.unwrap();
        assert!(records.is_empty());

        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let path = temp_db("topics");
        let q = SqliteQueue::open(&path).unwrap();
        q.append("t1", b"one").await.unwrap();
        q.append("t2", b"two").await.unwrap();

        let records = q.fetch("g", "t1", 10, Duration::from_millis(10)).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].payload, b"one");

        std::fs::remove_file(&path).ok();
    }
}
