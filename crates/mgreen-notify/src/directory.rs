//! Recipient directory backed by the application database.
//!
//! Reads `telegram_integration` rows written by the integration service.
//! This side only ever lists — create/delete belongs to that service.

use async_trait::async_trait;
use mgreen_core::types::Recipient;
use mgreen_core::{MGreenError, RecipientDirectory, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;

pub struct SqliteDirectory {
    conn: Mutex<Connection>,
}

impl SqliteDirectory {
    /// Open the application database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| MGreenError::Directory(format!("DB open: {e}")))?;
        // The integration service owns this table; create it only so a
        // fresh deployment starts with an empty directory instead of a
        // missing-table error.
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS telegram_integration (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                telegram_id INTEGER NOT NULL UNIQUE
            );",
        )
        .map_err(|e| MGreenError::Directory(format!("Migration: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

#[async_trait]
impl RecipientDirectory for SqliteDirectory {
    async fn list_recipients(&self) -> Result<Vec<Recipient>> {
        let conn = self.conn.lock().unwrap_or_else(|p| p.into_inner());
        let mut stmt = conn
            .prepare("SELECT id, user_id, telegram_id FROM telegram_integration ORDER BY id")
            .map_err(|e| MGreenError::Directory(format!("Prepare: {e}")))?;
        let recipients = stmt
            .query_map([], |row| {
                Ok(Recipient {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    telegram_id: row.get(2)?,
                })
            })
            .map_err(|e| MGreenError::Directory(format!("Query: {e}")))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| MGreenError::Directory(format!("Row: {e}")))?;
        Ok(recipients)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("mgreen-dir-test-{name}-{}.db", std::process::id()))
    }

    #[tokio::test]
    async fn test_empty_directory() {
        let path = temp_db("empty");
        let dir = SqliteDirectory::open(&path).unwrap();
        assert!(dir.list_recipients().await.unwrap().is_empty());
        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn test_lists_integration_rows() {
        let path = temp_db("rows");
        let dir = SqliteDirectory::open(&path).unwrap();
        {
            let conn = dir.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO telegram_integration (user_id, telegram_id) VALUES (?1, ?2)",
                rusqlite::params![10, 111],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO telegram_integration (user_id, telegram_id) VALUES (?1, ?2)",
                rusqlite::params![11, 222],
            )
            .unwrap();
        }
        let recipients = dir.list_recipients().await.unwrap();
        assert_eq!(recipients.len(), 2);
        assert_eq!(recipients[0].telegram_id, 111);
        assert_eq!(recipients[1].user_id, 11);
        std::fs::remove_file(&path).ok();
    }
}
