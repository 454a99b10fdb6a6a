pub mod users;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::RelayError;
use crate::models::{ChannelRecord, UserRecord};

/// The persistence operations the relay depends on.
///
/// Both upserts are insert-if-absent: an existing record is never touched,
/// so concurrent registrations of the same id are harmless.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn upsert_user_if_absent(&self, user: &UserRecord) -> Result<(), RelayError>;

    async fn upsert_channel_if_absent(&self, channel: &ChannelRecord) -> Result<(), RelayError>;

    async fn list_user_ids(&self) -> Result<Vec<i64>, RelayError>;

    async fn count_users(&self) -> Result<u64, RelayError>;
}

/// Thread-safe SQLite store for known users and channels
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create the SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        // journal_mode PRAGMA always returns the resulting mode, so use query_row
        let _: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;

        Self::run_migrations(&conn)?;

        info!("User store initialized at: {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing)
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn run_migrations(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS users (
                user_id INTEGER NOT NULL UNIQUE,
                username TEXT NOT NULL DEFAULT '',
                source_channel INTEGER,
                first_seen TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS channels (
                channel_id INTEGER NOT NULL UNIQUE,
                title TEXT NOT NULL DEFAULT '',
                first_seen TEXT NOT NULL DEFAULT (datetime('now'))
            );
            ",
        )
        .context("Failed to run store migrations")?;
        Ok(())
    }
}
