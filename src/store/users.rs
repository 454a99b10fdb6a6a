use async_trait::async_trait;

use super::{SqliteStore, UserStore};
use crate::error::RelayError;
use crate::models::{ChannelRecord, UserRecord};

#[async_trait]
impl UserStore for SqliteStore {
    async fn upsert_user_if_absent(&self, user: &UserRecord) -> Result<(), RelayError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR IGNORE INTO users (user_id, username, source_channel, first_seen)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                user.user_id,
                &user.username,
                user.source_channel,
                user.first_seen.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn upsert_channel_if_absent(&self, channel: &ChannelRecord) -> Result<(), RelayError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR IGNORE INTO channels (channel_id, title) VALUES (?1, ?2)",
            rusqlite::params![channel.channel_id, &channel.title],
        )?;
        Ok(())
    }

    /// All user ids in insertion order.
    async fn list_user_ids(&self) -> Result<Vec<i64>, RelayError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT user_id FROM users ORDER BY rowid ASC")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(ids)
    }

    async fn count_users(&self) -> Result<u64, RelayError> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row("SELECT count(*) FROM users", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

impl SqliteStore {
    /// Fetch a single user, mostly useful for checking first-seen data.
    #[cfg(test)]
    pub async fn get_user(&self, user_id: i64) -> Result<Option<UserRecord>, RelayError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT user_id, username, source_channel, first_seen FROM users WHERE user_id = ?1",
        )?;
        let mut rows = stmt.query_map(rusqlite::params![user_id], |row| {
            let user_id: i64 = row.get(0)?;
            let username: String = row.get(1)?;
            let source_channel: Option<i64> = row.get(2)?;
            let first_seen: String = row.get(3)?;
            Ok((user_id, username, source_channel, first_seen))
        })?;
        match rows.next() {
            Some(row) => {
                let (user_id, username, source_channel, first_seen) = row?;
                let first_seen = chrono::DateTime::parse_from_rfc3339(&first_seen)
                    .map_err(|e| RelayError::Store(e.to_string()))?
                    .with_timezone(&chrono::Utc);
                Ok(Some(UserRecord {
                    user_id,
                    username,
                    source_channel,
                    first_seen,
                }))
            }
            None => Ok(None),
        }
    }

    #[cfg(test)]
    pub async fn channel_title(&self, channel_id: i64) -> Result<Option<String>, RelayError> {
        let conn = self.conn.lock().await;
        let title = conn
            .query_row(
                "SELECT title FROM channels WHERE channel_id = ?1",
                rusqlite::params![channel_id],
                |row| row.get(0),
            )
            .ok();
        Ok(title)
    }
}
