//! In-memory doubles for the gateway and store, shared by unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::RelayError;
use crate::gateway::Gateway;
use crate::models::{ChannelRecord, Keyboard, UserRecord};
use crate::store::UserStore;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Approve { chat_id: i64, user_id: i64 },
    SendText { chat_id: i64, text: String, keyboard: bool },
    Copy { to: i64, from: i64, message_id: i64 },
}

/// Records every outbound call with the (tokio) time it was issued.
#[derive(Default)]
pub struct RecordingGateway {
    calls: Mutex<Vec<(Instant, Call)>>,
    latency: Option<Duration>,
    fail: bool,
    /// `send_text` never completes (after recording the call).
    hang_sends: bool,
}

impl RecordingGateway {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Default::default()
        }
    }

    pub fn hanging_sends() -> Self {
        Self {
            hang_sends: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().iter().map(|(_, c)| c.clone()).collect()
    }

    pub fn timestamps(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().iter().map(|(t, _)| *t).collect()
    }

    async fn record(&self, call: Call) -> Result<(), RelayError> {
        self.calls.lock().unwrap().push((Instant::now(), call));
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.fail {
            return Err(RelayError::Transport("simulated failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Gateway for RecordingGateway {
    async fn approve_join(&self, chat_id: i64, user_id: i64) -> Result<(), RelayError> {
        self.record(Call::Approve { chat_id, user_id }).await
    }

    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<(), RelayError> {
        let result = self
            .record(Call::SendText {
                chat_id,
                text: text.to_string(),
                keyboard: keyboard.is_some(),
            })
            .await;
        if self.hang_sends {
            std::future::pending::<()>().await;
        }
        result
    }

    async fn copy_message(
        &self,
        to_chat_id: i64,
        from_chat_id: i64,
        message_id: i64,
    ) -> Result<(), RelayError> {
        self.record(Call::Copy {
            to: to_chat_id,
            from: from_chat_id,
            message_id,
        })
        .await
    }
}

/// A store that keeps users and channels in vectors.
#[derive(Default)]
pub struct MemoryStore {
    users: Mutex<Vec<UserRecord>>,
    channels: Mutex<Vec<ChannelRecord>>,
    count_calls: AtomicUsize,
    fail: bool,
    /// Upserts never complete.
    hang_writes: bool,
}

impl MemoryStore {
    pub fn with_users(ids: &[i64]) -> Self {
        let users = ids
            .iter()
            .map(|&user_id| UserRecord {
                user_id,
                username: String::new(),
                source_channel: None,
                first_seen: chrono::Utc::now(),
            })
            .collect();
        Self {
            users: Mutex::new(users),
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn hanging_writes() -> Self {
        Self {
            hang_writes: true,
            ..Default::default()
        }
    }

    pub fn user_ids(&self) -> Vec<i64> {
        self.users.lock().unwrap().iter().map(|u| u.user_id).collect()
    }

    pub fn users(&self) -> Vec<UserRecord> {
        self.users.lock().unwrap().clone()
    }

    pub fn channels(&self) -> Vec<ChannelRecord> {
        self.channels.lock().unwrap().clone()
    }

    pub fn count_calls(&self) -> usize {
        self.count_calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), RelayError> {
        if self.fail {
            return Err(RelayError::Store("simulated failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn upsert_user_if_absent(&self, user: &UserRecord) -> Result<(), RelayError> {
        if self.hang_writes {
            std::future::pending::<()>().await;
        }
        self.check()?;
        let mut users = self.users.lock().unwrap();
        if !users.iter().any(|u| u.user_id == user.user_id) {
            users.push(user.clone());
        }
        Ok(())
    }

    async fn upsert_channel_if_absent(&self, channel: &ChannelRecord) -> Result<(), RelayError> {
        if self.hang_writes {
            std::future::pending::<()>().await;
        }
        self.check()?;
        let mut channels = self.channels.lock().unwrap();
        if !channels.iter().any(|c| c.channel_id == channel.channel_id) {
            channels.push(channel.clone());
        }
        Ok(())
    }

    async fn list_user_ids(&self) -> Result<Vec<i64>, RelayError> {
        self.check()?;
        Ok(self.user_ids())
    }

    async fn count_users(&self) -> Result<u64, RelayError> {
        self.count_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(self.users.lock().unwrap().len() as u64)
    }
}

/// Let spawned tasks run until they block.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// Poll `condition` until it holds, giving up after about a second.
pub async fn wait_until<F: FnMut() -> bool>(mut condition: F) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    condition()
}
