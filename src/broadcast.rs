//! Rate-limited mass delivery to every stored user.
//!
//! A broadcast moves through `Idle → Running → Idle`. The transition into
//! `Running` is a compare-and-swap on [`BroadcastState`], so a second
//! `/broadcast` arriving while one is in flight is rejected rather than run
//! alongside it. The transition back is tied to the lifetime of a
//! [`RunGuard`], which also covers an early return or a panic in the loop.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::RelayError;
use crate::gateway::Gateway;
use crate::models::MessageRef;
use crate::store::UserStore;

/// What each recipient receives.
#[derive(Debug, Clone, PartialEq)]
pub enum BroadcastPayload {
    Text(String),
    Copy(MessageRef),
}

/// Process-wide broadcast status. Written only by the active loop.
#[derive(Debug, Default)]
pub struct BroadcastState {
    running: AtomicBool,
    total: AtomicUsize,
    processed: AtomicUsize,
    /// Unix millis; 0 when no broadcast has started yet.
    started_at_ms: AtomicI64,
}

/// A point-in-time read of [`BroadcastState`].
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastProgress {
    pub running: bool,
    pub total: usize,
    pub processed: usize,
    pub started_at: Option<DateTime<Utc>>,
}

impl BroadcastProgress {
    pub fn elapsed(&self) -> Option<chrono::Duration> {
        self.started_at.map(|start| Utc::now() - start)
    }
}

impl BroadcastState {
    /// Claim the running slot. `None` if a broadcast is already running.
    pub fn try_start(self: &Arc<Self>) -> Option<RunGuard> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        self.total.store(0, Ordering::Release);
        self.processed.store(0, Ordering::Release);
        self.started_at_ms
            .store(Utc::now().timestamp_millis(), Ordering::Release);
        Some(RunGuard {
            state: Arc::clone(self),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> BroadcastProgress {
        let started_at_ms = self.started_at_ms.load(Ordering::Acquire);
        BroadcastProgress {
            running: self.running.load(Ordering::Acquire),
            total: self.total.load(Ordering::Acquire),
            processed: self.processed.load(Ordering::Acquire),
            started_at: (started_at_ms != 0)
                .then(|| DateTime::from_timestamp_millis(started_at_ms))
                .flatten(),
        }
    }
}

/// Exclusive handle on a running broadcast. Dropping it returns the state to idle.
pub struct RunGuard {
    state: Arc<BroadcastState>,
}

impl RunGuard {
    fn set_total(&self, total: usize) {
        self.state.total.store(total, Ordering::Release);
    }

    fn advance(&self) {
        self.state.processed.fetch_add(1, Ordering::AcqRel);
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.state.running.store(false, Ordering::Release);
    }
}

/// Fixed-interval pacing clock. Each `wait` returns no sooner than one
/// period after the previous one returned; the first waits a full period.
struct Pacer {
    period: Duration,
    next: Instant,
}

impl Pacer {
    fn new(period: Duration) -> Self {
        Self {
            period,
            next: Instant::now() + period,
        }
    }

    async fn wait(&mut self) {
        tokio::time::sleep_until(self.next).await;
        self.next = Instant::now() + self.period;
    }
}

pub struct Broadcaster {
    gateway: Arc<dyn Gateway>,
    store: Arc<dyn UserStore>,
    state: Arc<BroadcastState>,
    interval: Duration,
}

impl Broadcaster {
    pub fn new(
        gateway: Arc<dyn Gateway>,
        store: Arc<dyn UserStore>,
        state: Arc<BroadcastState>,
        interval: Duration,
    ) -> Self {
        Self {
            gateway,
            store,
            state,
            interval,
        }
    }

    pub fn state(&self) -> &Arc<BroadcastState> {
        &self.state
    }

    /// Claim the running slot and deliver in the background.
    /// Returns `false` when another broadcast is already running.
    pub fn start(self: &Arc<Self>, payload: BroadcastPayload) -> bool {
        let Some(guard) = self.state.try_start() else {
            info!("Broadcast rejected: another broadcast is running");
            return false;
        };
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run(guard, payload).await;
        });
        true
    }

    /// Run a broadcast to completion on the current task.
    /// Returns the number of recipients handled, or `None` if rejected.
    #[cfg(test)]
    pub async fn broadcast(&self, payload: BroadcastPayload) -> Option<usize> {
        let guard = self.state.try_start()?;
        Some(self.run(guard, payload).await)
    }

    async fn run(&self, guard: RunGuard, payload: BroadcastPayload) -> usize {
        let recipients = match self.store.list_user_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                warn!("Broadcast aborted, could not list users: {}", e);
                return 0;
            }
        };

        guard.set_total(recipients.len());
        info!(total = recipients.len(), "Broadcast started");

        let mut pacer = Pacer::new(self.interval);
        let mut failed = 0usize;
        for &user_id in &recipients {
            pacer.wait().await;
            if let Err(e) = self.deliver(user_id, &payload).await {
                failed += 1;
                debug!(user_id, "Broadcast delivery failed: {}", e);
            }
            guard.advance();
        }

        info!(
            total = recipients.len(),
            failed, "Broadcast finished"
        );
        recipients.len()
    }

    async fn deliver(&self, user_id: i64, payload: &BroadcastPayload) -> Result<(), RelayError> {
        match payload {
            BroadcastPayload::Text(text) => self.gateway.send_text(user_id, text, None).await,
            BroadcastPayload::Copy(source) => {
                self.gateway
                    .copy_message(user_id, source.chat_id, source.message_id)
                    .await
            }
        }
    }
}
