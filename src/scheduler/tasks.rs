use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::info;

use crate::broadcast::{BroadcastProgress, BroadcastState};
use crate::dispatcher::Dispatcher;
use crate::scheduler::Scheduler;

/// Read-only handles the heartbeat reports on.
#[derive(Clone)]
pub struct PipelineHealth {
    pub dispatcher: Dispatcher,
    pub broadcast: Arc<BroadcastState>,
    pub worker_restarts: Arc<AtomicU64>,
}

impl PipelineHealth {
    pub fn summary(&self) -> String {
        summary_line(
            self.dispatcher.queue_depth(),
            self.dispatcher.dropped(),
            self.worker_restarts.load(Ordering::Relaxed),
            &self.broadcast.snapshot(),
        )
    }
}

fn summary_line(depth: usize, dropped: u64, restarts: u64, progress: &BroadcastProgress) -> String {
    let broadcast = if progress.running {
        format!("running {}/{}", progress.processed, progress.total)
    } else {
        "idle".to_string()
    };
    format!(
        "queue depth {}, dropped {}, worker restarts {}, broadcast {}",
        depth, dropped, restarts, broadcast
    )
}

/// Hourly heartbeat. Overload drops otherwise only show up as individual warnings.
pub async fn register_builtin_tasks(scheduler: &Scheduler, health: PipelineHealth) -> anyhow::Result<()> {
    scheduler
        .every("0 0 * * * *", "heartbeat", move || {
            let health = health.clone();
            Box::pin(async move {
                info!("Heartbeat: {}", health.summary());
            })
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Event, EventKind};
    use crate::workers::EventHandler;
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    struct Noop;

    #[async_trait]
    impl EventHandler for Noop {
        async fn handle(&self, _event: Event) {}
    }

    #[test]
    fn test_summary_idle() {
        let progress = BroadcastProgress {
            running: false,
            total: 5,
            processed: 5,
            started_at: None,
        };
        assert_eq!(
            summary_line(3, 1, 0, &progress),
            "queue depth 3, dropped 1, worker restarts 0, broadcast idle"
        );
    }

    #[tokio::test]
    async fn test_summary_reflects_pipeline() {
        let (tx, _rx) = mpsc::channel(1);
        let dispatcher = Dispatcher::new(tx, Arc::new(Noop));
        for seq in 0..3 {
            dispatcher.dispatch(Event {
                seq,
                kind: EventKind::Other,
            });
        }

        let broadcast = Arc::new(BroadcastState::default());
        let _guard = broadcast.try_start().unwrap();

        let health = PipelineHealth {
            dispatcher,
            broadcast,
            worker_restarts: Arc::new(AtomicU64::new(2)),
        };
        assert_eq!(
            health.summary(),
            "queue depth 1, dropped 2, worker restarts 2, broadcast running 0/0"
        );
    }
}
