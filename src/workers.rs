//! Fixed-size worker pool draining the shared work queue.
//!
//! Workers run under a supervisor. When one panics, the supervisor logs the
//! fault and spawns a replacement on the same queue, so the pool keeps its
//! full size. Workers exit cleanly only once the queue is closed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::error::RelayError;
use crate::models::Event;

/// Processes one event to completion. Errors are the handler's to log.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle(&self, event: Event);
}

type SharedQueue = Arc<Mutex<mpsc::Receiver<Event>>>;

pub struct WorkerPool {
    size: usize,
    queue: SharedQueue,
    handler: Arc<dyn EventHandler>,
    restarts: Arc<AtomicU64>,
}

impl WorkerPool {
    pub fn new(size: usize, queue: mpsc::Receiver<Event>, handler: Arc<dyn EventHandler>) -> Self {
        Self {
            size,
            queue: Arc::new(Mutex::new(queue)),
            handler,
            restarts: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Counter of workers replaced after a fault.
    pub fn restarts(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.restarts)
    }

    /// Start the workers and their supervisor. The returned handle resolves
    /// once the queue has closed and every worker has drained out.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.supervise())
    }

    async fn supervise(self) {
        let mut workers = JoinSet::new();
        let mut next_id = 0usize;

        for _ in 0..self.size {
            self.spawn_worker(&mut workers, next_id);
            next_id += 1;
        }
        info!("Worker pool started with {} workers", self.size);

        while let Some(result) = workers.join_next().await {
            match result {
                Ok(id) => debug!(worker = id, "Worker exited, queue closed"),
                Err(e) if e.is_panic() => {
                    let fault = RelayError::WorkerFault(panic_message(e));
                    error!("{}; restarting worker", fault);
                    self.restarts.fetch_add(1, Ordering::Relaxed);
                    self.spawn_worker(&mut workers, next_id);
                    next_id += 1;
                }
                Err(e) => warn!("Worker cancelled: {}", e),
            }
        }

        info!("Worker pool stopped");
    }

    fn spawn_worker(&self, workers: &mut JoinSet<usize>, id: usize) {
        let queue = Arc::clone(&self.queue);
        let handler = Arc::clone(&self.handler);
        workers.spawn(worker_loop(id, queue, handler));
    }
}

async fn worker_loop(id: usize, queue: SharedQueue, handler: Arc<dyn EventHandler>) -> usize {
    loop {
        // The lock is only held while waiting for the next event.
        let next = queue.lock().await.recv().await;
        let Some(event) = next else {
            return id;
        };
        debug!(worker = id, update_id = event.seq, "Processing event");
        handler.handle(event).await;
    }
}

fn panic_message(err: JoinError) -> String {
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EventKind;
    use crate::testing::wait_until;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    /// Records handled sequence numbers; panics on the ones listed in `poison`.
    struct Recorder {
        handled: StdMutex<Vec<i64>>,
        poison: Vec<i64>,
        delay: Duration,
    }

    impl Recorder {
        fn new(poison: Vec<i64>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                handled: StdMutex::new(Vec::new()),
                poison,
                delay,
            })
        }

        fn handled(&self) -> Vec<i64> {
            self.handled.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle(&self, event: Event) {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.poison.contains(&event.seq) {
                panic!("poisoned event {}", event.seq);
            }
            self.handled.lock().unwrap().push(event.seq);
        }
    }

    fn event(seq: i64) -> Event {
        Event {
            seq,
            kind: EventKind::Other,
        }
    }

    #[tokio::test]
    async fn test_every_event_is_processed_once() {
        let (tx, rx) = mpsc::channel(100);
        let recorder = Recorder::new(vec![], Duration::ZERO);
        let pool = WorkerPool::new(4, rx, recorder.clone()).spawn();

        for seq in 0..50 {
            tx.send(event(seq)).await.unwrap();
        }
        drop(tx);
        pool.await.unwrap();

        let mut handled = recorder.handled();
        handled.sort();
        assert_eq!(handled, (0..50).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_panicking_worker_is_replaced() {
        let (tx, rx) = mpsc::channel(100);
        let recorder = Recorder::new(vec![1, 3], Duration::ZERO);
        let pool = WorkerPool::new(1, rx, recorder.clone());
        let restarts = pool.restarts();
        let supervisor = pool.spawn();

        for seq in 0..6 {
            tx.send(event(seq)).await.unwrap();
        }

        assert!(wait_until(|| recorder.handled().len() == 4).await);
        assert_eq!(recorder.handled(), vec![0, 2, 4, 5]);
        assert_eq!(restarts.load(Ordering::Relaxed), 2);

        // Still alive after the faults.
        tx.send(event(6)).await.unwrap();
        assert!(wait_until(|| recorder.handled().contains(&6)).await);

        drop(tx);
        supervisor.await.unwrap();
    }

    #[tokio::test]
    async fn test_workers_run_concurrently() {
        let (tx, rx) = mpsc::channel(100);
        let recorder = Recorder::new(vec![], Duration::from_millis(200));
        let pool = WorkerPool::new(5, rx, recorder.clone()).spawn();

        let started = std::time::Instant::now();
        for seq in 0..5 {
            tx.send(event(seq)).await.unwrap();
        }
        drop(tx);
        pool.await.unwrap();

        assert_eq!(recorder.handled().len(), 5);
        assert!(started.elapsed() < Duration::from_millis(900));
    }
}
