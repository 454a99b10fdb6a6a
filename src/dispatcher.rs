use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::error::RelayError;
use crate::models::Event;
use crate::workers::EventHandler;

/// Where a dispatched event ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    FastPath,
    Queued,
    /// The queue was full or closed; the event is gone.
    Dropped,
}

/// Routes events: join requests go straight to a freshly spawned task,
/// everything else onto the bounded work queue.
#[derive(Clone)]
pub struct Dispatcher {
    queue: mpsc::Sender<Event>,
    fast_path: Arc<dyn EventHandler>,
    dropped: Arc<AtomicU64>,
}

impl Dispatcher {
    pub fn new(queue: mpsc::Sender<Event>, fast_path: Arc<dyn EventHandler>) -> Self {
        Self {
            queue,
            fast_path,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Route without ever waiting. A full queue drops the event.
    pub fn dispatch(&self, event: Event) -> Routed {
        let Some(event) = self.take_fast_path(event) else {
            return Routed::FastPath;
        };
        match self.queue.try_send(event) {
            Ok(()) => Routed::Queued,
            Err(TrySendError::Full(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("{}", RelayError::Overload(event.seq));
                Routed::Dropped
            }
            Err(TrySendError::Closed(event)) => {
                warn!(update_id = event.seq, "Work queue closed, event discarded");
                Routed::Dropped
            }
        }
    }

    /// Route, waiting for queue space if the workers are saturated.
    pub async fn dispatch_wait(&self, event: Event) {
        let Some(event) = self.take_fast_path(event) else {
            return;
        };
        if let Err(e) = self.queue.send(event).await {
            warn!(update_id = e.0.seq, "Work queue closed, event discarded");
        }
    }

    fn take_fast_path(&self, event: Event) -> Option<Event> {
        if !event.is_join_request() {
            return Some(event);
        }
        debug!(update_id = event.seq, "Join request on fast path");
        let handler = Arc::clone(&self.fast_path);
        tokio::spawn(async move {
            handler.handle(event).await;
        });
        None
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Events currently waiting for a worker.
    pub fn queue_depth(&self) -> usize {
        self.queue.max_capacity() - self.queue.capacity()
    }
}
