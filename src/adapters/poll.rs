use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::dispatcher::Dispatcher;
use crate::error::RelayError;
use crate::models::{Event, Update};

/// One long-poll round-trip: every raw update after `offset`.
#[async_trait]
pub trait UpdateFetcher: Send + Sync {
    async fn fetch(&self, offset: i64, timeout_secs: u32) -> Result<Vec<Value>, RelayError>;
}

#[derive(Debug, Deserialize)]
struct Envelope {
    ok: bool,
    #[serde(default)]
    result: Vec<Value>,
    #[serde(default)]
    description: Option<String>,
}

/// getUpdates over plain HTTP.
pub struct HttpFetcher {
    client: reqwest::Client,
    url: String,
}

impl HttpFetcher {
    /// `request_timeout` must exceed the long-poll timeout or every idle
    /// poll ends as a transport error.
    pub fn new(api_url: &str, token: &str, request_timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .pool_max_idle_per_host(4)
            .build()?;
        Ok(Self {
            client,
            url: format!("{}/bot{}/getUpdates", api_url.trim_end_matches('/'), token),
        })
    }
}

#[async_trait]
impl UpdateFetcher for HttpFetcher {
    async fn fetch(&self, offset: i64, timeout_secs: u32) -> Result<Vec<Value>, RelayError> {
        let response = self
            .client
            .get(&self.url)
            .query(&[("offset", offset.to_string()), ("timeout", timeout_secs.to_string())])
            .send()
            .await?;
        let body = response.bytes().await?;

        let envelope: Envelope = serde_json::from_slice(&body)?;
        if !envelope.ok {
            return Err(RelayError::Transport(format!(
                "getUpdates rejected: {}",
                envelope.description.unwrap_or_default()
            )));
        }
        Ok(envelope.result)
    }
}

/// Delays applied before retrying a failed fetch.
#[derive(Debug, Clone)]
pub struct Backoff {
    pub transport: Duration,
    pub decode: Duration,
}

impl Backoff {
    fn delay_for(&self, err: &RelayError) -> Duration {
        match err {
            RelayError::Decode(_) => self.decode,
            _ => self.transport,
        }
    }
}

/// Long-poll source with a replay cursor.
///
/// The cursor only moves after a batch envelope has been decoded, to one past
/// the highest update id in it. Fetch failures never end the loop.
pub struct PollAdapter<F> {
    fetcher: F,
    cursor: i64,
    timeout_secs: u32,
    backoff: Backoff,
}

impl<F: UpdateFetcher> PollAdapter<F> {
    pub fn new(fetcher: F, timeout_secs: u32, backoff: Backoff) -> Self {
        Self {
            fetcher,
            cursor: 0,
            timeout_secs,
            backoff,
        }
    }

    #[cfg(test)]
    pub fn cursor(&self) -> i64 {
        self.cursor
    }

    /// Fetch until a batch decodes, then return its events in update-id order.
    /// An empty vec means the long-poll timed out with nothing new.
    pub async fn next_batch(&mut self) -> Vec<Event> {
        loop {
            match self.fetcher.fetch(self.cursor, self.timeout_secs).await {
                Ok(raw) => return self.accept(raw),
                Err(e) => {
                    let delay = self.backoff.delay_for(&e);
                    warn!(offset = self.cursor, "Polling failed, retrying in {:?}: {}", delay, e);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    fn accept(&mut self, raw: Vec<Value>) -> Vec<Event> {
        let mut events = Vec::with_capacity(raw.len());
        let mut max_seen: Option<i64> = None;

        for value in raw {
            let id = value.get("update_id").and_then(Value::as_i64);
            if let Some(id) = id {
                max_seen = Some(max_seen.map_or(id, |m| m.max(id)));
            }
            match serde_json::from_value::<Update>(value) {
                Ok(update) if update.update_id < self.cursor => {
                    debug!(update_id = update.update_id, "Skipping already seen update");
                }
                Ok(update) => events.push(Event::from(update)),
                Err(e) => warn!(update_id = ?id, "Skipping undecodable update: {}", e),
            }
        }

        events.sort_by_key(|e| e.seq);
        if let Some(max) = max_seen {
            self.cursor = self.cursor.max(max + 1);
        }
        events
    }

    /// Feed the dispatcher forever. Waits for queue space rather than dropping.
    pub async fn run(mut self, dispatcher: Dispatcher) {
        info!("Polling for updates (timeout {}s)", self.timeout_secs);
        loop {
            for event in self.next_batch().await {
                dispatcher.dispatch_wait(event).await;
            }
        }
    }
}
