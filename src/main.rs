mod adapters;
mod bot;
mod broadcast;
mod commands;
mod config;
mod dispatcher;
mod error;
mod gateway;
mod models;
mod scheduler;
mod store;
#[cfg(test)]
mod testing;
mod workers;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::adapters::poll::{Backoff, HttpFetcher, PollAdapter};
use crate::adapters::push::{self, PushAdapter};
use crate::bot::{Relay, RelaySettings};
use crate::broadcast::{BroadcastState, Broadcaster};
use crate::config::{Config, Mode};
use crate::dispatcher::Dispatcher;
use crate::gateway::{Gateway, TelegramGateway};
use crate::scheduler::tasks::{register_builtin_tasks, PipelineHealth};
use crate::scheduler::Scheduler;
use crate::store::{SqliteStore, UserStore};
use crate::workers::WorkerPool;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,joinrelay=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Mode: {}", config.server.mode);
    info!("  Admin: {}", config.telegram.admin_id);
    info!("  Log channel: {:?}", config.telegram.log_channel());
    info!("  Workers: {}", config.pipeline.workers);

    // The store is the one collaborator whose absence is fatal.
    let store: Arc<dyn UserStore> = Arc::new(SqliteStore::open(&config.storage.database_path)?);

    let telegram = TelegramGateway::new(
        &config.telegram.bot_token,
        config.pipeline.request_timeout(),
    )?;
    let gateway: Arc<dyn Gateway> = Arc::new(telegram.clone());

    let broadcast_state = Arc::new(BroadcastState::default());
    let broadcaster = Arc::new(Broadcaster::new(
        gateway.clone(),
        store.clone(),
        broadcast_state.clone(),
        config.pipeline.broadcast_interval(),
    ));

    let relay = Arc::new(Relay::new(
        gateway.clone(),
        store.clone(),
        broadcaster,
        RelaySettings {
            admin_id: config.telegram.admin_id,
            log_channel: config.telegram.log_channel(),
            start_button_url: config.telegram.start_button_url.clone(),
        },
    ));

    // Work queue and its consumers
    let (queue_tx, queue_rx) = mpsc::channel(config.pipeline.queue_capacity);
    let dispatcher = Dispatcher::new(queue_tx, relay.clone());
    let pool = WorkerPool::new(config.pipeline.workers, queue_rx, relay.clone());
    let worker_restarts = pool.restarts();
    let _pool = pool.spawn();

    let mut scheduler = Scheduler::new().await?;
    register_builtin_tasks(
        &scheduler,
        PipelineHealth {
            dispatcher: dispatcher.clone(),
            broadcast: broadcast_state,
            worker_restarts,
        },
    )
    .await?;
    scheduler.start().await?;

    relay.send_detached(config.telegram.admin_id, "🤖 <b>Bot Started</b>".to_string());

    let app = match config.server.mode {
        Mode::Webhook => {
            let path = config.server.webhook_path(&config.telegram.bot_token);
            let adapter = Arc::new(PushAdapter::new(dispatcher));
            info!("Webhook active on port {}", config.server.port);
            push::router(Some((&path, adapter)))
        }
        Mode::Polling => {
            if let Err(e) = telegram.delete_webhook().await {
                warn!("Failed to delete webhook: {}", e);
            }
            let fetcher = HttpFetcher::new(
                &config.telegram.api_url,
                &config.telegram.bot_token,
                config.pipeline.request_timeout(),
            )?;
            let poller = PollAdapter::new(
                fetcher,
                config.pipeline.poll_timeout_secs,
                Backoff {
                    transport: std::time::Duration::from_secs(config.pipeline.poll_retry_delay_secs),
                    decode: std::time::Duration::from_secs(
                        config.pipeline.poll_decode_retry_delay_secs,
                    ),
                },
            );
            tokio::spawn(poller.run(dispatcher));
            info!("Polling mode active. Health check on port {}", config.server.port);
            push::router(None)
        }
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    scheduler.shutdown().await?;
    info!("Shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
