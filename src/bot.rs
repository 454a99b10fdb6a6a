use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Local, Utc};
use tracing::{debug, info, warn};

use crate::broadcast::{BroadcastProgress, Broadcaster};
use crate::commands::Command;
use crate::error::RelayError;
use crate::gateway::Gateway;
use crate::models::{
    ChannelRecord, Event, EventKind, JoinRequest, Keyboard, TextMessage, UserRecord,
};
use crate::store::UserStore;
use crate::workers::EventHandler;

const JOIN_WELCOME_TEXT: &str = "Welcome! /start to know more.";
const START_TEXT: &str =
    "Add me as an admin to your channel/group and I will approve join requests instantly! ⚡️";
const START_BUTTON_TEXT: &str = "Add me to your Channel";

/// Identity and destinations the relay acts on behalf of.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub admin_id: i64,
    pub log_channel: Option<i64>,
    pub start_button_url: String,
}

/// Shared application state: everything a worker or fast-path task needs
/// to act on an event.
pub struct Relay {
    gateway: Arc<dyn Gateway>,
    store: Arc<dyn UserStore>,
    broadcaster: Arc<Broadcaster>,
    settings: RelaySettings,
}

impl Relay {
    pub fn new(
        gateway: Arc<dyn Gateway>,
        store: Arc<dyn UserStore>,
        broadcaster: Arc<Broadcaster>,
        settings: RelaySettings,
    ) -> Self {
        Self {
            gateway,
            store,
            broadcaster,
            settings,
        }
    }

    fn is_admin(&self, user_id: i64) -> bool {
        user_id == self.settings.admin_id
    }

    /// Approve a join request and kick off its side effects.
    ///
    /// Every step runs on its own task and nothing here is awaited, so the
    /// approval call is issued without waiting on the log notice, the store
    /// writes or the welcome message. Failures are logged and dropped.
    pub fn handle_join(&self, req: JoinRequest) {
        let gateway = Arc::clone(&self.gateway);
        let (chat_id, user_id) = (req.chat_id, req.user_id);
        tokio::spawn(async move {
            if let Err(e) = gateway.approve_join(chat_id, user_id).await {
                warn!(chat_id, user_id, "Approve failed: {}", e);
            }
        });

        if let Some(log_channel) = self.settings.log_channel {
            let text = approval_notice(&req);
            self.send_detached(log_channel, text);
        }

        let store = Arc::clone(&self.store);
        let user = UserRecord {
            user_id: req.user_id,
            username: req.username.clone(),
            source_channel: Some(req.chat_id),
            first_seen: Utc::now(),
        };
        tokio::spawn(async move {
            if let Err(e) = store.upsert_user_if_absent(&user).await {
                warn!(user_id = user.user_id, "Saving user failed: {}", e);
            }
        });

        let store = Arc::clone(&self.store);
        let channel = ChannelRecord {
            channel_id: req.chat_id,
            title: req.chat_title,
        };
        tokio::spawn(async move {
            if let Err(e) = store.upsert_channel_if_absent(&channel).await {
                warn!(chat_id = channel.channel_id, "Saving channel failed: {}", e);
            }
        });

        self.send_detached(req.user_id, JOIN_WELCOME_TEXT.to_string());
    }

    /// Interpret a text message as a command and run it.
    pub async fn handle_message(&self, msg: TextMessage) {
        let Some(command) = Command::parse(&msg) else {
            return;
        };

        if command.is_privileged() && !self.is_admin(msg.sender_id) {
            debug!("{}", RelayError::PermissionDenied(msg.sender_id));
            return;
        }

        info!(user_id = msg.sender_id, "Command {:?}", command);
        match command {
            Command::Start => self.start(&msg).await,
            Command::Stats => self.stats(&msg).await,
            Command::Broadcast(payload) => {
                if !self.broadcaster.start(payload) {
                    debug!("Broadcast already running, command ignored");
                }
            }
        }
    }

    async fn start(&self, msg: &TextMessage) {
        let keyboard = Keyboard::single_link(START_BUTTON_TEXT, &self.settings.start_button_url);
        if let Err(e) = self
            .gateway
            .send_text(msg.sender_id, START_TEXT, Some(&keyboard))
            .await
        {
            warn!(user_id = msg.sender_id, "Start reply failed: {}", e);
        }

        let store = Arc::clone(&self.store);
        let user = UserRecord {
            user_id: msg.sender_id,
            username: msg.username.clone(),
            source_channel: None,
            first_seen: Utc::now(),
        };
        tokio::spawn(async move {
            if let Err(e) = store.upsert_user_if_absent(&user).await {
                warn!(user_id = user.user_id, "Saving user failed: {}", e);
            }
        });
    }

    async fn stats(&self, msg: &TextMessage) {
        let total_users = match self.store.count_users().await {
            Ok(count) => count,
            Err(e) => {
                warn!("Counting users failed: {}", e);
                0
            }
        };
        let progress = self.broadcaster.state().snapshot();
        let text = stats_text(total_users, &progress);
        if let Err(e) = self.gateway.send_text(msg.sender_id, &text, None).await {
            warn!(user_id = msg.sender_id, "Stats reply failed: {}", e);
        }
    }

    /// Fire-and-forget text send.
    pub fn send_detached(&self, chat_id: i64, text: String) {
        let gateway = Arc::clone(&self.gateway);
        tokio::spawn(async move {
            if let Err(e) = gateway.send_text(chat_id, &text, None).await {
                warn!(chat_id, "Send failed: {}", e);
            }
        });
    }
}

#[async_trait]
impl EventHandler for Relay {
    async fn handle(&self, event: Event) {
        match event.kind {
            EventKind::JoinRequest(req) => self.handle_join(req),
            EventKind::TextMessage(msg) => self.handle_message(msg).await,
            EventKind::Other => debug!(update_id = event.seq, "Ignoring update"),
        }
    }
}

fn approval_notice(req: &JoinRequest) -> String {
    format!(
        "✅ <b>New Approval</b>\n\n\
         <b>User:</b> {} ({})\n\
         <b>Channel:</b> {} ({})\n\
         <b>Time:</b> {}",
        req.user_id,
        req.username,
        req.chat_title,
        req.chat_id,
        Local::now().format("%Y-%m-%d %H:%M:%S")
    )
}

fn stats_text(total_users: u64, progress: &BroadcastProgress) -> String {
    let status = match (progress.running, progress.started_at) {
        (true, Some(started)) => {
            let elapsed = progress.elapsed().map_or(0, |d| d.num_seconds().max(0));
            format!(
                "Running 🏃‍♂️\n<b>Progress:</b> {}/{}\n<b>Started:</b> {}\n<b>Elapsed:</b> {}s",
                progress.processed,
                progress.total,
                started.with_timezone(&Local).format("%H:%M:%S"),
                elapsed
            )
        }
        (true, None) => format!("Running 🏃‍♂️\n<b>Progress:</b> {}/{}", progress.processed, progress.total),
        (false, _) => "Idle".to_string(),
    };

    format!(
        "📊 <b>Bot Statistics</b>\n\n<b>Total Users:</b> {}\n<b>Broadcast Status:</b> {}",
        total_users, status
    )
}
