use serde::{Deserialize, Serialize};

use crate::error::RelayError;

// ── Telegram wire types ────────────────────────────────────────────────────────
//
// Only the fields the relay reads are modelled; everything else in the
// payload is ignored by serde.

/// A single update as delivered by getUpdates or a webhook call.
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub chat_join_request: Option<ChatJoinRequest>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    #[serde(default)]
    pub from: Option<TgUser>,
    #[serde(default)]
    pub chat: Option<TgChat>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub reply_to_message: Option<Box<Message>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatJoinRequest {
    pub chat: TgChat,
    pub from: TgUser,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TgUser {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TgChat {
    pub id: i64,
    #[serde(default)]
    pub title: Option<String>,
}

/// Inline keyboard attached to an outbound text message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Keyboard {
    pub rows: Vec<Vec<LinkButton>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkButton {
    pub text: String,
    pub url: String,
}

impl Keyboard {
    /// A keyboard with a single URL button.
    pub fn single_link(text: &str, url: &str) -> Self {
        Self {
            rows: vec![vec![LinkButton {
                text: text.to_string(),
                url: url.to_string(),
            }]],
        }
    }
}

// ── Pipeline events ────────────────────────────────────────────────────────────

/// An update after classification. `seq` is the platform update id and is
/// what the poll adapter uses as its replay cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub seq: i64,
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    JoinRequest(JoinRequest),
    TextMessage(TextMessage),
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinRequest {
    pub user_id: i64,
    pub username: String,
    pub chat_id: i64,
    pub chat_title: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextMessage {
    pub message_id: i64,
    pub chat_id: i64,
    pub sender_id: i64,
    pub username: String,
    pub text: String,
    pub reply_to: Option<MessageRef>,
}

/// Location of a previously sent message, used by copy broadcasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageRef {
    pub chat_id: i64,
    pub message_id: i64,
}

impl Event {
    pub fn is_join_request(&self) -> bool {
        matches!(self.kind, EventKind::JoinRequest(_))
    }
}

impl From<Update> for Event {
    fn from(update: Update) -> Self {
        let kind = if let Some(req) = update.chat_join_request {
            EventKind::JoinRequest(JoinRequest {
                user_id: req.from.id,
                username: req.from.username.unwrap_or_default(),
                chat_id: req.chat.id,
                chat_title: req.chat.title.unwrap_or_default(),
            })
        } else if let Some(msg) = update.message {
            text_message(msg).map_or(EventKind::Other, EventKind::TextMessage)
        } else {
            EventKind::Other
        };

        Event {
            seq: update.update_id,
            kind,
        }
    }
}

fn text_message(msg: Message) -> Option<TextMessage> {
    let from = msg.from?;
    let text = msg.text?;
    // Private chats share the sender's id, which is what older payloads without
    // a chat object imply.
    let chat_id = msg.chat.as_ref().map_or(from.id, |c| c.id);
    let reply_to = msg.reply_to_message.map(|reply| MessageRef {
        chat_id: reply.chat.as_ref().map_or(chat_id, |c| c.id),
        message_id: reply.message_id,
    });

    Some(TextMessage {
        message_id: msg.message_id,
        chat_id,
        sender_id: from.id,
        username: from.username.unwrap_or_default(),
        text,
        reply_to,
    })
}

/// Decode one raw update payload into an event.
pub fn decode_event(payload: &[u8]) -> Result<Event, RelayError> {
    let update: Update = serde_json::from_slice(payload)?;
    Ok(update.into())
}

// ── Store records ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct UserRecord {
    pub user_id: i64,
    pub username: String,
    pub source_channel: Option<i64>,
    pub first_seen: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelRecord {
    pub channel_id: i64,
    pub title: String,
}
