use crate::broadcast::BroadcastPayload;
use crate::models::TextMessage;

/// A recognised bot command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start,
    Stats,
    Broadcast(BroadcastPayload),
}

impl Command {
    /// Parse a text message. Anything unrecognised is `None`.
    pub fn parse(msg: &TextMessage) -> Option<Self> {
        let text = msg.text.as_str();

        if text == "/start" || text.starts_with("/start ") {
            return Some(Command::Start);
        }

        if text == "/stats" {
            return Some(Command::Stats);
        }

        if text == "/broadcast" {
            return msg
                .reply_to
                .map(|source| Command::Broadcast(BroadcastPayload::Copy(source)));
        }

        if let Some(body) = text.strip_prefix("/broadcast ") {
            if body.trim().is_empty() {
                return None;
            }
            return Some(Command::Broadcast(BroadcastPayload::Text(body.to_string())));
        }

        None
    }

    /// Privileged commands are only honoured for the admin.
    pub fn is_privileged(&self) -> bool {
        !matches!(self, Command::Start)
    }
}
