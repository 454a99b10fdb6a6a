use async_trait::async_trait;
use std::time::Duration;
use teloxide::payloads::SendMessageSetters;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, MessageId, ParseMode};
use tracing::debug;

use crate::error::RelayError;
use crate::models::Keyboard;

/// The three outbound calls the relay makes. Each is one network round-trip.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn approve_join(&self, chat_id: i64, user_id: i64) -> Result<(), RelayError>;

    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<(), RelayError>;

    async fn copy_message(
        &self,
        to_chat_id: i64,
        from_chat_id: i64,
        message_id: i64,
    ) -> Result<(), RelayError>;
}

/// Gateway backed by the Telegram Bot API.
///
/// A single pooled HTTP client is shared by every call, so concurrent
/// fast-path tasks and the broadcast loop reuse connections.
#[derive(Clone)]
pub struct TelegramGateway {
    bot: Bot,
}

impl TelegramGateway {
    pub fn new(token: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = teloxide::net::default_reqwest_settings()
            .timeout(timeout)
            .pool_max_idle_per_host(100)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;
        Ok(Self {
            bot: Bot::with_client(token, client),
        })
    }

    /// Drop any registered webhook so getUpdates is accepted.
    pub async fn delete_webhook(&self) -> Result<(), RelayError> {
        self.bot.delete_webhook().await?;
        Ok(())
    }
}

fn to_markup(keyboard: &Keyboard) -> Result<InlineKeyboardMarkup, RelayError> {
    let mut rows = Vec::with_capacity(keyboard.rows.len());
    for row in &keyboard.rows {
        let mut buttons = Vec::with_capacity(row.len());
        for button in row {
            let url = reqwest::Url::parse(&button.url)
                .map_err(|e| RelayError::Transport(format!("invalid button url: {}", e)))?;
            buttons.push(InlineKeyboardButton::url(button.text.clone(), url));
        }
        rows.push(buttons);
    }
    Ok(InlineKeyboardMarkup::new(rows))
}

fn message_id(id: i64) -> Result<MessageId, RelayError> {
    i32::try_from(id)
        .map(MessageId)
        .map_err(|_| RelayError::Transport(format!("message id {} out of range", id)))
}

#[async_trait]
impl Gateway for TelegramGateway {
    async fn approve_join(&self, chat_id: i64, user_id: i64) -> Result<(), RelayError> {
        self.bot
            .approve_chat_join_request(ChatId(chat_id), UserId(user_id as u64))
            .await?;
        debug!(chat_id, user_id, "Join request approved");
        Ok(())
    }

    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<(), RelayError> {
        let request = self
            .bot
            .send_message(ChatId(chat_id), text)
            .parse_mode(ParseMode::Html);

        match keyboard.filter(|k| !k.rows.is_empty()) {
            Some(k) => request.reply_markup(to_markup(k)?).await?,
            None => request.await?,
        };
        Ok(())
    }

    async fn copy_message(
        &self,
        to_chat_id: i64,
        from_chat_id: i64,
        message_id_raw: i64,
    ) -> Result<(), RelayError> {
        self.bot
            .copy_message(
                ChatId(to_chat_id),
                ChatId(from_chat_id),
                message_id(message_id_raw)?,
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyboard_converts_to_markup() {
        let keyboard = Keyboard::single_link("Add me", "https://t.me/example?startchannel=true");
        let markup = to_markup(&keyboard).unwrap();
        assert_eq!(markup.inline_keyboard.len(), 1);
        assert_eq!(markup.inline_keyboard[0].len(), 1);
        assert_eq!(markup.inline_keyboard[0][0].text, "Add me");
    }

    #[test]
    fn test_invalid_button_url_is_rejected() {
        let keyboard = Keyboard::single_link("Broken", "not a url");
        assert!(matches!(to_markup(&keyboard), Err(RelayError::Transport(_))));
    }

    #[test]
    fn test_message_id_range() {
        assert_eq!(message_id(55).unwrap(), MessageId(55));
        assert!(message_id(i64::MAX).is_err());
    }
}
