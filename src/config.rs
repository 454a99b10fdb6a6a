use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Slowest the platform lets a bot send to distinct users without throttling.
pub const MIN_BROADCAST_INTERVAL_MS: u64 = 40;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Polling,
    Webhook,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Polling => write!(f, "polling"),
            Mode::Webhook => write!(f, "webhook"),
        }
    }
}

impl std::str::FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "polling" | "poll" => Ok(Mode::Polling),
            "webhook" | "push" => Ok(Mode::Webhook),
            other => anyhow::bail!("Unknown mode '{}', expected polling or webhook", other),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub admin_id: i64,
    /// Chat that receives a notice per approved join. 0 disables it.
    #[serde(default)]
    pub log_channel_id: i64,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_start_button_url")]
    pub start_button_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default)]
    pub mode: Mode,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Last path segment of the webhook route. Defaults to the bot token.
    #[serde(default)]
    pub webhook_secret: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub database_path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u32,
    #[serde(default = "default_poll_retry_delay_secs")]
    pub poll_retry_delay_secs: u64,
    #[serde(default = "default_poll_decode_retry_delay_secs")]
    pub poll_decode_retry_delay_secs: u64,
    #[serde(default = "default_broadcast_interval_ms")]
    pub broadcast_interval_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_api_url() -> String {
    "https://api.telegram.org".to_string()
}

fn default_start_button_url() -> String {
    "https://t.me/AcceptAutoReqBot?startchannel=true".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_db_path() -> PathBuf {
    PathBuf::from("joinrelay.db")
}

fn default_workers() -> usize {
    30
}

fn default_queue_capacity() -> usize {
    1000
}

fn default_poll_timeout_secs() -> u32 {
    30
}

fn default_poll_retry_delay_secs() -> u64 {
    5
}

fn default_poll_decode_retry_delay_secs() -> u64 {
    2
}

fn default_broadcast_interval_ms() -> u64 {
    MIN_BROADCAST_INTERVAL_MS
}

fn default_request_timeout_secs() -> u64 {
    40
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            admin_id: 0,
            log_channel_id: 0,
            api_url: default_api_url(),
            start_button_url: default_start_button_url(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            port: default_port(),
            webhook_secret: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_db_path(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            poll_timeout_secs: default_poll_timeout_secs(),
            poll_retry_delay_secs: default_poll_retry_delay_secs(),
            poll_decode_retry_delay_secs: default_poll_decode_retry_delay_secs(),
            broadcast_interval_ms: default_broadcast_interval_ms(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl TelegramConfig {
    pub fn log_channel(&self) -> Option<i64> {
        (self.log_channel_id != 0).then_some(self.log_channel_id)
    }
}

impl ServerConfig {
    /// Route the webhook is served on.
    pub fn webhook_path(&self, bot_token: &str) -> String {
        let secret = self.webhook_secret.as_deref().unwrap_or(bot_token);
        format!("/webhook/{}", secret)
    }
}

impl PipelineConfig {
    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_millis(self.broadcast_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Config {
    /// Load from a TOML file (if present), then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Config::default()
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Override file values with whatever `lookup` returns for the known keys.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(token) = get("BOT_TOKEN") {
            self.telegram.bot_token = token;
        }
        if let Some(admin) = get("ADMIN_ID") {
            self.telegram.admin_id = admin
                .trim()
                .parse()
                .with_context(|| format!("Invalid ADMIN_ID: {}", admin))?;
        }
        if let Some(channel) = get("LOG_CHANNEL_ID") {
            self.telegram.log_channel_id = channel
                .trim()
                .parse()
                .with_context(|| format!("Invalid LOG_CHANNEL_ID: {}", channel))?;
        }
        if let Some(path) = get("DATABASE_PATH") {
            self.storage.database_path = PathBuf::from(path);
        }
        if let Some(mode) = get("MODE") {
            self.server.mode = mode.parse()?;
        }
        if let Some(port) = get("PORT") {
            self.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("Invalid PORT: {}", port))?;
        }
        if let Some(secret) = get("WEBHOOK_SECRET") {
            self.server.webhook_secret = Some(secret);
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.telegram.bot_token.trim().is_empty() {
            anyhow::bail!("bot_token is required (set [telegram] bot_token or BOT_TOKEN)");
        }
        if self.pipeline.workers == 0 {
            anyhow::bail!("[pipeline] workers must be at least 1");
        }
        if self.pipeline.queue_capacity == 0 {
            anyhow::bail!("[pipeline] queue_capacity must be at least 1");
        }
        if self.pipeline.broadcast_interval_ms < MIN_BROADCAST_INTERVAL_MS {
            tracing::warn!(
                "broadcast_interval_ms {} is below the platform limit, using {}",
                self.pipeline.broadcast_interval_ms,
                MIN_BROADCAST_INTERVAL_MS
            );
            self.pipeline.broadcast_interval_ms = MIN_BROADCAST_INTERVAL_MS;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn parse(toml_str: &str) -> Config {
        toml::from_str(toml_str).unwrap()
    }

    #[test]
    fn test_defaults_when_sections_missing() {
        let config = parse("[telegram]\nbot_token = \"abc\"\n");
        assert_eq!(config.server.mode, Mode::Polling);
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.pipeline.workers, 30);
        assert_eq!(config.pipeline.queue_capacity, 1000);
        assert_eq!(config.pipeline.broadcast_interval(), Duration::from_millis(40));
        assert_eq!(config.telegram.log_channel(), None);
    }

    #[test]
    fn test_full_file() {
        let config = parse(
            r#"
            [telegram]
            bot_token = "123:abc"
            admin_id = 99
            log_channel_id = -1001

            [server]
            mode = "webhook"
            port = 9000
            webhook_secret = "s3cret"

            [storage]
            database_path = "/data/relay.db"

            [pipeline]
            workers = 4
            queue_capacity = 10
            "#,
        );
        assert_eq!(config.telegram.admin_id, 99);
        assert_eq!(config.telegram.log_channel(), Some(-1001));
        assert_eq!(config.server.mode, Mode::Webhook);
        assert_eq!(config.server.webhook_path("123:abc"), "/webhook/s3cret");
        assert_eq!(config.storage.database_path, PathBuf::from("/data/relay.db"));
        assert_eq!(config.pipeline.workers, 4);
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = parse("[telegram]\nbot_token = \"file\"\nadmin_id = 1\n");
        let env: HashMap<&str, &str> = [
            ("BOT_TOKEN", "env-token"),
            ("ADMIN_ID", "42"),
            ("LOG_CHANNEL_ID", "-500"),
            ("MODE", "webhook"),
            ("PORT", "3000"),
            ("DATABASE_PATH", "env.db"),
        ]
        .into_iter()
        .collect();

        config
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.telegram.bot_token, "env-token");
        assert_eq!(config.telegram.admin_id, 42);
        assert_eq!(config.telegram.log_channel(), Some(-500));
        assert_eq!(config.server.mode, Mode::Webhook);
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.webhook_path("env-token"), "/webhook/env-token");
        assert_eq!(config.storage.database_path, PathBuf::from("env.db"));
    }

    #[test]
    fn test_invalid_env_value_is_an_error() {
        let mut config = Config::default();
        let result = config.apply_env(|k| (k == "ADMIN_ID").then(|| "not-a-number".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_missing_token() {
        let mut config = Config::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_clamps_broadcast_interval() {
        let mut config = parse(
            "[telegram]\nbot_token = \"t\"\n[pipeline]\nbroadcast_interval_ms = 5\n",
        );
        config.validate().unwrap();
        assert_eq!(config.pipeline.broadcast_interval_ms, MIN_BROADCAST_INTERVAL_MS);
    }
}
