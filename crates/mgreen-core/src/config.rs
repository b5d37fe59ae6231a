//! MGreen configuration system.
//!
//! TOML file at `~/.mgreen/config.toml`. Every timing knob of the delivery
//! policy (grace window, pacing, backoff) lives here rather than as a magic
//! number in the consumer loop.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{MGreenError, Result};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MGreenConfig {
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub directory: DirectoryConfig,
}

impl MGreenConfig {
    /// Load config from the default path (~/.mgreen/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| MGreenError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| MGreenError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path())
    }

    /// Save config to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| MGreenError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the MGreen home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".mgreen")
    }
}

/// Durable queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Path to the queue database.
    #[serde(default = "default_queue_db")]
    pub db_path: String,
    /// Topic all notification messages are published under.
    #[serde(default = "default_topic")]
    pub topic: String,
    /// Consumer group id — one committed offset cursor per group.
    #[serde(default = "default_group_id")]
    pub group_id: String,
}

fn default_queue_db() -> String {
    "~/.mgreen/queue.db".into()
}
fn default_topic() -> String {
    "telegram_messages".into()
}
fn default_group_id() -> String {
    "telegram_bot_group".into()
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            db_path: default_queue_db(),
            topic: default_topic(),
            group_id: default_group_id(),
        }
    }
}

/// Delivery policy knobs for the scheduling consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// How far past `deliver_at` a message still counts as on-time.
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,
    /// Pause after each successful send, to stay under the Bot API rate limit.
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,
    /// Sleep between read-loop restarts after a queue failure.
    #[serde(default = "default_backoff_secs")]
    pub retry_backoff_secs: u64,
    /// How long one fetch blocks waiting for new records.
    #[serde(default = "default_poll_secs")]
    pub poll_interval_secs: u64,
    /// Per-call timeout for the delivery sink, independent of any
    /// scheduling delay.
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
    /// Consecutive queue failures tolerated before the run loop gives up
    /// and surfaces to process supervision.
    #[serde(default = "default_max_failures")]
    pub max_consecutive_failures: u32,
}

fn default_grace_secs() -> u64 {
    10
}
fn default_pacing_ms() -> u64 {
    100
}
fn default_backoff_secs() -> u64 {
    5
}
fn default_poll_secs() -> u64 {
    5
}
fn default_send_timeout_secs() -> u64 {
    10
}
fn default_max_failures() -> u32 {
    12
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            grace_secs: default_grace_secs(),
            pacing_ms: default_pacing_ms(),
            retry_backoff_secs: default_backoff_secs(),
            poll_interval_secs: default_poll_secs(),
            send_timeout_secs: default_send_timeout_secs(),
            max_consecutive_failures: default_max_failures(),
        }
    }
}

/// Telegram Bot API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            enabled: true,
        }
    }
}

/// Recipient directory configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Path to the application database holding `telegram_integration` rows.
    #[serde(default = "default_directory_db")]
    pub db_path: String,
}

fn default_directory_db() -> String {
    "~/.mgreen/mgreen.db".into()
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            db_path: default_directory_db(),
        }
    }
}
