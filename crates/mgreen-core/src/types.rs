//! Wire types for queued notification messages.
//!
//! A queue entry is JSON: either a single message object or an array of
//! them (the upstream webhook republishes batches as arrays). `deliver_at`
//! is carried as a string and only parsed at consumption time, so a bad
//! timestamp degrades that one field instead of poisoning the entry.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Recipient address on the wire — upstream producers send either a JSON
/// integer or a string for `telegram_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecipientId {
    Int(i64),
    Text(String),
}

impl std::fmt::Display for RecipientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecipientId::Int(id) => write!(f, "{id}"),
            RecipientId::Text(id) => write!(f, "{id}"),
        }
    }
}

impl From<i64> for RecipientId {
    fn from(id: i64) -> Self {
        RecipientId::Int(id)
    }
}

impl From<&str> for RecipientId {
    fn from(id: &str) -> Self {
        RecipientId::Text(id.to_string())
    }
}

/// A single queued message. Immutable once published.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Destination chat id.
    pub telegram_id: RecipientId,
    /// Text payload.
    pub message: String,
    /// Optional delivery time, ISO-8601 UTC with trailing "Z".
    /// Absent means "deliver immediately upon consumption".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deliver_at: Option<String>,
}

impl OutboundMessage {
    pub fn new(telegram_id: impl Into<RecipientId>, message: &str) -> Self {
        Self {
            telegram_id: telegram_id.into(),
            message: message.to_string(),
            deliver_at: None,
        }
    }

    /// Set the delivery timestamp. Formatted with a trailing "Z" to match
    /// what the webhook producers emit.
    pub fn with_deliver_at(mut self, at: DateTime<Utc>) -> Self {
        self.deliver_at = Some(at.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string());
        self
    }

    /// Parsed delivery time, if present and parseable.
    pub fn deliver_at_utc(&self) -> Option<DateTime<Utc>> {
        self.deliver_at.as_deref().and_then(parse_deliver_at)
    }
}

/// One durable queue entry — a single message or a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueueEntry {
    One(OutboundMessage),
    Many(Vec<OutboundMessage>),
}

impl QueueEntry {
    /// Flatten into individual messages, each with its own delivery policy.
    pub fn into_messages(self) -> Vec<OutboundMessage> {
        match self {
            QueueEntry::One(msg) => vec![msg],
            QueueEntry::Many(msgs) => msgs,
        }
    }
}

/// Parse a `deliver_at` string. Accepts RFC 3339 ("...Z" or offset) and the
/// naive `YYYY-MM-DDTHH:MM:SS[.ffffff]` form some producers emit, read as UTC.
pub fn parse_deliver_at(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    let trimmed = s.strip_suffix('Z').unwrap_or(s);
    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// A registered Telegram integration — internal user id linked to an
/// external chat id. Rows are owned by the integration service; read-only
/// from the pipeline's perspective.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipient {
    pub id: i64,
    pub user_id: i64,
    pub telegram_id: i64,
}
