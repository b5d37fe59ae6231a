//! Error type shared across the MGreen crates.

/// All errors surfaced by the notification pipeline.
#[derive(Debug, thiserror::Error)]
pub enum MGreenError {
    #[error("Config error: {0}")]
    Config(String),

    /// Queue unreachable or a durable append/fetch/commit was rejected.
    #[error("Queue error: {0}")]
    Queue(String),

    /// Outbound channel (Telegram Bot API) failure.
    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Directory error: {0}")]
    Directory(String),

    /// Dequeued payload failed schema validation. Recovered locally by the
    /// consumer (skip + log), never fatal.
    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MGreenError>;
