//! Broadcast fan-out — one message, every registered recipient.
//!
//! Each recipient gets its own queue entry so deliveries stay independent:
//! one bad chat id cannot take down the rest of the broadcast.

use chrono::{DateTime, Utc};
use mgreen_core::{RecipientDirectory, Result};
use mgreen_queue::Producer;

/// Publish `text` to every recipient in the directory. Returns how many
/// messages were enqueued.
pub async fn broadcast(
    producer: &Producer,
    directory: &dyn RecipientDirectory,
    text: &str,
    deliver_at: Option<DateTime<Utc>>,
) -> Result<usize> {
    let recipients = directory.list_recipients().await?;
    if recipients.is_empty() {
        tracing::info!("No registered recipients, nothing to broadcast");
        return Ok(0);
    }
    for recipient in &recipients {
        producer
            .publish(recipient.telegram_id, text, deliver_at)
            .await?;
    }
    tracing::info!("Broadcast queued for {} recipients", recipients.len());
    Ok(recipients.len())
}
