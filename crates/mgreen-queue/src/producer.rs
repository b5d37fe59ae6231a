//! Notification producer — serializes messages and appends them durably.
//!
//! Explicit `start`/`stop` lifecycle: establishing the queue connection is
//! its own failable step, separate from construction, and callers own when
//! it happens. Publishing before `start` is an error, not a hidden connect.

use crate::Queue;
use chrono::{DateTime, Utc};
use mgreen_core::types::{OutboundMessage, QueueEntry, RecipientId};
use mgreen_core::{MGreenError, Result};
use std::sync::Arc;

pub struct Producer {
    queue: Arc<dyn Queue>,
    topic: String,
    started: bool,
}

impl Producer {
    pub fn new(queue: Arc<dyn Queue>, topic: &str) -> Self {
        Self {
            queue,
            topic: topic.to_string(),
            started: false,
        }
    }

    /// Start the producer. Must be called before the first publish.
    pub async fn start(&mut self) -> Result<()> {
        tracing::info!("Starting producer for topic: {}", self.topic);
        self.started = true;
        Ok(())
    }

    /// Stop the producer. Publishing afterwards fails until restarted.
    pub async fn stop(&mut self) {
        if self.started {
            tracing::info!("Stopping producer for topic: {}", self.topic);
            self.started = false;
        }
    }

    /// Publish one message. Returns once the queue has durably acknowledged
    /// the append — delivery happens later, in the consumer process.
    ///
    /// `deliver_at` in the past is permitted and means "as soon as possible".
    pub async fn publish(
        &self,
        recipient: impl Into<RecipientId>,
        text: &str,
        deliver_at: Option<DateTime<Utc>>,
    ) -> Result<u64> {
        if !self.started {
            return Err(MGreenError::Queue(
                "Producer not started. Call start() first.".into(),
            ));
        }
        let recipient = recipient.into();
        if recipient.to_string().is_empty() {
            return Err(MGreenError::Queue("Empty recipient".into()));
        }
        if text.is_empty() {
            return Err(MGreenError::Queue("Empty message body".into()));
        }

        let mut msg = OutboundMessage::new(recipient, text);
        if let Some(at) = deliver_at {
            msg = msg.with_deliver_at(at);
        }
        let payload = serde_json::to_vec(&msg)
            .map_err(|e| MGreenError::Queue(format!("Serialize: {e}")))?;
        let offset = self.queue.append(&self.topic, &payload).await?;
        tracing::debug!(
            "Published to {} at offset {} (recipient {})",
            self.topic,
            offset,
            msg.telegram_id
        );
        Ok(offset)
    }

    /// Publish a webhook-style batch as one queue entry (a JSON array).
    /// Each item keeps its own independent `deliver_at` policy downstream.
    pub async fn publish_batch(&self, batch: &[OutboundMessage]) -> Result<u64> {
        if !self.started {
            return Err(MGreenError::Queue(
                "Producer not started. Call start() first.".into(),
            ));
        }
        if batch.is_empty() {
            return Err(MGreenError::Queue("Empty message batch".into()));
        }
        // Untagged: a Many entry serializes as a plain JSON array.
        let entry = QueueEntry::Many(batch.to_vec());
        let payload = serde_json::to_vec(&entry)
            .map_err(|e| MGreenError::Queue(format!("Serialize: {e}")))?;
        let offset = self.queue.append(&self.topic, &payload).await?;
        tracing::debug!(
            "Published batch of {} to {} at offset {}",
            batch.len(),
            self.topic,
            offset
        );
        Ok(offset)
    }
}
