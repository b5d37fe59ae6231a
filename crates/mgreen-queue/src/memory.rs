//! In-process queue backend — `Mutex` state plus `tokio::sync::Notify`
//! for blocking fetches. Used by tests and single-process demos; the
//! durable backend is [`crate::SqliteQueue`].

use crate::{Queue, QueueRecord};
use async_trait::async_trait;
use mgreen_core::Result;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Default)]
struct Inner {
    /// All records per topic, in append order. Offsets are indices + 1 so
    /// offset 0 never exists and "nothing committed" is representable.
    topics: HashMap<String, Vec<Vec<u8>>>,
    /// Next uncommitted offset per (group, topic).
    cursors: HashMap<(String, String), u64>,
}

/// In-memory queue.
#[derive(Default)]
pub struct MemoryQueue {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records ever appended to a topic.
    pub fn len(&self, topic: &str) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.topics.get(topic).map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self, topic: &str) -> bool {
        self.len(topic) == 0
    }

    fn pending(&self, group: &str, topic: &str, max: usize) -> Vec<QueueRecord> {
        let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let start = inner
            .cursors
            .get(&(group.to_string(), topic.to_string()))
            .copied()
            .unwrap_or(1);
        let Some(records) = inner.topics.get(topic) else {
            return Vec::new();
        };
        records
            .iter()
            .enumerate()
            .map(|(i, payload)| QueueRecord {
                offset: i as u64 + 1,
                payload: payload.clone(),
            })
            .filter(|r| r.offset >= start)
            .take(max)
            .collect()
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    async fn append(&self, topic: &str, payload: &[u8]) -> Result<u64> {
        let offset = {
            let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
            let records = inner.topics.entry(topic.to_string()).or_default();
            records.push(payload.to_vec());
            records.len() as u64
        };
        self.notify.notify_waiters();
        Ok(offset)
    }

    async fn fetch(
        &self,
        group: &str,
        topic: &str,
        max: usize,
        wait: Duration,
    ) -> Result<Vec<QueueRecord>> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            // Arm the waiter before checking, so an append landing between
            // the check and the await still wakes this fetch. `notified()`
            // alone only registers once polled.
            let mut notified = std::pin::pin!(self.notify.notified());
            notified.as_mut().enable();
            let records = self.pending(group, topic, max);
            if !records.is_empty() {
                return Ok(records);
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Ok(Vec::new());
            }
            let _ = tokio::time::timeout(remaining, notified).await;
        }
    }

    async fn commit(&self, group: &str, topic: &str, offset: u64) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let cursor = inner
            .cursors
            .entry((group.to_string(), topic.to_string()))
            .or_insert(1);
        *cursor = (*cursor).max(offset + 1);
        Ok(())
    }
}
