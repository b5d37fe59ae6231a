//! # MGreen Queue
//!
//! Durable, ordered, at-least-once queue seam between the notification
//! producers and the scheduling consumer. The broker itself is conceptually
//! external — this crate only defines the trait the pipeline talks to, plus
//! two backends behind it:
//!
//! - [`MemoryQueue`] — in-process, for tests and single-process demos
//! - [`SqliteQueue`] — durable on disk, shared between the producing API
//!   process and the consumer process
//!
//! Offsets are committed explicitly by the consumer after a record is fully
//! processed. Records appended but not yet committed are re-served after a
//! restart, which is where the at-least-once guarantee (and the accepted
//! duplicate-send risk) comes from.

pub mod memory;
pub mod producer;
pub mod sqlite;

pub use memory::MemoryQueue;
pub use producer::Producer;
pub use sqlite::SqliteQueue;

use async_trait::async_trait;
use mgreen_core::Result;
use std::time::Duration;

/// One record as served to a consumer.
#[derive(Debug, Clone)]
pub struct QueueRecord {
    /// Monotonic position within the topic.
    pub offset: u64,
    /// Raw JSON payload — a single message object or an array of them.
    pub payload: Vec<u8>,
}

/// Ordered, at-least-once append log. One ordered partition per topic;
/// ordering across topics is not guaranteed.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Durably append a payload. Returns its offset.
    async fn append(&self, topic: &str, payload: &[u8]) -> Result<u64>;

    /// Fetch up to `max` records past the group's committed offset, blocking
    /// up to `wait` for new data. An empty result means the wait elapsed.
    async fn fetch(
        &self,
        group: &str,
        topic: &str,
        max: usize,
        wait: Duration,
    ) -> Result<Vec<QueueRecord>>;

    /// Mark everything up to and including `offset` as consumed for `group`.
    async fn commit(&self, group: &str, topic: &str, offset: u64) -> Result<()>;
}
