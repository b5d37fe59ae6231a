//! Scheduling consumer — drains the queue and applies the per-message
//! delivery-time policy before handing off to the delivery sink.
//!
//! One consumer per topic. Messages are processed strictly in queue order;
//! a message waiting on its `deliver_at` suspends everything behind it.
//! Failures local to one message (malformed payload, sink error) never
//! abort the loop; only repeated queue-level failures surface to the
//! caller for process supervision to handle.

use crate::policy::{self, DeliveryDecision};
use chrono::Utc;
use mgreen_core::config::{DeliveryConfig, QueueConfig};
use mgreen_core::types::OutboundMessage;
use mgreen_core::{DeliverySink, MGreenError, Result};
use mgreen_queue::{Queue, QueueRecord};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Records fetched per queue round-trip.
const FETCH_BATCH: usize = 32;

pub struct SchedulingConsumer {
    queue: Arc<dyn Queue>,
    sink: Arc<dyn DeliverySink>,
    config: DeliveryConfig,
    topic: String,
    group: String,
}

impl SchedulingConsumer {
    pub fn new(
        queue: Arc<dyn Queue>,
        sink: Arc<dyn DeliverySink>,
        queue_config: &QueueConfig,
        config: DeliveryConfig,
    ) -> Self {
        Self {
            queue,
            sink,
            config,
            topic: queue_config.topic.clone(),
            group: queue_config.group_id.clone(),
        }
    }

    /// Run the consumer loop until `shutdown` flips to true or queue
    /// failures exceed the configured tolerance.
    ///
    /// Returning `Err` means the queue stayed unreachable through
    /// `max_consecutive_failures` backoff rounds — the host process should
    /// exit and let supervision restart it rather than spin silently.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        tracing::info!(
            "Scheduling consumer started (topic: {}, group: {})",
            self.topic,
            self.group
        );
        let mut failures: u32 = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.drain_once(&mut shutdown).await {
                Ok(true) => failures = 0,
                Ok(false) => break,
                Err(e) => {
                    failures += 1;
                    if failures >= self.config.max_consecutive_failures {
                        tracing::error!(
                            "Queue unreachable after {failures} consecutive failures, giving up"
                        );
                        return Err(MGreenError::Queue(format!(
                            "Consumer gave up after {failures} consecutive failures: {e}"
                        )));
                    }
                    tracing::warn!(
                        "Queue error ({failures} consecutive): {e}; retrying in {}s",
                        self.config.retry_backoff_secs
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(self.config.retry_backoff_secs)) => {}
                        _ = shutdown.changed() => break,
                    }
                }
            }
        }

        tracing::info!("Scheduling consumer stopped");
        Ok(())
    }

    /// One fetch round. Returns Ok(false) once shutdown is observed.
    async fn drain_once(&self, shutdown: &mut watch::Receiver<bool>) -> Result<bool> {
        let wait = Duration::from_secs(self.config.poll_interval_secs);
        let records = tokio::select! {
            res = self.queue.fetch(&self.group, &self.topic, FETCH_BATCH, wait) => res?,
            _ = shutdown.changed() => return Ok(false),
        };
        for record in records {
            if !self.process_record(&record, shutdown).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Process one queue entry — a single message object or a batch array —
    /// then commit its offset. Malformed items are logged and skipped;
    /// they still consume their offset so they cannot wedge the topic.
    async fn process_record(
        &self,
        record: &QueueRecord,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<bool> {
        match serde_json::from_slice::<serde_json::Value>(&record.payload) {
            Ok(value) => {
                let items = match value {
                    serde_json::Value::Array(items) => items,
                    other => vec![other],
                };
                for item in items {
                    match serde_json::from_value::<OutboundMessage>(item) {
                        Ok(msg) => {
                            if !self.deliver_one(&msg, shutdown).await {
                                // Shutdown mid-entry: leave the offset
                                // uncommitted so the entry is redelivered
                                // on restart (at-least-once).
                                return Ok(false);
                            }
                        }
                        Err(e) => {
                            tracing::warn!(
                                "Invalid message format at offset {}: {e}",
                                record.offset
                            );
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!("Skipping unparseable entry at offset {}: {e}", record.offset);
            }
        }
        self.queue.commit(&self.group, &self.topic, record.offset).await?;
        Ok(true)
    }

    /// Deliver one message: wait out a future `deliver_at`, then send.
    /// Returns false only if shutdown interrupted the wait.
    async fn deliver_one(
        &self,
        msg: &OutboundMessage,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        let recipient = msg.telegram_id.to_string();
        if recipient.is_empty() || msg.message.is_empty() {
            tracing::warn!("Empty recipient or body, skipping");
            return true;
        }

        let grace = Duration::from_secs(self.config.grace_secs);
        match policy::decide(msg.deliver_at.as_deref(), Utc::now(), grace) {
            DeliveryDecision::Wait(delay) => {
                tracing::info!(
                    "Delaying {:.1}s before delivering to {recipient}",
                    delay.as_secs_f64()
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => return false,
                }
            }
            DeliveryDecision::Forward => {}
            DeliveryDecision::ForwardLate => {
                tracing::warn!(
                    "Message for {recipient} overdue past the {}s grace window, sending anyway",
                    self.config.grace_secs
                );
            }
        }

        match self.sink.send(&recipient, &msg.message).await {
            Ok(()) => {
                tracing::info!("Delivered to {recipient} via {}", self.sink.name());
                // Pacing: stay under the outbound channel's rate limit.
                tokio::time::sleep(Duration::from_millis(self.config.pacing_ms)).await;
            }
            Err(e) => {
                // The message still counts as consumed — retrying here would
                // turn one bad recipient into a poison loop for the topic.
                tracing::error!("Delivery to {recipient} failed: {e}");
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mgreen_queue::{MemoryQueue, Producer};
    use std::sync::Mutex;
    use tokio::time::Instant;

    struct RecordingSink {
        sent: Mutex<Vec<(String, String, Instant)>>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
            })
        }

        fn sent(&self) -> Vec<(String, String, Instant)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DeliverySink for RecordingSink {
        fn name(&self) -> &str {
            "recording"
        }
        async fn send(&self, recipient: &str, text: &str) -> Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((recipient.to_string(), text.to_string(), Instant::now()));
            Ok(())
        }
    }

    /// Sink that fails for one recipient and records the rest.
    struct FlakySink {
        fail_for: String,
        inner: Arc<RecordingSink>,
    }

    #[async_trait]
    impl DeliverySink for FlakySink {
        fn name(&self) -> &str {
            "flaky"
        }
        async fn send(&self, recipient: &str, text: &str) -> Result<()> {
            if recipient == self.fail_for {
                return Err(MGreenError::Channel("chat not found".into()));
            }
            self.inner.send(recipient, text).await
        }
    }

    fn test_config() -> DeliveryConfig {
        DeliveryConfig {
            grace_secs: 10,
            pacing_ms: 1,
            retry_backoff_secs: 1,
            poll_interval_secs: 1,
            send_timeout_secs: 5,
            max_consecutive_failures: 3,
        }
    }

    fn spawn_consumer_with(
        queue: Arc<dyn Queue>,
        sink: Arc<dyn DeliverySink>,
        config: DeliveryConfig,
    ) -> (watch::Sender<bool>, tokio::task::JoinHandle<Result<()>>) {
        let (tx, rx) = watch::channel(false);
        let consumer = Arc::new(SchedulingConsumer::new(
            queue,
            sink,
            &QueueConfig::default(),
            config,
        ));
        let handle = tokio::spawn(async move { consumer.run(rx).await });
        (tx, handle)
    }

    fn spawn_consumer(
        queue: Arc<MemoryQueue>,
        sink: Arc<dyn DeliverySink>,
    ) -> (watch::Sender<bool>, tokio::task::JoinHandle<Result<()>>) {
        spawn_consumer_with(queue, sink, test_config())
    }

    async fn wait_for_sends(sink: &RecordingSink, n: usize, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        while sink.sent().len() < n {
            assert!(
                Instant::now() < deadline,
                "timed out waiting for {n} sends, got {}",
                sink.sent().len()
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    const TOPIC: &str = "telegram_messages";

    async fn publish(
        queue: &Arc<MemoryQueue>,
        recipient: i64,
        text: &str,
        deliver_in: Option<chrono::Duration>,
    ) {
        let mut producer = Producer::new(queue.clone(), TOPIC);
        producer.start().await.unwrap();
        producer
            .publish(recipient, text, deliver_in.map(|d| Utc::now() + d))
            .await
            .unwrap();
        producer.stop().await;
    }

    #[tokio::test]
    async fn test_immediate_message_delivered_without_delay() {
        let queue = Arc::new(MemoryQueue::new());
        let sink = RecordingSink::new();
        let started = Instant::now();
        publish(&queue, 42, "hi", None).await;
        let (tx, handle) = spawn_consumer(queue, sink.clone());

        wait_for_sends(&sink, 1, Duration::from_secs(3)).await;
        let sent = sink.sent();
        assert_eq!(sent[0].0, "42");
        assert_eq!(sent[0].1, "hi");
        assert!(sent[0].2 - started < Duration::from_millis(500));

        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_future_delay_honored() {
        let queue = Arc::new(MemoryQueue::new());
        let sink = RecordingSink::new();
        let published = Instant::now();
        publish(&queue, 42, "hi", Some(chrono::Duration::milliseconds(500))).await;
        let (tx, handle) = spawn_consumer(queue, sink.clone());

        wait_for_sends(&sink, 1, Duration::from_secs(3)).await;
        let elapsed = sink.sent()[0].2 - published;
        assert!(elapsed >= Duration::from_millis(400), "delivered too early: {elapsed:?}");
        assert!(elapsed < Duration::from_secs(2), "delivered too late: {elapsed:?}");

        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_overdue_message_still_delivered() {
        let queue = Arc::new(MemoryQueue::new());
        let sink = RecordingSink::new();
        publish(&queue, 42, "old news", Some(chrono::Duration::seconds(-30))).await;
        let (tx, handle) = spawn_consumer(queue, sink.clone());

        wait_for_sends(&sink, 1, Duration::from_secs(3)).await;
        assert_eq!(sink.sent()[0].1, "old news");

        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_slightly_late_treated_as_on_time() {
        let queue = Arc::new(MemoryQueue::new());
        let sink = RecordingSink::new();
        publish(&queue, 42, "hi", Some(chrono::Duration::seconds(-3))).await;
        let (tx, handle) = spawn_consumer(queue, sink.clone());

        wait_for_sends(&sink, 1, Duration::from_secs(3)).await;

        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_malformed_entry_skipped_loop_continues() {
        let queue = Arc::new(MemoryQueue::new());
        let sink = RecordingSink::new();
        // Missing telegram_id, then garbage, then a well-formed message.
        queue
            .append(TOPIC, br#"{"message": "who is this for?"}"#)
            .await
            .unwrap();
        queue.append(TOPIC, b"not json at all").await.unwrap();
        publish(&queue, 42, "still alive", None).await;
        let (tx, handle) = spawn_consumer(queue, sink.clone());

        wait_for_sends(&sink, 1, Duration::from_secs(3)).await;
        let sent = sink.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, "still alive");

        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_batch_entry_expands_to_independent_deliveries() {
        let queue = Arc::new(MemoryQueue::new());
        let sink = RecordingSink::new();
        queue
            .append(
                TOPIC,
                br#"[{"telegram_id": 1, "message": "one"},
                     {"telegram_id": 2, "message": "two"}]"#,
            )
            .await
            .unwrap();
        let (tx, handle) = spawn_consumer(queue, sink.clone());

        wait_for_sends(&sink, 2, Duration::from_secs(3)).await;
        let sent = sink.sent();
        assert_eq!(sent[0].0, "1");
        assert_eq!(sent[1].0, "2");

        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_bad_item_in_batch_skipped_rest_delivered() {
        let queue = Arc::new(MemoryQueue::new());
        let sink = RecordingSink::new();
        queue
            .append(
                TOPIC,
                br#"[{"message": "no recipient"},
                     {"telegram_id": 2, "message": "fine"}]"#,
            )
            .await
            .unwrap();
        let (tx, handle) = spawn_consumer(queue, sink.clone());

        wait_for_sends(&sink, 1, Duration::from_secs(3)).await;
        assert_eq!(sink.sent()[0].0, "2");

        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_fifo_blocking_order_preserved() {
        let queue = Arc::new(MemoryQueue::new());
        let sink = RecordingSink::new();
        // M1 scheduled later than M2's (absent) schedule would allow —
        // M2 must still wait for M1 to finish.
        publish(&queue, 1, "m1", Some(chrono::Duration::milliseconds(600))).await;
        publish(&queue, 2, "m2", None).await;
        let (tx, handle) = spawn_consumer(queue, sink.clone());

        wait_for_sends(&sink, 2, Duration::from_secs(3)).await;
        let sent = sink.sent();
        assert_eq!(sent[0].1, "m1");
        assert_eq!(sent[1].1, "m2");
        assert!(sent[1].2 >= sent[0].2);

        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_sink_failure_does_not_halt_loop() {
        let queue = Arc::new(MemoryQueue::new());
        let recording = RecordingSink::new();
        let sink = Arc::new(FlakySink {
            fail_for: "1".into(),
            inner: recording.clone(),
        });
        publish(&queue, 1, "bounces", None).await;
        publish(&queue, 2, "arrives", None).await;
        let (tx, handle) = spawn_consumer(queue.clone(), sink);

        wait_for_sends(&recording, 1, Duration::from_secs(3)).await;
        assert_eq!(recording.sent()[0].0, "2");

        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        // The failed message consumed its offset — nothing left to fetch.
        let leftover = queue
            .fetch("telegram_bot_group", TOPIC, 10, Duration::from_millis(10))
            .await
            .unwrap();
        assert!(leftover.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_stops_cleanly() {
        let queue = Arc::new(MemoryQueue::new());
        let sink = RecordingSink::new();
        let (tx, handle) = spawn_consumer(queue, sink);
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_during_wait_leaves_message_uncommitted() {
        let queue = Arc::new(MemoryQueue::new());
        let sink = RecordingSink::new();
        publish(&queue, 42, "later", Some(chrono::Duration::seconds(30))).await;
        let (tx, handle) = spawn_consumer(queue.clone(), sink.clone());

        tokio::time::sleep(Duration::from_millis(200)).await;
        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        assert!(sink.sent().is_empty());
        // Still fetchable — will be redelivered after restart.
        let records = queue
            .fetch("telegram_bot_group", TOPIC, 10, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
    }

    /// Queue backend where every operation fails.
    struct BrokenQueue;

    #[async_trait]
    impl Queue for BrokenQueue {
        async fn append(&self, _topic: &str, _payload: &[u8]) -> Result<u64> {
            Err(MGreenError::Queue("broker down".into()))
        }
        async fn fetch(
            &self,
            _group: &str,
            _topic: &str,
            _max: usize,
            _wait: Duration,
        ) -> Result<Vec<QueueRecord>> {
            Err(MGreenError::Queue("broker down".into()))
        }
        async fn commit(&self, _group: &str, _topic: &str, _offset: u64) -> Result<()> {
            Err(MGreenError::Queue("broker down".into()))
        }
    }

    /// Queue backend whose fetch fails a set number of times before
    /// delegating to an in-memory queue.
    struct TransientQueue {
        inner: MemoryQueue,
        failures_left: Mutex<u32>,
    }

    impl TransientQueue {
        fn new(failures: u32) -> Self {
            Self {
                inner: MemoryQueue::new(),
                failures_left: Mutex::new(failures),
            }
        }

        fn set_failures(&self, n: u32) {
            *self.failures_left.lock().unwrap() = n;
        }
    }

    #[async_trait]
    impl Queue for TransientQueue {
        async fn append(&self, topic: &str, payload: &[u8]) -> Result<u64> {
            self.inner.append(topic, payload).await
        }
        async fn fetch(
            &self,
            group: &str,
            topic: &str,
            max: usize,
            wait: Duration,
        ) -> Result<Vec<QueueRecord>> {
            {
                let mut left = self.failures_left.lock().unwrap();
                if *left > 0 {
                    *left -= 1;
                    return Err(MGreenError::Queue("transient outage".into()));
                }
            }
            self.inner.fetch(group, topic, max, wait).await
        }
        async fn commit(&self, group: &str, topic: &str, offset: u64) -> Result<()> {
            self.inner.commit(group, topic, offset).await
        }
    }

    #[tokio::test]
    async fn test_queue_failures_exhaust_retry_budget() {
        let sink = RecordingSink::new();
        let mut config = test_config();
        config.retry_backoff_secs = 0;
        let (_tx, handle) = spawn_consumer_with(Arc::new(BrokenQueue), sink.clone(), config);

        let result = handle.await.unwrap();
        let err = result.expect_err("run should give up on a dead queue");
        assert!(
            err.to_string().contains("3 consecutive"),
            "unexpected error: {err}"
        );
        assert!(sink.sent().is_empty());
    }

    #[tokio::test]
    async fn test_transient_failure_recovers_and_delivers() {
        let queue = Arc::new(TransientQueue::new(2));
        let sink = RecordingSink::new();
        let mut producer = Producer::new(queue.clone(), TOPIC);
        producer.start().await.unwrap();
        producer.publish(1, "back online", None).await.unwrap();

        // Two failures, under the cap of three — the consumer must ride
        // them out and still deliver.
        let mut config = test_config();
        config.retry_backoff_secs = 0;
        let (tx, handle) = spawn_consumer_with(queue.clone(), sink.clone(), config);
        wait_for_sends(&sink, 1, Duration::from_secs(3)).await;
        assert_eq!(sink.sent()[0].1, "back online");

        // A successful round reset the counter: two more failures must
        // again stay under the cap instead of stacking to four.
        queue.set_failures(2);
        producer.publish(2, "still here", None).await.unwrap();
        producer.stop().await;
        wait_for_sends(&sink, 2, Duration::from_secs(3)).await;
        assert_eq!(sink.sent()[1].1, "still here");

        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_dropped_shutdown_sender_stops_consumer() {
        // A closed shutdown channel reads as shutdown — callers that want
        // the consumer to keep running must hold the sender alive.
        let queue = Arc::new(MemoryQueue::new());
        let sink = RecordingSink::new();
        let (tx, handle) = spawn_consumer(queue, sink);
        drop(tx);
        tokio::time::timeout(Duration::from_secs(3), handle)
            .await
            .expect("consumer should stop once the sender is gone")
            .unwrap()
            .unwrap();
    }
}
