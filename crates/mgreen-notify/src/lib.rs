//! # MGreen Notify
//!
//! The scheduling consumer at the heart of the notification pipeline:
//! drains the durable queue in FIFO order and applies a per-message
//! delivery-time policy before handing off to the delivery sink.
//!
//! ```text
//! Producer ──▶ Queue (FIFO, at-least-once)
//!                 │
//!                 ▼
//!        SchedulingConsumer
//!          RECEIVED ─▶ { WAITING │ READY │ LATE } ─▶ DELIVERED
//!                 │
//!                 ▼
//!        DeliverySink (Telegram sendMessage)
//! ```
//!
//! A message waiting on a future `deliver_at` blocks everything behind it
//! in the topic. That is the contract, not an accident: per-recipient
//! ordering beats early delivery here, and upstream producers schedule at
//! most a few seconds out.

pub mod broadcast;
pub mod consumer;
pub mod directory;
pub mod policy;

pub use broadcast::broadcast;
pub use consumer::SchedulingConsumer;
pub use directory::SqliteDirectory;
pub use policy::{DeliveryDecision, decide};
