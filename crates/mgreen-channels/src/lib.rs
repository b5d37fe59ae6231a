//! # MGreen Channels
//! Outbound delivery channel implementations behind the
//! [`mgreen_core::DeliverySink`] seam.

pub mod telegram;

pub use telegram::{TelegramSink, TelegramUser};
