//! # MGreen Core
//! Shared foundation for the notification pipeline: error type, config,
//! wire types, and the trait seams between producer, consumer, and channels.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::MGreenConfig;
pub use error::{MGreenError, Result};
pub use traits::{DeliverySink, RecipientDirectory};
pub use types::{OutboundMessage, QueueEntry, Recipient, RecipientId};
