//! Trait seams between the scheduler and its collaborators.

use crate::error::Result;
use crate::types::Recipient;
use async_trait::async_trait;

/// Outbound channel boundary. The scheduling consumer only needs this one
/// operation plus its failure signal — no channel protocol details leak in.
#[async_trait]
pub trait DeliverySink: Send + Sync {
    fn name(&self) -> &str;

    /// Send `text` to the external recipient address.
    async fn send(&self, recipient: &str, text: &str) -> Result<()>;
}

/// Read-only mapping from internal users to external Telegram chat ids.
/// Entry lifecycle belongs to the integration service.
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    async fn list_recipients(&self) -> Result<Vec<Recipient>>;
}
