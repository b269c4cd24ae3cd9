//! Message bus contract.

use async_trait::async_trait;

use crate::error::DomainError;

/// Outbound transport for events and commands.
///
/// One `send` call is one batch delivered together; no ordering is assumed
/// between calls. Delivery is at-least-once, so consumers must tolerate
/// duplicates.
#[async_trait]
pub trait MessageBus<M: Send + 'static>: Send + Sync {
    /// Sends a batch of messages under a partition key.
    async fn send(&self, batch: Vec<M>, partition_key: &str) -> Result<(), DomainError>;
}
