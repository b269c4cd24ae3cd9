//! Command handling contract.

use async_trait::async_trait;

use crate::error::DomainError;
use crate::message::CommandMessage;

/// Something that consumes serialized commands delivered by the bus.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Whether this handler is bound to the message's command type.
    fn can_handle(&self, message: &CommandMessage) -> bool;

    /// Executes the command.
    async fn handle(&self, message: &CommandMessage) -> Result<(), DomainError>;
}
