//! Outbox publisher and the `FlushEvents` command that triggers it.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use evolog_core::bus::MessageBus;
use evolog_core::error::DomainError;
use evolog_core::event::StreamEvent;
use evolog_core::handler::CommandHandler;
use evolog_core::message::{CommandMessage, EventMessage};
use evolog_core::payload::{Payload, SerializedPayload, resolve_name};
use evolog_core::storage::StorageBackend;
use serde::{Deserialize, Serialize};

/// Sends the event windows of outstanding tickets to the bus and retires
/// the tickets.
#[derive(Clone)]
pub struct OutboxPublisher {
    storage: Arc<dyn StorageBackend>,
    bus: Arc<dyn MessageBus<EventMessage>>,
}

impl OutboxPublisher {
    /// Creates a new `OutboxPublisher`.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>, bus: Arc<dyn MessageBus<EventMessage>>) -> Self {
        Self { storage, bus }
    }

    /// Publishes every pending ticket of a stream in `start_version` order.
    ///
    /// Each ticket's window goes out as one batch partitioned by
    /// `stream_id`, and the ticket is deleted only after the send succeeds.
    /// Processing stops at the first failure so later batches never overtake
    /// an earlier one. A ticket that is already gone counts as published.
    /// Returns the number of tickets published.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::TransientPublishFailure` if the bus rejects a
    /// batch, `DomainError::Infrastructure` if a ticket's window is
    /// incomplete, or any storage error.
    pub async fn publish_events(
        &self,
        state_kind: &str,
        stream_id: &str,
    ) -> Result<usize, DomainError> {
        let tickets = self.storage.query_tickets_for(state_kind, stream_id).await?;
        let mut published = 0;

        for ticket in tickets {
            let events = self
                .storage
                .query_event_window(
                    state_kind,
                    stream_id,
                    ticket.start_version,
                    ticket.event_count,
                )
                .await?;
            if i64::try_from(events.len()).ok() != Some(ticket.event_count) {
                return Err(DomainError::Infrastructure(format!(
                    "ticket {} covers {} events of {state_kind}/{stream_id} from version {}, found {}",
                    ticket.transaction_id,
                    ticket.event_count,
                    ticket.start_version,
                    events.len()
                )));
            }

            let batch: Vec<EventMessage> = events.iter().map(StreamEvent::to_message).collect();
            if let Err(e) = self.bus.send(batch, stream_id).await {
                tracing::warn!(
                    state_kind,
                    stream_id,
                    start_version = ticket.start_version,
                    error = %e,
                    "publish failed; ticket kept for retry"
                );
                return Err(DomainError::TransientPublishFailure {
                    state_kind: state_kind.to_owned(),
                    stream_id: stream_id.to_owned(),
                    reason: e.to_string(),
                });
            }

            if !self.storage.delete_ticket(&ticket).await? {
                tracing::debug!(
                    transaction_id = %ticket.transaction_id,
                    "ticket already deleted by a concurrent publisher"
                );
            }
            tracing::debug!(
                state_kind,
                stream_id,
                start_version = ticket.start_version,
                event_count = ticket.event_count,
                "ticket published"
            );
            published += 1;
        }

        Ok(published)
    }
}

impl fmt::Debug for OutboxPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboxPublisher").finish_non_exhaustive()
    }
}

/// Command asking for the pending tickets of one stream to be published.
///
/// Wire shape: `{"stateKind": "...", "streamId": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlushEvents {
    /// State kind of the stream.
    pub state_kind: String,
    /// Stream to flush.
    pub stream_id: String,
}

impl FlushEvents {
    /// Registered command type name, unqualified.
    pub const TYPE_NAME: &'static str = "FlushEvents";
}

impl Payload for FlushEvents {
    const NAMESPACE: &'static str = "evolog";
    const TYPE_NAMES: &'static [&'static str] = &[Self::TYPE_NAME];

    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn encode(&self) -> Result<SerializedPayload, DomainError> {
        let data = serde_json::to_value(self)
            .map_err(|e| DomainError::Serialization(format!("{}: {e}", Self::TYPE_NAME)))?;
        Ok(SerializedPayload {
            type_name: self.qualified_name(),
            data,
        })
    }

    fn decode(serialized: &SerializedPayload) -> Result<Self, DomainError> {
        resolve_name::<Self>(&serialized.type_name)?;
        serde_json::from_value(serialized.data.clone())
            .map_err(|e| DomainError::Serialization(format!("{}: {e}", Self::TYPE_NAME)))
    }
}

/// Handles `FlushEvents` by running the publisher. Re-delivery is harmless:
/// a stream without tickets publishes nothing.
#[derive(Debug, Clone)]
pub struct FlushEventsHandler {
    publisher: OutboxPublisher,
}

impl FlushEventsHandler {
    /// Creates a new `FlushEventsHandler`.
    #[must_use]
    pub fn new(publisher: OutboxPublisher) -> Self {
        Self { publisher }
    }
}

#[async_trait]
impl CommandHandler for FlushEventsHandler {
    fn can_handle(&self, message: &CommandMessage) -> bool {
        resolve_name::<FlushEvents>(&message.payload.type_name).is_ok()
    }

    async fn handle(&self, message: &CommandMessage) -> Result<(), DomainError> {
        let flush = FlushEvents::decode(&message.payload)?;
        let published = self
            .publisher
            .publish_events(&flush.state_kind, &flush.stream_id)
            .await?;
        tracing::debug!(
            state_kind = %flush.state_kind,
            stream_id = %flush.stream_id,
            published,
            "flush handled"
        );
        Ok(())
    }
}
