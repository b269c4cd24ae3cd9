//! Appending and replaying the events of one aggregate kind.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use evolog_core::aggregate::Aggregate;
use evolog_core::bus::MessageBus;
use evolog_core::clock::Clock;
use evolog_core::error::DomainError;
use evolog_core::event::StreamEvent;
use evolog_core::message::{Causation, Envelope, EventMessage};
use evolog_core::payload::Payload;
use evolog_core::storage::StorageBackend;
use evolog_core::ticket::PendingTicket;
use uuid::Uuid;

use crate::publisher::OutboxPublisher;

/// Event store for the streams of aggregate kind `A`.
pub struct EventStore<A> {
    storage: Arc<dyn StorageBackend>,
    publisher: OutboxPublisher,
    clock: Arc<dyn Clock>,
    _aggregate: PhantomData<fn() -> A>,
}

impl<A: Aggregate> EventStore<A> {
    /// Creates a store that publishes through `bus`.
    #[must_use]
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        bus: Arc<dyn MessageBus<EventMessage>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let publisher = OutboxPublisher::new(Arc::clone(&storage), bus);
        Self::with_publisher(storage, publisher, clock)
    }

    /// Creates a store around an existing publisher.
    #[must_use]
    pub fn with_publisher(
        storage: Arc<dyn StorageBackend>,
        publisher: OutboxPublisher,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            storage,
            publisher,
            clock,
            _aggregate: PhantomData,
        }
    }

    /// Appends `events` to a stream starting at `start_version`, then
    /// publishes every outstanding ticket of that stream.
    ///
    /// The events and their ticket are written in one durable step. Once
    /// that step succeeds the events are safe: a publish failure is still
    /// returned, but the ticket stays behind for the scanner to retry.
    ///
    /// # Errors
    ///
    /// - `DomainError::ConcurrencyConflict` if `start_version` is not the
    ///   stream's next version; nothing is written.
    /// - `DomainError::UnresolvableType` / `Serialization` if an event cannot
    ///   be encoded; nothing is written.
    /// - `DomainError::TransientPublishFailure` if the bus rejected a batch
    ///   after the write committed.
    /// - Any storage error.
    pub async fn collect_events(
        &self,
        causation: &Causation,
        stream_id: &str,
        start_version: i64,
        events: &[A::Event],
    ) -> Result<(), DomainError> {
        if events.is_empty() {
            return Ok(());
        }
        if start_version < 1 {
            return Err(DomainError::Validation(format!(
                "start version must be at least 1, got {start_version}"
            )));
        }

        let transaction_id = Uuid::now_v7();
        let now = self.clock.now();
        let rows = events
            .iter()
            .zip(start_version..)
            .map(|(event, version)| {
                let serialized = event.encode()?;
                Ok(StreamEvent {
                    state_kind: A::STATE_KIND.to_owned(),
                    stream_id: stream_id.to_owned(),
                    version,
                    event_type: serialized.type_name,
                    payload: serialized.data,
                    raised_at: now,
                    message_id: Uuid::now_v7(),
                    process_id: causation.process_id,
                    initiator: causation.initiator.clone(),
                    predecessor_id: causation.predecessor_id,
                    transaction_id,
                })
            })
            .collect::<Result<Vec<_>, DomainError>>()?;

        let ticket = PendingTicket {
            state_kind: A::STATE_KIND.to_owned(),
            stream_id: stream_id.to_owned(),
            start_version,
            event_count: i64::try_from(rows.len())
                .map_err(|e| DomainError::Validation(format!("batch too large: {e}")))?,
            transaction_id,
            created_at: now,
        };

        self.storage.append_atomic(&rows, &ticket).await?;
        tracing::debug!(
            state_kind = A::STATE_KIND,
            stream_id,
            start_version,
            event_count = ticket.event_count,
            %transaction_id,
            "events appended"
        );

        self.publisher
            .publish_events(A::STATE_KIND, stream_id)
            .await?;
        Ok(())
    }

    /// Loads the payloads of a stream from `from_version` on, in version
    /// order.
    ///
    /// # Errors
    ///
    /// Returns a storage error, or a decoding error for rows that no longer
    /// match the event type.
    pub async fn query_events(
        &self,
        stream_id: &str,
        from_version: i64,
    ) -> Result<Vec<A::Event>, DomainError> {
        self.storage
            .query_by_stream_from_version(A::STATE_KIND, stream_id, from_version)
            .await?
            .iter()
            .map(StreamEvent::decode::<A::Event>)
            .collect()
    }

    /// Loads the payloads of versions `from_version..=to_version`.
    ///
    /// # Errors
    ///
    /// Same as [`EventStore::query_events`].
    pub async fn query_events_through(
        &self,
        stream_id: &str,
        from_version: i64,
        to_version: i64,
    ) -> Result<Vec<A::Event>, DomainError> {
        if to_version < from_version {
            return Ok(Vec::new());
        }
        self.storage
            .query_event_window(
                A::STATE_KIND,
                stream_id,
                from_version,
                to_version - from_version + 1,
            )
            .await?
            .iter()
            .map(StreamEvent::decode::<A::Event>)
            .collect()
    }

    /// Loads a whole stream as envelopes carrying the causal metadata, for
    /// replay and audit.
    ///
    /// # Errors
    ///
    /// Same as [`EventStore::query_events`].
    pub async fn query_event_messages(
        &self,
        stream_id: &str,
    ) -> Result<Vec<Envelope<A::Event>>, DomainError> {
        self.storage
            .query_by_stream_from_version(A::STATE_KIND, stream_id, 1)
            .await?
            .iter()
            .map(StreamEvent::to_envelope::<A::Event>)
            .collect()
    }
}

impl<A: Aggregate> fmt::Debug for EventStore<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStore")
            .field("state_kind", &A::STATE_KIND)
            .finish_non_exhaustive()
    }
}
