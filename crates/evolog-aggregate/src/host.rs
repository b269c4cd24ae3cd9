//! Aggregate host: runs commands for one aggregate kind.
//!
//! A command goes through rehydrate → produce → self-consistency check →
//! append. The check runs on every command: any event a producer returns
//! must have a folder, or the command fails before anything is written.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use evolog_core::aggregate::{Aggregate, DispatchRegistry};
use evolog_core::error::DomainError;
use evolog_core::handler::CommandHandler;
use evolog_core::message::{Causation, CommandMessage};
use evolog_core::payload::{Payload, resolve_name};
use evolog_event_store::event_store::EventStore;

use crate::rehydrator::{Rehydrated, StateRehydrator};

/// Executes the commands bound in aggregate `A`'s registry.
pub struct AggregateHost<A: Aggregate> {
    registry: Arc<DispatchRegistry<A>>,
    rehydrator: Arc<dyn StateRehydrator<A>>,
    events: Arc<EventStore<A>>,
}

impl<A: Aggregate> AggregateHost<A> {
    /// Creates a new `AggregateHost`.
    #[must_use]
    pub fn new(
        registry: Arc<DispatchRegistry<A>>,
        rehydrator: Arc<dyn StateRehydrator<A>>,
        events: Arc<EventStore<A>>,
    ) -> Self {
        Self {
            registry,
            rehydrator,
            events,
        }
    }

    /// Runs one command and returns the number of events appended.
    ///
    /// A stream that has never been written is handled from its seed at
    /// version 0. The appended events continue the message's process and
    /// name it as their predecessor.
    ///
    /// # Errors
    ///
    /// - `DomainError::UnresolvableType` if the payload is not one of `A`'s
    ///   commands.
    /// - `DomainError::UnhandleableCommand` if no producer is bound.
    /// - `DomainError::UnhandleableEvent` if the producer returned an event
    ///   this aggregate cannot fold; nothing is appended.
    /// - `DomainError::Rejected` or any other error from the producer.
    /// - Any error from [`EventStore::collect_events`]; on
    ///   `TransientPublishFailure` the events are already stored.
    pub async fn execute(&self, message: &CommandMessage) -> Result<usize, DomainError> {
        let command = A::Command::decode(&message.payload)?;
        let command_type = command.type_name();
        if !self.registry.handles_command(command_type) {
            return Err(DomainError::UnhandleableCommand(command_type.to_owned()));
        }
        let stream_id = A::target_stream(&command);

        let current = self
            .rehydrator
            .try_rehydrate_state(&stream_id)
            .await?
            .unwrap_or_else(|| Rehydrated {
                state: A::seed(&stream_id),
                version: 0,
            });

        let events = self.registry.produce(&current.state, &command)?;
        if events.is_empty() {
            tracing::debug!(
                state_kind = A::STATE_KIND,
                stream_id = %stream_id,
                command_type,
                "command produced no events"
            );
            return Ok(0);
        }
        self.registry.ensure_foldable(&events)?;

        self.events
            .collect_events(
                &Causation::caused_by(message),
                &stream_id,
                current.version + 1,
                &events,
            )
            .await?;
        tracing::info!(
            state_kind = A::STATE_KIND,
            stream_id = %stream_id,
            command_type,
            version = current.version + 1,
            event_count = events.len(),
            "command executed"
        );
        Ok(events.len())
    }
}

#[async_trait]
impl<A: Aggregate> CommandHandler for AggregateHost<A> {
    fn can_handle(&self, message: &CommandMessage) -> bool {
        resolve_name::<A::Command>(&message.payload.type_name)
            .is_ok_and(|name| self.registry.handles_command(name))
    }

    async fn handle(&self, message: &CommandMessage) -> Result<(), DomainError> {
        self.execute(message).await.map(|_| ())
    }
}

impl<A: Aggregate> fmt::Debug for AggregateHost<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateHost")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
