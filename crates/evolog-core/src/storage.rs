//! Storage backend contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DomainError;
use crate::event::StreamEvent;
use crate::ticket::PendingTicket;

/// The minimal storage surface the outbox algorithm needs. Table stores,
/// relational stores and in-memory maps are interchangeable behind it.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Durably writes a batch of events together with the ticket covering
    /// them, or nothing at all.
    ///
    /// The batch must belong to a single stream and start at the stream's
    /// current version + 1. A batch that does not match its ticket fails
    /// [`validate_batch`]; any collision or gap fails with
    /// `DomainError::ConcurrencyConflict`. Either way storage is unchanged.
    async fn append_atomic(
        &self,
        events: &[StreamEvent],
        ticket: &PendingTicket,
    ) -> Result<(), DomainError>;

    /// Loads a stream's events with `version >= from_version`, ascending.
    async fn query_by_stream_from_version(
        &self,
        state_kind: &str,
        stream_id: &str,
        from_version: i64,
    ) -> Result<Vec<StreamEvent>, DomainError>;

    /// Loads at most `count` events starting at `start_version`, ascending.
    async fn query_event_window(
        &self,
        state_kind: &str,
        stream_id: &str,
        start_version: i64,
        count: i64,
    ) -> Result<Vec<StreamEvent>, DomainError>;

    /// Loads every ticket with `created_at <= threshold`, across all streams.
    async fn query_tickets_older_than(
        &self,
        threshold: DateTime<Utc>,
    ) -> Result<Vec<PendingTicket>, DomainError>;

    /// Loads the tickets of one stream, ordered by `start_version`.
    async fn query_tickets_for(
        &self,
        state_kind: &str,
        stream_id: &str,
    ) -> Result<Vec<PendingTicket>, DomainError>;

    /// Deletes a ticket. Returns `false` if it was already gone.
    async fn delete_ticket(&self, ticket: &PendingTicket) -> Result<bool, DomainError>;
}

/// Checks that a batch is exactly what its ticket describes: `event_count`
/// events of the ticket's stream, numbered from `start_version` without
/// gaps, all written by the ticket's transaction.
///
/// Every backend runs this before touching storage.
///
/// # Errors
///
/// Returns `DomainError::Validation` naming the first mismatch.
pub fn validate_batch(events: &[StreamEvent], ticket: &PendingTicket) -> Result<(), DomainError> {
    if i64::try_from(events.len()).ok() != Some(ticket.event_count) {
        return Err(DomainError::Validation(format!(
            "ticket covers {} events but the batch has {}",
            ticket.event_count,
            events.len()
        )));
    }
    for (idx, (event, version)) in events.iter().zip(ticket.start_version..).enumerate() {
        if event.state_kind != ticket.state_kind || event.stream_id != ticket.stream_id {
            return Err(DomainError::Validation(format!(
                "batch mixes streams (index {idx})"
            )));
        }
        if event.version != version {
            return Err(DomainError::Validation(format!(
                "batch versions are not contiguous (index {idx})"
            )));
        }
        if event.transaction_id != ticket.transaction_id {
            return Err(DomainError::Validation(format!(
                "event does not belong to the ticket's transaction (index {idx})"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;
    use uuid::Uuid;

    use super::*;

    fn batch(start_version: i64, count: i64) -> (Vec<StreamEvent>, PendingTicket) {
        let raised_at = Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap();
        let transaction_id = Uuid::now_v7();
        let events = (start_version..start_version + count)
            .map(|version| StreamEvent {
                state_kind: "Account".into(),
                stream_id: "acc-1".into(),
                version,
                event_type: "Account.Deposited".into(),
                payload: json!({"amount": version}),
                raised_at,
                message_id: Uuid::now_v7(),
                process_id: Uuid::now_v7(),
                initiator: None,
                predecessor_id: None,
                transaction_id,
            })
            .collect();
        let ticket = PendingTicket {
            state_kind: "Account".into(),
            stream_id: "acc-1".into(),
            start_version,
            event_count: count,
            transaction_id,
            created_at: raised_at,
        };
        (events, ticket)
    }

    #[test]
    fn test_matching_batch_is_valid() {
        let (events, ticket) = batch(3, 2);

        assert!(validate_batch(&events, &ticket).is_ok());
    }

    #[test]
    fn test_count_mismatch_is_rejected() {
        let (events, mut ticket) = batch(1, 2);
        ticket.event_count = 3;

        let result = validate_batch(&events, &ticket);

        assert!(matches!(result, Err(DomainError::Validation(_))));
    }

    #[test]
    fn test_event_from_another_stream_is_rejected() {
        let (mut events, ticket) = batch(1, 2);
        events[1].stream_id = "acc-2".into();

        let result = validate_batch(&events, &ticket);

        assert!(matches!(result, Err(DomainError::Validation(_))));
    }

    #[test]
    fn test_version_gap_is_rejected() {
        let (mut events, ticket) = batch(1, 2);
        events[1].version = 3;

        let result = validate_batch(&events, &ticket);

        assert!(matches!(result, Err(DomainError::Validation(_))));
    }

    #[test]
    fn test_foreign_transaction_is_rejected() {
        let (mut events, ticket) = batch(1, 2);
        events[0].transaction_id = Uuid::now_v7();

        let result = validate_batch(&events, &ticket);

        assert!(matches!(result, Err(DomainError::Validation(_))));
    }
}
