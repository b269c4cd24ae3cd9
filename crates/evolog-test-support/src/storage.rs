//! Test storage — a `StorageBackend` whose every call fails.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use evolog_core::error::DomainError;
use evolog_core::event::StreamEvent;
use evolog_core::storage::StorageBackend;
use evolog_core::ticket::PendingTicket;

fn refused() -> DomainError {
    DomainError::Infrastructure("connection refused".into())
}

/// A storage backend that always returns an infrastructure error. Useful for
/// testing that durability failures are surfaced.
#[derive(Debug)]
pub struct FailingStorageBackend;

#[async_trait]
impl StorageBackend for FailingStorageBackend {
    async fn append_atomic(
        &self,
        _events: &[StreamEvent],
        _ticket: &PendingTicket,
    ) -> Result<(), DomainError> {
        Err(refused())
    }

    async fn query_by_stream_from_version(
        &self,
        _state_kind: &str,
        _stream_id: &str,
        _from_version: i64,
    ) -> Result<Vec<StreamEvent>, DomainError> {
        Err(refused())
    }

    async fn query_event_window(
        &self,
        _state_kind: &str,
        _stream_id: &str,
        _start_version: i64,
        _count: i64,
    ) -> Result<Vec<StreamEvent>, DomainError> {
        Err(refused())
    }

    async fn query_tickets_older_than(
        &self,
        _threshold: DateTime<Utc>,
    ) -> Result<Vec<PendingTicket>, DomainError> {
        Err(refused())
    }

    async fn query_tickets_for(
        &self,
        _state_kind: &str,
        _stream_id: &str,
    ) -> Result<Vec<PendingTicket>, DomainError> {
        Err(refused())
    }

    async fn delete_ticket(&self, _ticket: &PendingTicket) -> Result<bool, DomainError> {
        Err(refused())
    }
}
