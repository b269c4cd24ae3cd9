//! In-memory storage and snapshot backends.
//!
//! Intended for tests and single-process hosts. Every operation holds one
//! lock for its whole duration, so appends are all-or-nothing.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use evolog_core::error::DomainError;
use evolog_core::event::StreamEvent;
use evolog_core::snapshot::{Snapshot, SnapshotStore};
use evolog_core::storage::{StorageBackend, validate_batch};
use evolog_core::ticket::PendingTicket;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct StreamKey {
    state_kind: String,
    stream_id: String,
}

impl StreamKey {
    fn new(state_kind: &str, stream_id: &str) -> Self {
        Self {
            state_kind: state_kind.to_owned(),
            stream_id: stream_id.to_owned(),
        }
    }
}

#[derive(Debug, Default)]
struct Tables {
    streams: HashMap<StreamKey, Vec<StreamEvent>>,
    tickets: HashMap<Uuid, PendingTicket>,
}

fn poisoned() -> DomainError {
    DomainError::Infrastructure("lock poisoned".to_owned())
}

/// In-memory event log and outbox.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    tables: RwLock<Tables>,
}

impl InMemoryStorage {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn current_version(stream: &[StreamEvent]) -> i64 {
        stream.last().map_or(0, |e| e.version)
    }
}

#[async_trait]
impl StorageBackend for InMemoryStorage {
    async fn append_atomic(
        &self,
        events: &[StreamEvent],
        ticket: &PendingTicket,
    ) -> Result<(), DomainError> {
        if events.is_empty() {
            return Ok(());
        }
        validate_batch(events, ticket)?;

        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        if tables.tickets.contains_key(&ticket.transaction_id) {
            return Err(DomainError::Infrastructure(format!(
                "transaction {} was already appended",
                ticket.transaction_id
            )));
        }

        let key = StreamKey::new(&ticket.state_kind, &ticket.stream_id);
        let stream = tables.streams.entry(key).or_default();
        let current = Self::current_version(stream);
        if ticket.start_version != current + 1 {
            return Err(DomainError::ConcurrencyConflict {
                state_kind: ticket.state_kind.clone(),
                stream_id: ticket.stream_id.clone(),
                expected: ticket.start_version - 1,
                actual: current,
            });
        }

        stream.extend_from_slice(events);
        tables
            .tickets
            .insert(ticket.transaction_id, ticket.clone());
        Ok(())
    }

    async fn query_by_stream_from_version(
        &self,
        state_kind: &str,
        stream_id: &str,
        from_version: i64,
    ) -> Result<Vec<StreamEvent>, DomainError> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        Ok(tables
            .streams
            .get(&StreamKey::new(state_kind, stream_id))
            .map(|stream| {
                stream
                    .iter()
                    .filter(|e| e.version >= from_version)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn query_event_window(
        &self,
        state_kind: &str,
        stream_id: &str,
        start_version: i64,
        count: i64,
    ) -> Result<Vec<StreamEvent>, DomainError> {
        let end = start_version.saturating_add(count);
        let tables = self.tables.read().map_err(|_| poisoned())?;
        Ok(tables
            .streams
            .get(&StreamKey::new(state_kind, stream_id))
            .map(|stream| {
                stream
                    .iter()
                    .filter(|e| e.version >= start_version && e.version < end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn query_tickets_older_than(
        &self,
        threshold: DateTime<Utc>,
    ) -> Result<Vec<PendingTicket>, DomainError> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        let mut tickets: Vec<PendingTicket> = tables
            .tickets
            .values()
            .filter(|t| t.created_at <= threshold)
            .cloned()
            .collect();
        tickets.sort_by(|a, b| {
            (&a.state_kind, &a.stream_id, a.start_version).cmp(&(
                &b.state_kind,
                &b.stream_id,
                b.start_version,
            ))
        });
        Ok(tickets)
    }

    async fn query_tickets_for(
        &self,
        state_kind: &str,
        stream_id: &str,
    ) -> Result<Vec<PendingTicket>, DomainError> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        let mut tickets: Vec<PendingTicket> = tables
            .tickets
            .values()
            .filter(|t| t.state_kind == state_kind && t.stream_id == stream_id)
            .cloned()
            .collect();
        tickets.sort_by_key(|t| t.start_version);
        Ok(tickets)
    }

    async fn delete_ticket(&self, ticket: &PendingTicket) -> Result<bool, DomainError> {
        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        Ok(tables.tickets.remove(&ticket.transaction_id).is_some())
    }
}

/// In-memory snapshot store.
#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    snapshots: RwLock<HashMap<StreamKey, Snapshot>>,
}

impl InMemorySnapshotStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn load(
        &self,
        state_kind: &str,
        stream_id: &str,
    ) -> Result<Option<Snapshot>, DomainError> {
        let snapshots = self.snapshots.read().map_err(|_| poisoned())?;
        Ok(snapshots
            .get(&StreamKey::new(state_kind, stream_id))
            .cloned())
    }

    async fn save(&self, snapshot: Snapshot) -> Result<(), DomainError> {
        let key = StreamKey::new(&snapshot.state_kind, &snapshot.stream_id);
        let mut snapshots = self.snapshots.write().map_err(|_| poisoned())?;
        snapshots.insert(key, snapshot);
        Ok(())
    }
}
