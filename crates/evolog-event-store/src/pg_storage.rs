//! `PostgreSQL` implementation of the `StorageBackend` trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use evolog_core::error::DomainError;
use evolog_core::event::StreamEvent;
use evolog_core::storage::{StorageBackend, validate_batch};
use evolog_core::ticket::PendingTicket;
use sqlx::postgres::PgRow;
use sqlx::{PgExecutor, PgPool, Row};

use crate::schema::CREATE_EVENT_STORE_TABLES;

const EVENT_COLUMNS: &str = "state_kind, stream_id, version, event_type, payload, raised_at, \
     message_id, process_id, initiator, predecessor_id, transaction_id";

const TICKET_COLUMNS: &str =
    "transaction_id, state_kind, stream_id, start_version, event_count, created_at";

/// PostgreSQL-backed event log and outbox.
#[derive(Debug, Clone)]
pub struct PgStorageBackend {
    pool: PgPool,
}

impl PgStorageBackend {
    /// Creates a new `PgStorageBackend`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Maps a failed write. A unique violation means a concurrent writer
    /// committed first; the conflict reports the version it left behind.
    async fn classify(&self, e: sqlx::Error, ticket: &PendingTicket) -> DomainError {
        match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                match current_version(&self.pool, ticket).await {
                    Ok(actual) => conflict(ticket, actual),
                    Err(e) => infrastructure(e),
                }
            }
            other => infrastructure(other),
        }
    }

    /// Creates the tables if they do not exist yet.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the DDL fails.
    pub async fn ensure_schema(&self) -> Result<(), DomainError> {
        sqlx::raw_sql(CREATE_EVENT_STORE_TABLES)
            .execute(&self.pool)
            .await
            .map_err(infrastructure)?;
        Ok(())
    }
}

async fn current_version<'e, E>(executor: E, ticket: &PendingTicket) -> Result<i64, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    sqlx::query_scalar(
        "SELECT COALESCE(MAX(version), 0) FROM stream_events \
         WHERE state_kind = $1 AND stream_id = $2",
    )
    .bind(&ticket.state_kind)
    .bind(&ticket.stream_id)
    .fetch_one(executor)
    .await
}

fn infrastructure(e: sqlx::Error) -> DomainError {
    DomainError::Infrastructure(e.to_string())
}

fn conflict(ticket: &PendingTicket, actual: i64) -> DomainError {
    DomainError::ConcurrencyConflict {
        state_kind: ticket.state_kind.clone(),
        stream_id: ticket.stream_id.clone(),
        expected: ticket.start_version - 1,
        actual,
    }
}

fn event_from_row(row: &PgRow) -> Result<StreamEvent, sqlx::Error> {
    Ok(StreamEvent {
        state_kind: row.try_get("state_kind")?,
        stream_id: row.try_get("stream_id")?,
        version: row.try_get("version")?,
        event_type: row.try_get("event_type")?,
        payload: row.try_get("payload")?,
        raised_at: row.try_get("raised_at")?,
        message_id: row.try_get("message_id")?,
        process_id: row.try_get("process_id")?,
        initiator: row.try_get("initiator")?,
        predecessor_id: row.try_get("predecessor_id")?,
        transaction_id: row.try_get("transaction_id")?,
    })
}

fn ticket_from_row(row: &PgRow) -> Result<PendingTicket, sqlx::Error> {
    Ok(PendingTicket {
        transaction_id: row.try_get("transaction_id")?,
        state_kind: row.try_get("state_kind")?,
        stream_id: row.try_get("stream_id")?,
        start_version: row.try_get("start_version")?,
        event_count: row.try_get("event_count")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl StorageBackend for PgStorageBackend {
    async fn append_atomic(
        &self,
        events: &[StreamEvent],
        ticket: &PendingTicket,
    ) -> Result<(), DomainError> {
        if events.is_empty() {
            return Ok(());
        }
        validate_batch(events, ticket)?;

        // Dropping `tx` without commit rolls everything back.
        let mut tx = self.pool.begin().await.map_err(infrastructure)?;

        let current = current_version(&mut *tx, ticket)
            .await
            .map_err(infrastructure)?;
        if ticket.start_version != current + 1 {
            return Err(conflict(ticket, current));
        }

        let insert_event = format!(
            "INSERT INTO stream_events ({EVENT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"
        );
        for event in events {
            let inserted = sqlx::query(&insert_event)
                .bind(&event.state_kind)
                .bind(&event.stream_id)
                .bind(event.version)
                .bind(&event.event_type)
                .bind(&event.payload)
                .bind(event.raised_at)
                .bind(event.message_id)
                .bind(event.process_id)
                .bind(&event.initiator)
                .bind(event.predecessor_id)
                .bind(event.transaction_id)
                .execute(&mut *tx)
                .await;
            if let Err(e) = inserted {
                drop(tx);
                return Err(self.classify(e, ticket).await);
            }
        }

        let ticket_inserted = sqlx::query(&format!(
            "INSERT INTO pending_tickets ({TICKET_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6)"
        ))
        .bind(ticket.transaction_id)
        .bind(&ticket.state_kind)
        .bind(&ticket.stream_id)
        .bind(ticket.start_version)
        .bind(ticket.event_count)
        .bind(ticket.created_at)
        .execute(&mut *tx)
        .await;
        if let Err(e) = ticket_inserted {
            drop(tx);
            return Err(self.classify(e, ticket).await);
        }

        match tx.commit().await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.classify(e, ticket).await),
        }
    }

    async fn query_by_stream_from_version(
        &self,
        state_kind: &str,
        stream_id: &str,
        from_version: i64,
    ) -> Result<Vec<StreamEvent>, DomainError> {
        let rows = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM stream_events \
             WHERE state_kind = $1 AND stream_id = $2 AND version >= $3 \
             ORDER BY version ASC"
        ))
        .bind(state_kind)
        .bind(stream_id)
        .bind(from_version)
        .fetch_all(&self.pool)
        .await
        .map_err(infrastructure)?;

        rows.iter()
            .map(event_from_row)
            .collect::<Result<_, _>>()
            .map_err(infrastructure)
    }

    async fn query_event_window(
        &self,
        state_kind: &str,
        stream_id: &str,
        start_version: i64,
        count: i64,
    ) -> Result<Vec<StreamEvent>, DomainError> {
        let rows = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM stream_events \
             WHERE state_kind = $1 AND stream_id = $2 AND version >= $3 AND version < $4 \
             ORDER BY version ASC"
        ))
        .bind(state_kind)
        .bind(stream_id)
        .bind(start_version)
        .bind(start_version.saturating_add(count))
        .fetch_all(&self.pool)
        .await
        .map_err(infrastructure)?;

        rows.iter()
            .map(event_from_row)
            .collect::<Result<_, _>>()
            .map_err(infrastructure)
    }

    async fn query_tickets_older_than(
        &self,
        threshold: DateTime<Utc>,
    ) -> Result<Vec<PendingTicket>, DomainError> {
        let rows = sqlx::query(&format!(
            "SELECT {TICKET_COLUMNS} FROM pending_tickets \
             WHERE created_at <= $1 \
             ORDER BY state_kind, stream_id, start_version"
        ))
        .bind(threshold)
        .fetch_all(&self.pool)
        .await
        .map_err(infrastructure)?;

        rows.iter()
            .map(ticket_from_row)
            .collect::<Result<_, _>>()
            .map_err(infrastructure)
    }

    async fn query_tickets_for(
        &self,
        state_kind: &str,
        stream_id: &str,
    ) -> Result<Vec<PendingTicket>, DomainError> {
        let rows = sqlx::query(&format!(
            "SELECT {TICKET_COLUMNS} FROM pending_tickets \
             WHERE state_kind = $1 AND stream_id = $2 \
             ORDER BY start_version ASC"
        ))
        .bind(state_kind)
        .bind(stream_id)
        .fetch_all(&self.pool)
        .await
        .map_err(infrastructure)?;

        rows.iter()
            .map(ticket_from_row)
            .collect::<Result<_, _>>()
            .map_err(infrastructure)
    }

    async fn delete_ticket(&self, ticket: &PendingTicket) -> Result<bool, DomainError> {
        let result = sqlx::query("DELETE FROM pending_tickets WHERE transaction_id = $1")
            .bind(ticket.transaction_id)
            .execute(&self.pool)
            .await
            .map_err(infrastructure)?;
        Ok(result.rows_affected() > 0)
    }
}
