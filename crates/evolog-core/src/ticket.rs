//! Outbox tickets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Durable marker for one append transaction whose events have not yet been
/// confirmed published.
///
/// Written atomically with the events it covers and deleted only after
/// exactly that window has been sent to the bus as one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTicket {
    /// State kind of the stream.
    pub state_kind: String,
    /// Stream identifier.
    pub stream_id: String,
    /// First version covered by the ticket.
    pub start_version: i64,
    /// Number of events covered.
    pub event_count: i64,
    /// The append transaction, unique per ticket.
    pub transaction_id: Uuid,
    /// When the ticket was written.
    pub created_at: DateTime<Utc>,
}

impl PendingTicket {
    /// Last version covered by the ticket.
    #[must_use]
    pub fn end_version(&self) -> i64 {
        self.start_version + self.event_count - 1
    }
}
