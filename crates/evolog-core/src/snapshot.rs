//! Snapshot model and store contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DomainError;

/// Folded state of a stream as of `version`. A pure cache: it can always be
/// rebuilt from the event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// State kind of the stream.
    pub state_kind: String,
    /// Stream identifier.
    pub stream_id: String,
    /// Last event version folded into `state`.
    pub version: i64,
    /// Serialized folded state.
    pub state: Value,
}

/// Persistence for snapshots. The last save for a stream wins.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Loads the snapshot for a stream, if one was taken.
    async fn load(&self, state_kind: &str, stream_id: &str)
    -> Result<Option<Snapshot>, DomainError>;

    /// Stores a snapshot, replacing any previous one for the stream.
    async fn save(&self, snapshot: Snapshot) -> Result<(), DomainError>;
}
