//! Snapshotter: caches the fully folded state of a stream.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use evolog_core::aggregate::Aggregate;
use evolog_core::error::DomainError;
use evolog_core::snapshot::{Snapshot, SnapshotStore};

use crate::rehydrator::StateRehydrator;

/// Takes snapshots of aggregate `A` streams.
pub struct Snapshotter<A: Aggregate> {
    rehydrator: Arc<dyn StateRehydrator<A>>,
    snapshots: Arc<dyn SnapshotStore>,
    _aggregate: PhantomData<fn() -> A>,
}

impl<A: Aggregate> Snapshotter<A> {
    /// Creates a new `Snapshotter`.
    #[must_use]
    pub fn new(rehydrator: Arc<dyn StateRehydrator<A>>, snapshots: Arc<dyn SnapshotStore>) -> Self {
        Self {
            rehydrator,
            snapshots,
            _aggregate: PhantomData,
        }
    }

    /// Rehydrates the stream and stores its state, replacing any earlier
    /// snapshot. Safe to re-run; the last save wins.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::StreamNotFound` if the stream has never been
    /// written, `DomainError::Serialization` if the state cannot be
    /// serialized, or any rehydration or storage error.
    pub async fn take_snapshot(&self, stream_id: &str) -> Result<Snapshot, DomainError> {
        let rehydrated = self
            .rehydrator
            .try_rehydrate_state(stream_id)
            .await?
            .ok_or_else(|| DomainError::StreamNotFound {
                state_kind: A::STATE_KIND.to_owned(),
                stream_id: stream_id.to_owned(),
            })?;
        let state = serde_json::to_value(&rehydrated.state)
            .map_err(|e| DomainError::Serialization(format!("{} state: {e}", A::STATE_KIND)))?;

        let snapshot = Snapshot {
            state_kind: A::STATE_KIND.to_owned(),
            stream_id: stream_id.to_owned(),
            version: rehydrated.version,
            state,
        };
        self.snapshots.save(snapshot.clone()).await?;
        tracing::info!(
            state_kind = A::STATE_KIND,
            stream_id,
            version = snapshot.version,
            "snapshot taken"
        );
        Ok(snapshot)
    }
}

impl<A: Aggregate> fmt::Debug for Snapshotter<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshotter")
            .field("state_kind", &A::STATE_KIND)
            .finish_non_exhaustive()
    }
}
