//! State rehydration: replaying a stream's events through the aggregate's
//! folders, optionally starting from a snapshot.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use evolog_core::aggregate::{Aggregate, DispatchRegistry};
use evolog_core::error::DomainError;
use evolog_core::snapshot::SnapshotStore;
use evolog_event_store::event_store::EventStore;

/// Folded state together with the last version folded into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rehydrated<S> {
    /// The folded state.
    pub state: S,
    /// Last event version applied; 0 for a seed.
    pub version: i64,
}

/// Reconstructs the state of aggregate `A` streams.
#[async_trait]
pub trait StateRehydrator<A: Aggregate>: Send + Sync {
    /// Rehydrates the current state of a stream, or `None` if the stream
    /// has never been written.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::UnhandleableEvent` if a stored event has no
    /// folder, or any storage or decoding error.
    async fn try_rehydrate_state(
        &self,
        stream_id: &str,
    ) -> Result<Option<Rehydrated<A::State>>, DomainError>;

    /// Rehydrates the state as of `version`, inclusive.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::VersionNotReached` if the stream has fewer than
    /// `version` events, `DomainError::Validation` if `version` is below 1,
    /// and otherwise the same errors as `try_rehydrate_state`.
    async fn try_rehydrate_state_at(
        &self,
        stream_id: &str,
        version: i64,
    ) -> Result<Rehydrated<A::State>, DomainError>;
}

fn fold_from<A: Aggregate>(
    registry: &DispatchRegistry<A>,
    base: Rehydrated<A::State>,
    events: &[A::Event],
) -> Result<Rehydrated<A::State>, DomainError> {
    let count = i64::try_from(events.len())
        .map_err(|e| DomainError::Infrastructure(format!("stream too long: {e}")))?;
    let state = events
        .iter()
        .try_fold(base.state, |state, event| registry.fold(state, event))?;
    Ok(Rehydrated {
        state,
        version: base.version + count,
    })
}

fn validate_version(version: i64) -> Result<(), DomainError> {
    if version < 1 {
        return Err(DomainError::Validation(format!(
            "version must be at least 1, got {version}"
        )));
    }
    Ok(())
}

fn ensure_reached(stream_id: &str, requested: i64, latest: i64) -> Result<(), DomainError> {
    if latest < requested {
        return Err(DomainError::VersionNotReached {
            stream_id: stream_id.to_owned(),
            requested,
            latest,
        });
    }
    Ok(())
}

/// Replays streams from version 1 on every call.
pub struct Rehydrator<A: Aggregate> {
    events: Arc<EventStore<A>>,
    registry: Arc<DispatchRegistry<A>>,
}

impl<A: Aggregate> Rehydrator<A> {
    /// Creates a new `Rehydrator`.
    #[must_use]
    pub fn new(events: Arc<EventStore<A>>, registry: Arc<DispatchRegistry<A>>) -> Self {
        Self { events, registry }
    }

    fn seed(stream_id: &str) -> Rehydrated<A::State> {
        Rehydrated {
            state: A::seed(stream_id),
            version: 0,
        }
    }
}

#[async_trait]
impl<A: Aggregate> StateRehydrator<A> for Rehydrator<A> {
    async fn try_rehydrate_state(
        &self,
        stream_id: &str,
    ) -> Result<Option<Rehydrated<A::State>>, DomainError> {
        let events = self.events.query_events(stream_id, 1).await?;
        if events.is_empty() {
            return Ok(None);
        }
        fold_from(&self.registry, Self::seed(stream_id), &events).map(Some)
    }

    async fn try_rehydrate_state_at(
        &self,
        stream_id: &str,
        version: i64,
    ) -> Result<Rehydrated<A::State>, DomainError> {
        validate_version(version)?;
        let events = self
            .events
            .query_events_through(stream_id, 1, version)
            .await?;
        let rehydrated = fold_from(&self.registry, Self::seed(stream_id), &events)?;
        ensure_reached(stream_id, version, rehydrated.version)?;
        Ok(rehydrated)
    }
}

impl<A: Aggregate> fmt::Debug for Rehydrator<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rehydrator")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

/// Starts replay from the stream's snapshot when one is usable.
///
/// Snapshots are a cache: one that no longer deserializes into the state
/// type is logged and ignored, and replay starts from the seed.
pub struct SnapshottedRehydrator<A: Aggregate> {
    events: Arc<EventStore<A>>,
    registry: Arc<DispatchRegistry<A>>,
    snapshots: Arc<dyn SnapshotStore>,
}

impl<A: Aggregate> SnapshottedRehydrator<A> {
    /// Creates a new `SnapshottedRehydrator`.
    #[must_use]
    pub fn new(
        events: Arc<EventStore<A>>,
        registry: Arc<DispatchRegistry<A>>,
        snapshots: Arc<dyn SnapshotStore>,
    ) -> Self {
        Self {
            events,
            registry,
            snapshots,
        }
    }

    async fn load_snapshot(
        &self,
        stream_id: &str,
    ) -> Result<Option<Rehydrated<A::State>>, DomainError> {
        let Some(snapshot) = self.snapshots.load(A::STATE_KIND, stream_id).await? else {
            return Ok(None);
        };
        match serde_json::from_value(snapshot.state) {
            Ok(state) => Ok(Some(Rehydrated {
                state,
                version: snapshot.version,
            })),
            Err(e) => {
                tracing::warn!(
                    state_kind = A::STATE_KIND,
                    stream_id,
                    version = snapshot.version,
                    error = %e,
                    "snapshot does not deserialize; replaying from seed"
                );
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl<A: Aggregate> StateRehydrator<A> for SnapshottedRehydrator<A> {
    async fn try_rehydrate_state(
        &self,
        stream_id: &str,
    ) -> Result<Option<Rehydrated<A::State>>, DomainError> {
        let snapshot = self.load_snapshot(stream_id).await?;
        let from_snapshot = snapshot.is_some();
        let base = snapshot.unwrap_or_else(|| Rehydrator::<A>::seed(stream_id));

        let events = self
            .events
            .query_events(stream_id, base.version + 1)
            .await?;
        if !from_snapshot && events.is_empty() {
            return Ok(None);
        }
        tracing::trace!(
            state_kind = A::STATE_KIND,
            stream_id,
            snapshot_version = base.version,
            replayed = events.len(),
            "rehydrating"
        );
        fold_from(&self.registry, base, &events).map(Some)
    }

    async fn try_rehydrate_state_at(
        &self,
        stream_id: &str,
        version: i64,
    ) -> Result<Rehydrated<A::State>, DomainError> {
        validate_version(version)?;
        let base = self
            .load_snapshot(stream_id)
            .await?
            .filter(|s| s.version <= version)
            .unwrap_or_else(|| Rehydrator::<A>::seed(stream_id));

        let events = self
            .events
            .query_events_through(stream_id, base.version + 1, version)
            .await?;
        let rehydrated = fold_from(&self.registry, base, &events)?;
        ensure_reached(stream_id, version, rehydrated.version)?;
        Ok(rehydrated)
    }
}

impl<A: Aggregate> fmt::Debug for SnapshottedRehydrator<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshottedRehydrator")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
