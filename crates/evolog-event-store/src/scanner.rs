//! Pending-event scanner: the reconciliation loop behind the outbox.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use chrono::TimeDelta;
use evolog_core::bus::MessageBus;
use evolog_core::clock::Clock;
use evolog_core::error::DomainError;
use evolog_core::message::{CommandMessage, Envelope};
use evolog_core::payload::Payload;
use evolog_core::storage::StorageBackend;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::config::{ConfigError, ScannerConfig};
use crate::publisher::FlushEvents;

/// Initiator recorded on the flush commands the scanner emits.
pub const SCANNER_INITIATOR: &str = "pending-event-scanner";

/// Finds streams with stale outbox tickets and asks for them to be flushed.
///
/// Safe to run concurrently with itself and with appends: each sweep
/// flushes a stream at most once, and the publisher tolerates a ticket
/// disappearing underneath it.
pub struct PendingEventScanner {
    storage: Arc<dyn StorageBackend>,
    commands: Arc<dyn MessageBus<CommandMessage>>,
    clock: Arc<dyn Clock>,
    config: ScannerConfig,
    minimum_pending_time: TimeDelta,
}

impl PendingEventScanner {
    /// Creates a scanner that emits flush commands on `commands`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the configuration is invalid.
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        commands: Arc<dyn MessageBus<CommandMessage>>,
        clock: Arc<dyn Clock>,
        config: ScannerConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let minimum_pending_time = TimeDelta::from_std(config.minimum_pending_time)
            .map_err(|e| ConfigError::Invalid(format!("minimum pending time: {e}")))?;
        Ok(Self {
            storage,
            commands,
            clock,
            config,
            minimum_pending_time,
        })
    }

    /// Runs one sweep.
    ///
    /// Groups every ticket at least `minimum_pending_time` old by
    /// `(state_kind, stream_id)` and emits one `FlushEvents` per group, each
    /// with a fresh causal chain. A command the bus refuses is logged and
    /// skipped; its tickets are still there for the next sweep. Returns the
    /// commands that were emitted.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the tickets cannot be listed.
    pub async fn scan_pending_events(&self) -> Result<Vec<FlushEvents>, DomainError> {
        let now = self.clock.now();
        let threshold = now
            .checked_sub_signed(self.minimum_pending_time)
            .ok_or_else(|| {
                DomainError::Validation("minimum pending time reaches before the epoch".to_owned())
            })?;

        let tickets = self.storage.query_tickets_older_than(threshold).await?;
        let ticket_count = tickets.len();
        let streams: BTreeSet<(String, String)> = tickets
            .into_iter()
            .map(|t| (t.state_kind, t.stream_id))
            .collect();

        let mut emitted = Vec::with_capacity(streams.len());
        for (state_kind, stream_id) in streams {
            let flush = FlushEvents {
                state_kind,
                stream_id,
            };
            let message = Envelope::originate(flush.encode()?, Some(SCANNER_INITIATOR.to_owned()));
            match self.commands.send(vec![message], &flush.stream_id).await {
                Ok(()) => emitted.push(flush),
                Err(e) => tracing::warn!(
                    state_kind = %flush.state_kind,
                    stream_id = %flush.stream_id,
                    error = %e,
                    "could not emit flush command"
                ),
            }
        }

        tracing::info!(
            pending_tickets = ticket_count,
            flushed_streams = emitted.len(),
            "pending event scan complete"
        );
        Ok(emitted)
    }

    /// Sweeps every `scan_interval` until `shutdown` turns `true` or its
    /// sender is dropped. A failed sweep is logged and the loop carries on.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.scan_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.scan_pending_events().await {
                        tracing::error!(error = %e, "pending event scan failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        tracing::info!("pending event scanner stopped");
    }
}

impl fmt::Debug for PendingEventScanner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingEventScanner")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
