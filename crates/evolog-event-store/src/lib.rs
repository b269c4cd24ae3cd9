//! Evolog event store — durable appends with a transactional outbox.
//!
//! Appends write the events and a pending-publish ticket in one durable
//! step, then try to publish. Tickets whose publish failed are picked up
//! by the [`scanner::PendingEventScanner`], which asks the
//! [`publisher::OutboxPublisher`] to resend them.

pub mod config;
pub mod event_store;
pub mod in_memory;
pub mod pg_storage;
pub mod publisher;
pub mod scanner;
pub mod schema;
pub mod telemetry;
