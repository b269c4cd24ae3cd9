//! Evolog Core — event log data model and collaborator contracts.
//!
//! This crate defines the stored shapes (stream events, outbox tickets,
//! snapshots, envelopes), the payload type registry, the aggregate dispatch
//! registry and the traits that storage, bus and snapshot backends implement.
//! It contains no infrastructure code.

pub mod aggregate;
pub mod bus;
pub mod clock;
pub mod error;
pub mod event;
pub mod handler;
pub mod message;
pub mod payload;
pub mod snapshot;
pub mod storage;
pub mod ticket;
