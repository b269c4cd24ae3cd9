//! Evolog Aggregate — turning event streams back into state, and commands
//! into new events.
//!
//! The [`rehydrator`] module folds a stream (optionally starting from a
//! snapshot) into its current state, the [`snapshotter`] caches that state,
//! and the [`host`] runs the full command cycle for one aggregate kind.

pub mod host;
pub mod rehydrator;
pub mod snapshotter;
