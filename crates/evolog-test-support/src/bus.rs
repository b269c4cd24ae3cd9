//! Test bus — a `MessageBus` that records batches and can be told to fail.

use std::sync::Mutex;

use async_trait::async_trait;
use evolog_core::bus::MessageBus;
use evolog_core::error::DomainError;

/// A message bus that records every accepted batch with its partition key.
/// Rejected sends are counted as attempts but not recorded.
#[derive(Debug)]
pub struct RecordingBus<M> {
    batches: Mutex<Vec<(String, Vec<M>)>>,
    failures_left: Mutex<usize>,
    attempts: Mutex<usize>,
}

impl<M: Clone> RecordingBus<M> {
    /// Creates a bus that accepts every batch.
    #[must_use]
    pub fn new() -> Self {
        Self::failing_times(0)
    }

    /// Creates a bus that rejects the first `failures` sends.
    #[must_use]
    pub fn failing_times(failures: usize) -> Self {
        Self {
            batches: Mutex::new(Vec::new()),
            failures_left: Mutex::new(failures),
            attempts: Mutex::new(0),
        }
    }

    /// Returns a copy of every accepted batch, oldest first.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn batches(&self) -> Vec<(String, Vec<M>)> {
        self.batches.lock().unwrap().clone()
    }

    /// Returns the number of sends attempted, accepted or not.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }
}

impl<M: Clone> Default for RecordingBus<M> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<M> MessageBus<M> for RecordingBus<M>
where
    M: Clone + Send + Sync + 'static,
{
    async fn send(&self, batch: Vec<M>, partition_key: &str) -> Result<(), DomainError> {
        *self.attempts.lock().unwrap() += 1;
        {
            let mut failures_left = self.failures_left.lock().unwrap();
            if *failures_left > 0 {
                *failures_left -= 1;
                return Err(DomainError::Infrastructure("bus unavailable".into()));
            }
        }
        self.batches
            .lock()
            .unwrap()
            .push((partition_key.to_owned(), batch));
        Ok(())
    }
}
