use std::future::Future;

use tokio::task::JoinSet;
use tracing::debug;

use crate::error::{StoreError, StoreResult};

/// Default cap on concurrently running operations.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 10_000;

/// Bounds how many spawned operations run at once.
///
/// [`admit`](Self::admit) spawns an operation, first waiting for an earlier
/// one to finish if the limit has been reached. This is the only
/// backpressure between a fast producer (the archive decoder) and slow
/// consumers (store writes).
pub struct AdmissionLimiter<T> {
    limit: usize,
    tasks: JoinSet<T>,
}

impl<T: Send + 'static> AdmissionLimiter<T> {
    /// A limit of zero is treated as one.
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            tasks: JoinSet::new(),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Operations registered and not yet collected.
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Spawn `op`. When the limit is reached, waits for one earlier operation
    /// to finish first and returns its output.
    pub async fn admit<F>(&mut self, op: F) -> StoreResult<Option<T>>
    where
        F: Future<Output = T> + Send + 'static,
    {
        let mut finished = None;
        if self.tasks.len() >= self.limit {
            if let Some(result) = self.tasks.join_next().await {
                finished = Some(result?);
            }
        }
        self.tasks.spawn(op);
        Ok(finished)
    }

    /// Wait for every registered operation and return their outputs in
    /// completion order. Every operation is waited for even if one failed;
    /// the first failure is returned.
    pub async fn drain(&mut self) -> StoreResult<Vec<T>> {
        let mut outputs = Vec::with_capacity(self.tasks.len());
        let mut first_err: Option<StoreError> = None;
        while let Some(result) = self.tasks.join_next().await {
            match result {
                Ok(output) => outputs.push(output),
                Err(e) => {
                    first_err.get_or_insert(e.into());
                }
            }
        }
        debug!(completed = outputs.len(), "drained limiter");
        first_err.map_or(Ok(outputs), Err)
    }
}

impl<T: Send + 'static> Default for AdmissionLimiter<T> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IN_FLIGHT)
    }
}
