//! Per-key FIFO task queues with a concurrency of one.
//!
//! Each key gets its own lane backed by a single-permit [`Semaphore`].
//! Tokio semaphores hand out permits in request order, so tasks queued on
//! the same key run one at a time in the order they arrived, while tasks on
//! different keys run independently.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::Semaphore;

/// A set of serial lanes keyed by name.
#[derive(Default)]
pub struct SerialQueue {
    lanes: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl SerialQueue {
    /// Create an empty queue set.
    pub fn new() -> Self {
        Self::default()
    }

    fn lane(&self, key: &str) -> Arc<Semaphore> {
        let mut lanes = self.lanes.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            lanes
                .entry(key.to_owned())
                .or_insert_with(|| Arc::new(Semaphore::new(1))),
        )
    }

    /// Run `task` once every task queued earlier on `key` has finished.
    ///
    /// The lane is released when the task completes or when the returned
    /// future is dropped.
    pub async fn run<F, Fut, T>(&self, key: &str, task: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let lane = self.lane(key);
        // Lanes are never closed, so acquisition only fails if that changes.
        let _permit = lane.acquire().await.ok();
        task().await
    }

    /// Number of lanes created so far.
    pub fn lane_count(&self) -> usize {
        self.lanes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl core::fmt::Debug for SerialQueue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SerialQueue")
            .field("lanes", &self.lane_count())
            .finish()
    }
}
