use super::queue::QueueStore;
use super::types::QueueError;

use async_trait::async_trait;
use serde_json::Value;
use std::fmt::Display;
use std::sync::Arc;

/// Consumes items delivered by a `TaskQueue`.
///
/// Implementations must be safe to call concurrently: every worker slot of a
/// queue shares one processor.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Handles one delivered item.
    ///
    /// The item has its queue bookkeeping fields removed. Completing the `job`
    /// (resolve or reject) is the processor's responsibility; a job dropped
    /// without completion keeps its lease until it expires.
    async fn process(&self, item: Value, job: Job);
}

/// Continuation handle for one delivery of one queue item.
///
/// `resolve` and `reject` consume the handle, so each delivery completes at
/// most once.
pub struct Job {
    queue: Arc<QueueStore>,
    key: String,
    owner: String,
}

impl Job {
    pub(crate) fn new(queue: Arc<QueueStore>, key: String, owner: String) -> Self {
        Self { queue, key, owner }
    }

    /// The item's key under the tasks path.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The lease owner this delivery runs under.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Publishes a progress value on the item.
    pub async fn progress(&self, value: Value) -> Result<(), QueueError> {
        self.queue.set_progress(&self.key, &self.owner, value).await
    }

    /// Retires the item.
    pub async fn resolve(self) -> Result<(), QueueError> {
        self.queue.resolve(&self.key, &self.owner).await
    }

    /// Reports a failed attempt; the queue decides whether to retry.
    pub async fn reject(self, error: impl Display + Send) -> Result<(), QueueError> {
        let error = error.to_string();
        self.queue.reject(&self.key, &self.owner, &error).await
    }
}
