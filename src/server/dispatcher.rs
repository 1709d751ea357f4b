//! Task Dispatcher
//!
//! Processes one delivered queue item:
//!
//! ```text
//! Received -> LivenessCheck1 -> Executing -> LivenessCheck2 -> Writing -> Done
//!    |              |                              |
//!    | no `task`    | client gone                  | client gone
//!    v              v                              v
//!  Done (ack)     Done (ack, nothing ran)        Done (ack, result dropped)
//! ```
//!
//! Store failures at either liveness check or at the write reject the item so
//! the queue applies its retry policy. Handler failures are not dispatch
//! failures: they become the `error` of the result envelope.
//!
//! A dispatcher keeps no per-item state, so one instance serves every worker.

use super::registry::HandlerRegistry;
use crate::error::RpcError;
use crate::presence::tracker::PresenceTracker;
use crate::protocol::{ResultEnvelope, Task};
use crate::queue::job::{Job, Processor};
use crate::store::path::Namespace;
use crate::store::types::SharedStore;

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Where in the state machine a vanished client was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStage {
    BeforeExecution,
    AfterExecution,
}

/// How a delivered item was retired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The item was not a task; acknowledged and dropped.
    Malformed,
    /// The submitting client was gone; no result was written.
    ClientGone(DispatchStage),
    /// A result envelope was appended under this key.
    Delivered { result_key: String },
}

#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn SharedStore>,
    namespace: Namespace,
    presence: PresenceTracker,
    registry: Arc<HandlerRegistry>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn SharedStore>,
        namespace: Namespace,
        registry: Arc<HandlerRegistry>,
    ) -> Self {
        Self {
            presence: PresenceTracker::new(store.clone(), namespace.clone()),
            store,
            namespace,
            registry,
        }
    }

    /// Runs the dispatch state machine for one item.
    ///
    /// `Ok` means the item should be resolved; `Err` means it should be
    /// rejected.
    pub async fn dispatch(&self, item: &Value) -> Result<DispatchOutcome, RpcError> {
        if item.get("task").is_none() {
            tracing::debug!("Acknowledging queue item without a task");
            return Ok(DispatchOutcome::Malformed);
        }

        let task: Task = match serde_json::from_value(item.clone()) {
            Ok(task) => task,
            Err(e) => {
                tracing::warn!("Acknowledging malformed task: {}", e);
                return Ok(DispatchOutcome::Malformed);
            }
        };

        // Skip running the task if the client disconnected.
        if !self.presence.is_connected(&task.client).await? {
            tracing::info!(
                "Client {} gone before task {} ({}) ran, skipping",
                task.client,
                task.key,
                task.task
            );
            return Ok(DispatchOutcome::ClientGone(DispatchStage::BeforeExecution));
        }

        let outcome = self.registry.invoke(&task.task, task.data.clone()).await;

        // Skip writing the result if the client disconnected meanwhile.
        if !self.presence.is_connected(&task.client).await? {
            tracing::info!(
                "Client {} gone while task {} ({}) ran, dropping result",
                task.client,
                task.key,
                task.task
            );
            return Ok(DispatchOutcome::ClientGone(DispatchStage::AfterExecution));
        }

        let envelope = match &outcome {
            Ok(data) => ResultEnvelope::success(&task, data.clone()),
            Err(e) => {
                tracing::debug!("Task {} ({}) failed: {}", task.key, task.task, e);
                ResultEnvelope::failure(&task, e)
            }
        };

        let result_key = self
            .store
            .push(&self.namespace.results(&task.client), envelope.to_record()?)
            .await?;

        tracing::debug!(
            "Wrote result {} for task {} to client {}",
            result_key,
            task.key,
            task.client
        );

        Ok(DispatchOutcome::Delivered { result_key })
    }
}

#[async_trait]
impl Processor for Dispatcher {
    async fn process(&self, item: Value, job: Job) {
        let key = job.key().to_string();
        let completion = match self.dispatch(&item).await {
            Ok(_) => job.resolve().await,
            Err(e) => {
                tracing::warn!("Rejecting queue item {}: {}", key, e);
                job.reject(e).await
            }
        };

        if let Err(e) = completion {
            tracing::error!("Failed to complete queue item {}: {}", key, e);
        }
    }
}
