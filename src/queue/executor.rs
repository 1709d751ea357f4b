//! Worker Pool Implementation
//!
//! Drives delivery of queue items to a `Processor`. Each worker runs
//! independently: it scans for claimable items, claims one, and hands it to
//! the processor while a sidecar task keeps the lease alive.
//!
//! ## Responsibilities
//! - **Wake-up**: A child-added subscription on the tasks path wakes idle
//!   workers as soon as an item lands; a poll interval covers expired leases.
//! - **Lease Management**: Renews the claim every third of the lease while
//!   the processor runs.
//! - **Shutdown**: Workers stop after their current item.

use super::job::{Job, Processor};
use super::queue::QueueStore;
use super::types::*;
use crate::store::types::{SharedStore, StoreError, SubscriptionId};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

struct QueueShared {
    queue: Arc<QueueStore>,
    processor: Arc<dyn Processor>,
    /// Prefix of every lease owner name issued by this instance.
    instance_id: String,
    claims: AtomicU64,
    wake: Notify,
    stopping: AtomicBool,
}

/// A running queue consumer.
pub struct TaskQueue {
    shared: Arc<QueueShared>,
    subscription: SubscriptionId,
    watcher: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
}

impl TaskQueue {
    /// Starts consuming `tasks_path` with `options.num_workers` workers.
    pub async fn start(
        store: Arc<dyn SharedStore>,
        tasks_path: &str,
        options: QueueOptions,
        processor: Arc<dyn Processor>,
    ) -> Result<Self, StoreError> {
        let subscription = store.subscribe_child_added(tasks_path)?;
        let worker_count = options.num_workers.max(1);

        let shared = Arc::new(QueueShared {
            queue: Arc::new(QueueStore::new(store, tasks_path, options)),
            processor,
            instance_id: uuid::Uuid::new_v4().to_string(),
            claims: AtomicU64::new(0),
            wake: Notify::new(),
            stopping: AtomicBool::new(false),
        });

        let subscription_id = subscription.id;
        let watcher = {
            let shared = shared.clone();
            let mut events = subscription.events;
            tokio::spawn(async move {
                while events.recv().await.is_some() {
                    shared.wake.notify_one();
                }
                tracing::debug!("Queue subscription closed");
            })
        };

        tracing::info!("Starting {} queue workers on {}", worker_count, tasks_path);

        let workers = (0..worker_count)
            .map(|worker_id| {
                let shared = shared.clone();
                tokio::spawn(async move {
                    shared.worker_loop(worker_id).await;
                })
            })
            .collect();

        Ok(Self {
            shared,
            subscription: subscription_id,
            watcher,
            workers,
        })
    }

    pub fn options(&self) -> &QueueOptions {
        self.shared.queue.options()
    }

    /// Counts the items currently under the tasks path by state.
    pub async fn counts(&self) -> Result<QueueCounts, StoreError> {
        self.shared.queue.counts().await
    }

    /// Stops accepting new items and waits for in-flight items to finish.
    pub async fn shutdown(self) {
        self.shared.stopping.store(true, Ordering::SeqCst);
        self.shared.queue.store().unsubscribe(self.subscription);
        self.watcher.abort();
        self.shared.wake.notify_waiters();

        for worker in self.workers {
            if let Err(e) = worker.await {
                tracing::warn!("Queue worker ended abnormally: {}", e);
            }
        }

        tracing::info!("Queue on {} stopped", self.shared.queue.tasks_path());
    }
}

impl QueueShared {
    fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// The main loop for a single worker.
    ///
    /// 1. Scans for claimable items.
    /// 2. Attempts to claim one (atomic state change).
    /// 3. If claimed, processes it while maintaining the lease.
    async fn worker_loop(&self, worker_id: usize) {
        tracing::debug!("Worker {} started", worker_id);
        let poll_interval = Duration::from_millis(self.queue.options().poll_interval_ms.max(1));

        while !self.is_stopping() {
            match self.claim_next(worker_id).await {
                Ok(Some((key, item, owner))) => {
                    self.execute_with_lease(key, item, owner).await;
                }
                Ok(None) => {
                    tokio::select! {
                        _ = self.wake.notified() => {}
                        _ = tokio::time::sleep(poll_interval) => {}
                    }
                }
                Err(StoreError::Disconnected) => {
                    tracing::error!("Worker {} stopping: store connection closed", worker_id);
                    break;
                }
                Err(e) => {
                    tracing::warn!("Worker {} failed to scan queue: {}", worker_id, e);
                    tokio::time::sleep(poll_interval).await;
                }
            }
        }

        tracing::debug!("Worker {} stopped", worker_id);
    }

    async fn claim_next(
        &self,
        worker_id: usize,
    ) -> Result<Option<(String, serde_json::Value, String)>, StoreError> {
        let items = self.queue.claimable_items().await?;
        if items.is_empty() {
            return Ok(None);
        }

        tracing::trace!("Worker {} found {} available items", worker_id, items.len());

        for (key, item) in items {
            if self.is_stopping() {
                break;
            }
            let owner = format!(
                "{}:{}:{}",
                self.instance_id,
                worker_id,
                self.claims.fetch_add(1, Ordering::SeqCst)
            );
            match self.queue.try_claim(&key, &owner).await {
                Ok(true) => {
                    tracing::debug!("Worker {} claimed item {}", worker_id, key);
                    return Ok(Some((key, item, owner)));
                }
                Ok(false) => {
                    tracing::trace!("Item {} already claimed by another worker", key);
                }
                Err(e) => {
                    tracing::warn!("Failed to claim item {}: {}", key, e);
                }
            }
        }

        Ok(None)
    }

    /// Runs the processor for a claimed item while a sidecar renews the lease.
    async fn execute_with_lease(&self, key: String, item: serde_json::Value, owner: String) {
        let renewal = self.spawn_lease_renewal(&key, &owner);

        let job = Job::new(self.queue.clone(), key, owner);
        self.processor.process(strip_queue_fields(&item), job).await;

        renewal.abort();
    }

    fn spawn_lease_renewal(&self, key: &str, owner: &str) -> JoinHandle<()> {
        let queue = self.queue.clone();
        let key = key.to_string();
        let owner = owner.to_string();
        let every = Duration::from_millis((queue.options().lease_ms / 3).max(1));

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(every).await;

                match queue.renew_lease(&key, &owner).await {
                    Ok(()) => {
                        tracing::trace!("Renewed lease for item {}", key);
                    }
                    Err(e) => {
                        // Completed, reclaimed, or the store is gone.
                        tracing::trace!("Stopped renewing lease for item {}: {}", key, e);
                        break;
                    }
                }
            }
        })
    }
}
