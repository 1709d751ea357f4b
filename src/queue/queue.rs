//! Lease Bookkeeping
//!
//! All item state lives in the store next to the item itself, so any number
//! of queue instances (in any number of processes) can share one tasks path.
//!
//! ## Responsibilities
//! - **Scanning**: Listing items that are pending or whose lease has expired.
//! - **Claiming**: Atomically moving an item to `in_progress` under a named owner.
//! - **Leasing**: Renewing the claim while a worker is still busy.
//! - **Completion**: Removing resolved items; retrying or dead-lettering rejected ones.
//!
//! Every mutation after the claim is conditional on the caller still being
//! the owner, so a worker whose lease expired cannot clobber the new owner.

use super::types::*;
use crate::store::path::join;
use crate::store::types::{SharedStore, StoreError, TxOutcome, now_ms, server_timestamp};

use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

pub struct QueueStore {
    store: Arc<dyn SharedStore>,
    tasks_path: String,
    options: QueueOptions,
}

impl QueueStore {
    pub fn new(store: Arc<dyn SharedStore>, tasks_path: &str, options: QueueOptions) -> Self {
        Self {
            store,
            tasks_path: tasks_path.to_string(),
            options,
        }
    }

    pub fn store(&self) -> &Arc<dyn SharedStore> {
        &self.store
    }

    pub fn tasks_path(&self) -> &str {
        &self.tasks_path
    }

    pub fn options(&self) -> &QueueOptions {
        &self.options
    }

    fn item_path(&self, key: &str) -> String {
        join(&self.tasks_path, key)
    }

    /// Items that are eligible for a claim, oldest first.
    ///
    /// Eligible items are:
    /// 1. Items without a `_state` (pending).
    /// 2. Items `in_progress` whose lease has expired (worker crashed or stalled).
    ///
    /// Items that are not JSON objects cannot carry lease fields; they are
    /// dropped here.
    pub async fn claimable_items(&self) -> Result<Vec<(String, Value)>, StoreError> {
        let Some(Value::Object(items)) = self.store.read(&self.tasks_path).await? else {
            return Ok(Vec::new());
        };

        let now = now_ms();
        let mut claimable = Vec::new();
        for (key, item) in items {
            if !item.is_object() {
                tracing::warn!("Dropping queue item {} (not an object)", key);
                self.store.remove(&self.item_path(&key)).await?;
                continue;
            }
            if is_claimable(&item, now, self.options.lease_ms) {
                claimable.push((key, item));
            }
        }

        Ok(claimable)
    }

    /// Attempts to lock an item for `owner`.
    ///
    /// Returns `Ok(false)` if another worker got there first or the item is gone.
    pub async fn try_claim(&self, key: &str, owner: &str) -> Result<bool, StoreError> {
        let now = now_ms();
        let lease_ms = self.options.lease_ms;

        let claimed = self
            .store
            .transaction(&self.item_path(key), &|current| {
                let Some(item) = current else {
                    return TxOutcome::Abort;
                };
                if !is_claimable(item, now, lease_ms) {
                    return TxOutcome::Abort;
                }
                let mut claimed = item.clone();
                let Some(fields) = claimed.as_object_mut() else {
                    return TxOutcome::Abort;
                };
                fields.insert(STATE_FIELD.to_string(), json!(STATE_IN_PROGRESS));
                fields.insert(OWNER_FIELD.to_string(), json!(owner));
                fields.insert(STATE_CHANGED_FIELD.to_string(), server_timestamp());
                TxOutcome::Set(claimed)
            })
            .await?;

        if claimed {
            tracing::debug!("Claimed item {} as {}", key, owner);
        }
        Ok(claimed)
    }

    /// Extends the lease of an item `owner` is still processing.
    pub async fn renew_lease(&self, key: &str, owner: &str) -> Result<(), QueueError> {
        self.update_owned(key, owner, |fields| {
            fields.insert(STATE_CHANGED_FIELD.to_string(), server_timestamp());
        })
        .await
    }

    /// Records a progress value on an item `owner` is processing.
    pub async fn set_progress(&self, key: &str, owner: &str, progress: Value) -> Result<(), QueueError> {
        self.update_owned(key, owner, |fields| {
            fields.insert(PROGRESS_FIELD.to_string(), progress.clone());
        })
        .await
    }

    /// Retires a successfully processed item.
    pub async fn resolve(&self, key: &str, owner: &str) -> Result<(), QueueError> {
        let committed = self
            .store
            .transaction(&self.item_path(key), &|current| {
                if is_owned_by(current, owner) {
                    TxOutcome::Remove
                } else {
                    TxOutcome::Abort
                }
            })
            .await?;

        if !committed {
            return Err(self.lease_lost(key, owner));
        }

        tracing::debug!("Item {} resolved", key);
        Ok(())
    }

    /// Marks a processing attempt as failed.
    ///
    /// The item goes back to pending while its attempt count is within
    /// `retries`; after that it is parked in the `error` state for good.
    pub async fn reject(&self, key: &str, owner: &str, error: &str) -> Result<(), QueueError> {
        let retries = self.options.retries;
        let attempts_seen = AtomicU32::new(0);

        let committed = self
            .store
            .transaction(&self.item_path(key), &|current| {
                if !is_owned_by(current, owner) {
                    return TxOutcome::Abort;
                }
                let Some(mut next) = current.cloned() else {
                    return TxOutcome::Abort;
                };
                let Some(fields) = next.as_object_mut() else {
                    return TxOutcome::Abort;
                };

                let previous = fields
                    .get(ERROR_DETAILS_FIELD)
                    .and_then(|details| serde_json::from_value::<ErrorDetails>(details.clone()).ok())
                    .map(|details| details.attempts)
                    .unwrap_or(0);
                let attempts = previous + 1;
                attempts_seen.store(attempts, Ordering::SeqCst);

                fields.insert(
                    ERROR_DETAILS_FIELD.to_string(),
                    json!({ "error": error, "attempts": attempts }),
                );
                fields.remove(OWNER_FIELD);
                fields.remove(PROGRESS_FIELD);
                if attempts > retries {
                    fields.insert(STATE_FIELD.to_string(), json!(STATE_ERROR));
                    fields.insert(STATE_CHANGED_FIELD.to_string(), server_timestamp());
                } else {
                    fields.remove(STATE_FIELD);
                    fields.remove(STATE_CHANGED_FIELD);
                }
                TxOutcome::Set(next)
            })
            .await?;

        if !committed {
            return Err(self.lease_lost(key, owner));
        }

        let attempts = attempts_seen.load(Ordering::SeqCst);
        if attempts > retries {
            tracing::error!("Item {} failed after {} attempts: {}", key, attempts, error);
        } else {
            tracing::warn!("Item {} rejected (attempt {}), will retry: {}", key, attempts, error);
        }
        Ok(())
    }

    /// Counts items by state.
    pub async fn counts(&self) -> Result<QueueCounts, StoreError> {
        let mut counts = QueueCounts::default();
        if let Some(Value::Object(items)) = self.store.read(&self.tasks_path).await? {
            for item in items.values() {
                match ItemState::of(item) {
                    ItemState::Pending => counts.pending += 1,
                    ItemState::InProgress => counts.in_progress += 1,
                    ItemState::Error => counts.failed += 1,
                }
            }
        }
        Ok(counts)
    }

    async fn update_owned<F>(&self, key: &str, owner: &str, edit: F) -> Result<(), QueueError>
    where
        F: Fn(&mut serde_json::Map<String, Value>) + Send + Sync,
    {
        let committed = self
            .store
            .transaction(&self.item_path(key), &|current| {
                if !is_owned_by(current, owner) {
                    return TxOutcome::Abort;
                }
                let Some(mut next) = current.cloned() else {
                    return TxOutcome::Abort;
                };
                match next.as_object_mut() {
                    Some(fields) => {
                        edit(fields);
                        TxOutcome::Set(next)
                    }
                    None => TxOutcome::Abort,
                }
            })
            .await?;

        if committed {
            Ok(())
        } else {
            Err(self.lease_lost(key, owner))
        }
    }

    fn lease_lost(&self, key: &str, owner: &str) -> QueueError {
        QueueError::LeaseLost {
            key: key.to_string(),
            owner: owner.to_string(),
        }
    }
}
