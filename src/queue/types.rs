use crate::store::types::StoreError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Field holding the item's claim state. Absent means pending.
pub const STATE_FIELD: &str = "_state";
/// Field naming the worker that holds the lease.
pub const OWNER_FIELD: &str = "_owner";
/// Store timestamp (ms) of the last claim or lease renewal.
pub const STATE_CHANGED_FIELD: &str = "_state_changed";
pub const PROGRESS_FIELD: &str = "_progress";
pub const ERROR_DETAILS_FIELD: &str = "_error_details";

pub const STATE_IN_PROGRESS: &str = "in_progress";
pub const STATE_ERROR: &str = "error";

/// Worker pool and lease configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueueOptions {
    /// Number of items processed concurrently by one queue instance.
    pub num_workers: usize,
    /// How long a claim stays valid without renewal.
    pub lease_ms: u64,
    /// How many times a rejected item is put back before it is dead-lettered.
    pub retries: u32,
    /// Fallback scan interval for idle workers (picks up expired leases).
    pub poll_interval_ms: u64,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            num_workers: 1,
            lease_ms: 30_000,
            retries: 0,
            poll_interval_ms: 100,
        }
    }
}

/// Claim state of a queue item, read from its `_state` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    Pending,
    InProgress,
    /// Retries exhausted; never delivered again.
    Error,
}

impl ItemState {
    pub fn of(item: &Value) -> Self {
        match item.get(STATE_FIELD).and_then(Value::as_str) {
            Some(STATE_IN_PROGRESS) => ItemState::InProgress,
            Some(STATE_ERROR) => ItemState::Error,
            _ => ItemState::Pending,
        }
    }
}

/// Failure bookkeeping kept on an item across rejected attempts.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ErrorDetails {
    pub error: String,
    pub attempts: u32,
}

/// Item counts by state, as seen by one scan of the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    pub pending: usize,
    pub in_progress: usize,
    pub failed: usize,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The item was reclaimed by another worker, or already completed.
    #[error("lease on item {key} is no longer held by {owner}")]
    LeaseLost { key: String, owner: String },
}

/// Whether a worker may claim `item` at time `now`.
pub fn is_claimable(item: &Value, now: u64, lease_ms: u64) -> bool {
    match ItemState::of(item) {
        ItemState::Pending => true,
        ItemState::InProgress => item
            .get(STATE_CHANGED_FIELD)
            .and_then(Value::as_u64)
            .is_none_or(|changed| now > changed.saturating_add(lease_ms)),
        ItemState::Error => false,
    }
}

/// Whether `owner` still holds the lease on `item`.
pub fn is_owned_by(item: Option<&Value>, owner: &str) -> bool {
    item.is_some_and(|item| {
        ItemState::of(item) == ItemState::InProgress
            && item.get(OWNER_FIELD).and_then(Value::as_str) == Some(owner)
    })
}

/// The item as its producer wrote it, without queue bookkeeping.
pub fn strip_queue_fields(item: &Value) -> Value {
    match item {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| !is_queue_field(key))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect::<Map<String, Value>>(),
        ),
        other => other.clone(),
    }
}

fn is_queue_field(key: &str) -> bool {
    matches!(
        key,
        STATE_FIELD | OWNER_FIELD | STATE_CHANGED_FIELD | PROGRESS_FIELD | ERROR_DETAILS_FIELD
    )
}
