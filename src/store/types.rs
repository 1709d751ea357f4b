use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::sync::mpsc;

/// Failures reported by a store connection.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    /// The connection was closed; every further operation fails.
    #[error("store connection is closed")]
    Disconnected,

    #[error("read of {path} failed: {reason}")]
    Read { path: String, reason: String },

    #[error("write to {path} failed: {reason}")]
    Write { path: String, reason: String },
}

/// Identifier of a child-added subscription, unique per store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// A child that appeared under a watched path.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildSnapshot {
    /// The child's own key (last path segment).
    pub key: String,
    pub value: Value,
}

/// A live child-added subscription.
///
/// `events` closes once the subscription is removed, either through
/// `SharedStore::unsubscribe` or because the owning connection dropped.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub events: mpsc::UnboundedReceiver<ChildSnapshot>,
}

/// Decision returned by a transaction's update function.
#[derive(Debug, Clone, PartialEq)]
pub enum TxOutcome {
    Set(Value),
    Remove,
    Abort,
}

/// Update function run atomically against the current value at a path.
pub type TxFn<'a> = &'a (dyn Fn(Option<&Value>) -> TxOutcome + Send + Sync);

/// One connection to the shared hierarchical store.
///
/// Paths are `/`-separated and relative to the store root. Writing `null`
/// (or an empty object) deletes. A `{".sv": "timestamp"}` value anywhere in
/// a write is replaced with the store's clock in milliseconds.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Generates a new unique, time-ordered child key without writing anything.
    fn push_key(&self) -> String;

    /// Atomically applies every `path -> value` pair.
    async fn update(&self, updates: BTreeMap<String, Value>) -> Result<(), StoreError>;

    /// Appends `value` under `path` with a fresh push key and returns the key.
    async fn push(&self, path: &str, value: Value) -> Result<String, StoreError>;

    async fn read(&self, path: &str) -> Result<Option<Value>, StoreError>;

    async fn remove(&self, path: &str) -> Result<(), StoreError>;

    /// Runs `update` atomically against the value at `path`.
    ///
    /// Returns `true` if the outcome was committed, `false` on `Abort`.
    async fn transaction(&self, path: &str, update: TxFn<'_>) -> Result<bool, StoreError>;

    fn subscribe_child_added(&self, path: &str) -> Result<Subscription, StoreError>;

    /// Removes a subscription. Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);

    /// Registers `path` for removal when this connection drops.
    async fn on_disconnect_remove(&self, path: &str) -> Result<(), StoreError>;
}

/// The placeholder the store replaces with its own clock on write.
pub fn server_timestamp() -> Value {
    serde_json::json!({ ".sv": "timestamp" })
}

pub(crate) fn is_server_timestamp(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|map| map.len() == 1 && map.get(".sv").and_then(Value::as_str) == Some("timestamp"))
}

/// Helper to get the current system time in milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
