//! In-Process Shared Store
//!
//! A single JSON tree behind a lock, shared by any number of connections.
//! Each `MemoryConnection` plays the role of one network client: its
//! on-disconnect removals and its subscriptions live exactly as long as it does.
//!
//! Child-added events are computed by diffing the child key sets of every
//! watched path before and after a write, and are sent while the tree lock is
//! still held, so subscribers observe children in commit order.

use super::path::segments;
use super::push_id::PushIdGenerator;
use super::types::*;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::mpsc;

type Segments = Vec<String>;

/// A pending write: `None` deletes the path.
type Write = (Segments, Option<Value>);

struct Watch {
    path: Segments,
    connection: u64,
    tx: mpsc::UnboundedSender<ChildSnapshot>,
}

struct StoreState {
    tree: RwLock<Value>,
    /// Subscriptions by id. Only inserted while the tree write lock is held.
    watches: DashMap<SubscriptionId, Watch>,
    /// On-disconnect removals, keyed by connection id.
    ephemeral: DashMap<u64, Vec<Segments>>,
    next_id: AtomicU64,
    push_ids: PushIdGenerator,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

/// The shared backend. Cloning is cheap and yields a handle to the same tree.
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(StoreState {
                tree: RwLock::new(Value::Object(Map::new())),
                watches: DashMap::new(),
                ephemeral: DashMap::new(),
                next_id: AtomicU64::new(1),
                push_ids: PushIdGenerator::new(),
                fail_reads: AtomicBool::new(false),
                fail_writes: AtomicBool::new(false),
            }),
        }
    }

    /// Opens a new connection to this store.
    pub fn connect(&self) -> MemoryConnection {
        let id = self.state.next_id.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("Opened store connection {}", id);
        MemoryConnection {
            state: self.state.clone(),
            id,
            open: AtomicBool::new(true),
        }
    }

    /// Reads a path directly, bypassing connections and fault injection.
    pub fn snapshot(&self, path: &str) -> Option<Value> {
        let tree = self.state.tree_read();
        lookup(&tree, &segments(path))
    }

    /// Makes every subsequent read (and liveness check) fail.
    pub fn set_fail_reads(&self, fail: bool) {
        self.state.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Makes every subsequent write fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.state.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of live child-added subscriptions on exactly `path`.
    pub fn subscriber_count(&self, path: &str) -> usize {
        let path = segments(path);
        self.state
            .watches
            .iter()
            .filter(|entry| entry.value().path == path)
            .count()
    }

    /// Sends `snapshot` again to every subscriber of `path`, as a store that
    /// redelivers a notification would.
    #[cfg(test)]
    pub(crate) fn redeliver(&self, path: &str, snapshot: ChildSnapshot) -> usize {
        let path = segments(path);
        let mut delivered = 0;
        for entry in self.state.watches.iter() {
            if entry.value().path == path && entry.value().tx.send(snapshot.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreState {
    fn tree_read(&self) -> RwLockReadGuard<'_, Value> {
        self.tree.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn tree_write(&self) -> RwLockWriteGuard<'_, Value> {
        self.tree.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies `writes` in order and notifies watchers of new children.
    fn apply(&self, tree: &mut Value, writes: Vec<Write>) {
        let before: Vec<(SubscriptionId, BTreeSet<String>)> = self
            .watches
            .iter()
            .map(|entry| (*entry.key(), child_keys(tree, &entry.value().path)))
            .collect();

        for (path, value) in writes {
            match value {
                Some(value) => set_at(tree, &path, value),
                None => remove_at(tree, &path),
            }
        }

        for (id, old_keys) in before {
            let Some(watch) = self.watches.get(&id) else {
                continue;
            };
            let Some(children) = node_at(tree, &watch.path).and_then(Value::as_object) else {
                continue;
            };
            for (key, value) in children {
                if old_keys.contains(key) {
                    continue;
                }
                let _ = watch.tx.send(ChildSnapshot {
                    key: key.clone(),
                    value: value.clone(),
                });
            }
        }
    }
}

/// One connection to a `MemoryStore`.
///
/// Dropping the connection disconnects it.
pub struct MemoryConnection {
    state: Arc<StoreState>,
    id: u64,
    open: AtomicBool,
}

impl MemoryConnection {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Simulates the network connection dropping.
    ///
    /// Runs every registered on-disconnect removal as one atomic write and
    /// closes this connection's subscriptions. Idempotent.
    pub fn disconnect(&self) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }

        let paths = self
            .state
            .ephemeral
            .remove(&self.id)
            .map(|(_, paths)| paths)
            .unwrap_or_default();
        let removed = paths.len();

        {
            let mut tree = self.state.tree_write();
            self.state
                .apply(&mut tree, paths.into_iter().map(|path| (path, None)).collect());
        }

        self.state
            .watches
            .retain(|_, watch| watch.connection != self.id);

        tracing::debug!(
            "Connection {} closed ({} ephemeral paths removed)",
            self.id,
            removed
        );
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(StoreError::Disconnected)
        }
    }

    fn ensure_writable(&self, path: &str) -> Result<(), StoreError> {
        self.ensure_open()?;
        if self.state.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Write {
                path: path.to_string(),
                reason: "write rejected by store".to_string(),
            });
        }
        Ok(())
    }

    fn ensure_readable(&self, path: &str) -> Result<(), StoreError> {
        self.ensure_open()?;
        if self.state.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Read {
                path: path.to_string(),
                reason: "read rejected by store".to_string(),
            });
        }
        Ok(())
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[async_trait]
impl SharedStore for MemoryConnection {
    fn push_key(&self) -> String {
        self.state.push_ids.next_id()
    }

    async fn update(&self, updates: BTreeMap<String, Value>) -> Result<(), StoreError> {
        let first = updates.keys().next().cloned().unwrap_or_default();
        self.ensure_writable(&first)?;

        let now = now_ms();
        let writes: Vec<Write> = updates
            .into_iter()
            .map(|(path, value)| (segments(&path), normalize(value, now)))
            .collect();

        let mut tree = self.state.tree_write();
        self.state.apply(&mut tree, writes);
        Ok(())
    }

    async fn push(&self, path: &str, value: Value) -> Result<String, StoreError> {
        let key = self.push_key();
        let mut updates = BTreeMap::new();
        updates.insert(super::path::join(path, &key), value);
        self.update(updates).await?;
        Ok(key)
    }

    async fn read(&self, path: &str) -> Result<Option<Value>, StoreError> {
        self.ensure_readable(path)?;
        let tree = self.state.tree_read();
        Ok(lookup(&tree, &segments(path)))
    }

    async fn remove(&self, path: &str) -> Result<(), StoreError> {
        self.ensure_writable(path)?;
        let mut tree = self.state.tree_write();
        self.state.apply(&mut tree, vec![(segments(path), None)]);
        Ok(())
    }

    async fn transaction(&self, path: &str, update: TxFn<'_>) -> Result<bool, StoreError> {
        self.ensure_writable(path)?;
        let path = segments(path);

        let mut tree = self.state.tree_write();
        let current = lookup(&tree, &path);
        let write = match update(current.as_ref()) {
            TxOutcome::Abort => return Ok(false),
            TxOutcome::Set(value) => normalize(value, now_ms()),
            TxOutcome::Remove => None,
        };
        self.state.apply(&mut tree, vec![(path, write)]);
        Ok(true)
    }

    fn subscribe_child_added(&self, path: &str) -> Result<Subscription, StoreError> {
        self.ensure_open()?;
        let path = segments(path);
        let id = SubscriptionId(self.state.next_id.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = mpsc::unbounded_channel();

        // Holding the write lock orders the replay against concurrent writes.
        let tree = self.state.tree_write();
        if let Some(children) = node_at(&tree, &path).and_then(Value::as_object) {
            for (key, value) in children {
                let _ = tx.send(ChildSnapshot {
                    key: key.clone(),
                    value: value.clone(),
                });
            }
        }
        self.state.watches.insert(
            id,
            Watch {
                path,
                connection: self.id,
                tx,
            },
        );
        drop(tree);

        Ok(Subscription { id, events: rx })
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.state.watches.remove(&id);
    }

    async fn on_disconnect_remove(&self, path: &str) -> Result<(), StoreError> {
        self.ensure_writable(path)?;
        self.state
            .ephemeral
            .entry(self.id)
            .or_default()
            .push(segments(path));
        Ok(())
    }
}

/// Resolves server timestamps and strips nulls. `None` means "delete".
fn normalize(value: Value, now: u64) -> Option<Value> {
    if is_server_timestamp(&value) {
        return Some(Value::from(now));
    }
    match value {
        Value::Null => None,
        Value::Object(map) => {
            let cleaned: Map<String, Value> = map
                .into_iter()
                .filter_map(|(key, value)| normalize(value, now).map(|value| (key, value)))
                .collect();
            if cleaned.is_empty() {
                None
            } else {
                Some(Value::Object(cleaned))
            }
        }
        other => Some(other),
    }
}

fn node_at<'a>(node: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter()
        .try_fold(node, |current, segment| current.as_object()?.get(segment))
}

/// Cloned value at `path`; empty objects read as absent.
fn lookup(node: &Value, path: &[String]) -> Option<Value> {
    node_at(node, path)
        .filter(|value| !value.as_object().is_some_and(Map::is_empty))
        .cloned()
}

fn child_keys(node: &Value, path: &[String]) -> BTreeSet<String> {
    node_at(node, path)
        .and_then(Value::as_object)
        .map(|children| children.keys().cloned().collect())
        .unwrap_or_default()
}

fn set_at(node: &mut Value, path: &[String], value: Value) {
    let Some((head, rest)) = path.split_first() else {
        *node = value;
        return;
    };
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        let child = map.entry(head.clone()).or_insert(Value::Null);
        set_at(child, rest, value);
    }
}

/// Removes the value at `path`, pruning parents left empty.
fn remove_at(node: &mut Value, path: &[String]) {
    let Some((head, rest)) = path.split_first() else {
        *node = Value::Object(Map::new());
        return;
    };
    let Value::Object(map) = node else {
        return;
    };
    if rest.is_empty() {
        map.remove(head);
        return;
    }
    if let Some(child) = map.get_mut(head) {
        remove_at(child, rest);
        if child.as_object().is_some_and(Map::is_empty) {
            map.remove(head);
        }
    }
}
