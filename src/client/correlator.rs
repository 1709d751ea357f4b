use super::watcher::OneShotWatcher;
use crate::config::ClientConfig;
use crate::error::RpcError;
use crate::presence::tracker::PresenceTracker;
use crate::protocol::{ResultEnvelope, Task};
use crate::store::path::Namespace;
use crate::store::types::{SharedStore, StoreError, server_timestamp};

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Submits tasks and waits for their results.
///
/// A client registers its presence lazily on first use. Its session id is
/// fixed for the lifetime of the value; calls may run concurrently.
pub struct Client {
    store: Arc<dyn SharedStore>,
    namespace: Namespace,
    presence: PresenceTracker,
    session: OnceCell<String>,
}

impl Client {
    /// Fails with `RpcError::Config` if `config.store` is missing.
    pub fn new(config: ClientConfig) -> Result<Self, RpcError> {
        let store = config.store.ok_or_else(RpcError::missing_store)?;
        let namespace = Namespace::new(&config.root);

        Ok(Self {
            presence: PresenceTracker::new(store.clone(), namespace.clone()),
            store,
            namespace,
            session: OnceCell::new(),
        })
    }

    /// Registers this client's presence if that has not happened yet and
    /// returns its session id.
    pub async fn connect(&self) -> Result<&str, RpcError> {
        let id = self
            .session
            .get_or_try_init(|| async {
                let id = self.store.push_key();
                self.presence.register(&id).await?;
                Ok::<_, StoreError>(id)
            })
            .await?;
        Ok(id.as_str())
    }

    /// The session id, once connected.
    pub fn session_id(&self) -> Option<&str> {
        self.session.get().map(String::as_str)
    }

    /// Runs the task `name` with `data` on some server and returns its result.
    ///
    /// There is no built-in timeout: wrap the future in
    /// `tokio::time::timeout` to bound it. Dropping the future stops
    /// listening for the result.
    pub async fn run(&self, name: &str, data: Value) -> Result<Value, RpcError> {
        let client_id = self.connect().await?;
        let key = self.store.push_key();
        let results_path = self.namespace.results(client_id);

        let task = Task {
            client: client_id.to_string(),
            task: name.to_string(),
            data,
            key: key.clone(),
        };

        // Listen before submitting so no result can land unseen.
        let watcher = OneShotWatcher::watch(self.store.clone(), &results_path)?;

        let mut updates = BTreeMap::new();
        updates.insert(self.presence.last_activity_path(client_id), server_timestamp());
        updates.insert(self.namespace.task(&key), serde_json::to_value(&task)?);
        self.store.update(updates).await?;

        tracing::debug!("Submitted task {} ({}) for client {}", key, name, client_id);

        let snapshot = watcher
            .next_match(|snapshot| {
                snapshot.value.get("key").and_then(Value::as_str) == Some(key.as_str())
            })
            .await
            .ok_or(StoreError::Disconnected)?;

        let result_path = self.namespace.result(client_id, &snapshot.key);
        if let Err(e) = self.store.remove(&result_path).await {
            tracing::warn!("Failed to remove consumed result {}: {}", result_path, e);
        }

        let envelope: ResultEnvelope =
            serde_json::from_value(snapshot.value).map_err(|e| RpcError::Malformed {
                path: result_path,
                reason: e.to_string(),
            })?;

        envelope.into_result()
    }
}
