use super::types::{ClientSession, ClientStatus};
use crate::store::path::{Namespace, join};
use crate::store::types::{SharedStore, StoreError, server_timestamp};

use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Registers and queries client presence records.
#[derive(Clone)]
pub struct PresenceTracker {
    store: Arc<dyn SharedStore>,
    namespace: Namespace,
}

impl PresenceTracker {
    pub fn new(store: Arc<dyn SharedStore>, namespace: Namespace) -> Self {
        Self { store, namespace }
    }

    /// Creates the ephemeral presence record for `client_id`.
    ///
    /// Both `clients/{id}` and `results/{id}` are scheduled for removal when
    /// the underlying connection drops. There is no explicit disconnect.
    pub async fn register(&self, client_id: &str) -> Result<ClientSession, StoreError> {
        let client_path = self.namespace.client(client_id);
        let results_path = self.namespace.results(client_id);

        self.store.on_disconnect_remove(&client_path).await?;
        self.store.on_disconnect_remove(&results_path).await?;

        let mut updates = BTreeMap::new();
        updates.insert(
            client_path,
            json!({
                "id": client_id,
                "status": ClientStatus::Connected,
                "lastActivity": server_timestamp(),
            }),
        );
        self.store.update(updates).await?;

        tracing::info!("Registered client {}", client_id);

        Ok(ClientSession {
            id: client_id.to_string(),
            status: ClientStatus::Connected,
            last_activity: None,
        })
    }

    /// Path of the client's `lastActivity` field, for inclusion in a
    /// multi-path update.
    pub fn last_activity_path(&self, client_id: &str) -> String {
        join(&self.namespace.client(client_id), "lastActivity")
    }

    /// Returns `true` iff any record exists at `clients/{id}`.
    pub async fn is_connected(&self, client_id: &str) -> Result<bool, StoreError> {
        let connected = self
            .store
            .read(&self.namespace.client(client_id))
            .await?
            .is_some();

        tracing::trace!("Liveness check for client {}: {}", client_id, connected);
        Ok(connected)
    }

    /// Reads and decodes the presence record, if one exists.
    ///
    /// A record that exists but does not decode (e.g. only `lastActivity` has
    /// landed so far) is reported as `None` here, although `is_connected`
    /// still treats it as present.
    pub async fn session(&self, client_id: &str) -> Result<Option<ClientSession>, StoreError> {
        let record = self.store.read(&self.namespace.client(client_id)).await?;
        Ok(record.and_then(|value| serde_json::from_value(value).ok()))
    }
}
