//! Result Sweeper
//!
//! A client only deletes the results it matched. Envelopes nobody claims
//! (e.g. the caller stopped waiting) would otherwise stay under
//! `results/{client}` until that client disconnects. The sweeper removes
//! envelopes older than a TTL.

use crate::store::path::{Namespace, join};
use crate::store::types::{SharedStore, StoreError, now_ms};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SweeperOptions {
    /// Age after which an unread result is removed.
    pub result_ttl_ms: u64,
    pub sweep_interval_ms: u64,
}

impl Default for SweeperOptions {
    fn default() -> Self {
        Self {
            result_ttl_ms: 600_000,
            sweep_interval_ms: 60_000,
        }
    }
}

pub struct ResultSweeper {
    store: Arc<dyn SharedStore>,
    namespace: Namespace,
    options: SweeperOptions,
}

impl ResultSweeper {
    pub fn new(store: Arc<dyn SharedStore>, namespace: Namespace, options: SweeperOptions) -> Self {
        Self {
            store,
            namespace,
            options,
        }
    }

    /// Removes every expired envelope in one atomic write.
    ///
    /// Envelopes without a `createdAt` are left alone. Returns how many were removed.
    pub async fn sweep_once(&self) -> Result<usize, StoreError> {
        let results_path = self.namespace.all_results();
        let Some(Value::Object(clients)) = self.store.read(&results_path).await? else {
            return Ok(0);
        };

        let cutoff = now_ms().saturating_sub(self.options.result_ttl_ms);
        let mut expired = BTreeMap::new();
        for (client_id, results) in &clients {
            let Some(results) = results.as_object() else {
                continue;
            };
            for (result_key, envelope) in results {
                let created_at = envelope.get("createdAt").and_then(Value::as_u64);
                if created_at.is_some_and(|created_at| created_at < cutoff) {
                    expired.insert(
                        join(&results_path, &format!("{}/{}", client_id, result_key)),
                        Value::Null,
                    );
                }
            }
        }

        let removed = expired.len();
        if removed > 0 {
            self.store.update(expired).await?;
            tracing::info!("Swept {} expired results", removed);
        }
        Ok(removed)
    }

    /// Runs `sweep_once` on an interval until the handle is aborted.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_millis(self.options.sweep_interval_ms.max(1)));

            loop {
                interval.tick().await;
                match self.sweep_once().await {
                    Ok(_) => {}
                    Err(StoreError::Disconnected) => {
                        tracing::warn!("Result sweeper stopping: store connection closed");
                        break;
                    }
                    Err(e) => tracing::warn!("Result sweep failed: {}", e),
                }
            }
        })
    }
}
