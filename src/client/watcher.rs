use crate::store::types::{ChildSnapshot, SharedStore, StoreError, SubscriptionId};

use std::sync::Arc;
use tokio::sync::mpsc;

/// A child-added subscription that yields at most one matching child.
///
/// The subscription is torn down before the match is returned and whenever
/// the watcher is dropped, so a redelivered notification finds no listener.
pub struct OneShotWatcher {
    store: Arc<dyn SharedStore>,
    id: SubscriptionId,
    events: mpsc::UnboundedReceiver<ChildSnapshot>,
    active: bool,
}

impl OneShotWatcher {
    pub fn watch(store: Arc<dyn SharedStore>, path: &str) -> Result<Self, StoreError> {
        let subscription = store.subscribe_child_added(path)?;
        Ok(Self {
            store,
            id: subscription.id,
            events: subscription.events,
            active: true,
        })
    }

    /// Waits for the first child accepted by `matches`.
    ///
    /// Returns `None` if the subscription closes first.
    pub async fn next_match<F>(mut self, matches: F) -> Option<ChildSnapshot>
    where
        F: Fn(&ChildSnapshot) -> bool,
    {
        while let Some(snapshot) = self.events.recv().await {
            if matches(&snapshot) {
                self.stop();
                return Some(snapshot);
            }
        }
        self.stop();
        None
    }

    fn stop(&mut self) {
        if self.active {
            self.active = false;
            self.store.unsubscribe(self.id);
            self.events.close();
        }
    }
}

impl Drop for OneShotWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
