//! Store Module Tests
//!
//! Validates the in-process store against the contract the RPC layer relies on.
//!
//! ## Test Scopes
//! - **Writes**: Multi-path updates, deletes, server timestamps and pruning.
//! - **Notifications**: Child-added replay, ordering and unsubscription.
//! - **Ephemeral paths**: Removal when a connection drops.
//! - **Transactions**: Commit and abort semantics.

#[cfg(test)]
mod tests {
    use crate::store::memory::MemoryStore;
    use crate::store::path::{Namespace, join, segments};
    use crate::store::types::{SharedStore, StoreError, TxOutcome, server_timestamp};
    use serde_json::json;
    use std::collections::BTreeMap;

    // ============================================================
    // PATH TESTS
    // ============================================================

    #[test]
    fn test_segments_ignore_extra_separators() {
        assert_eq!(segments("/a//b/c/"), vec!["a", "b", "c"]);
        assert!(segments("").is_empty());
    }

    #[test]
    fn test_namespace_layout() {
        let ns = Namespace::new("/rpc-example/");

        assert_eq!(ns.client("c1"), "rpc-example/clients/c1");
        assert_eq!(ns.task("k1"), "rpc-example/queue/tasks/k1");
        assert_eq!(ns.result("c1", "r1"), "rpc-example/results/c1/r1");
        assert_eq!(join("", "results"), "results");
    }

    // ============================================================
    // WRITE TESTS
    // ============================================================

    #[tokio::test]
    async fn test_update_is_applied_to_all_paths() {
        let store = MemoryStore::new();
        let conn = store.connect();

        let mut updates = BTreeMap::new();
        updates.insert("a/x".to_string(), json!(1));
        updates.insert("b/y".to_string(), json!({"z": true}));
        conn.update(updates).await.unwrap();

        assert_eq!(conn.read("a/x").await.unwrap(), Some(json!(1)));
        assert_eq!(conn.read("b").await.unwrap(), Some(json!({"y": {"z": true}})));
    }

    #[tokio::test]
    async fn test_server_timestamp_is_resolved() {
        let store = MemoryStore::new();
        let conn = store.connect();

        let mut updates = BTreeMap::new();
        updates.insert("clients/c1/lastActivity".to_string(), server_timestamp());
        conn.update(updates).await.unwrap();

        let value = conn.read("clients/c1/lastActivity").await.unwrap().unwrap();
        assert!(value.as_u64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_remove_prunes_empty_parents() {
        let store = MemoryStore::new();
        let conn = store.connect();

        conn.push("results/c1", json!({"key": "k"})).await.unwrap();
        let results = conn.read("results/c1").await.unwrap().unwrap();
        let key = results.as_object().unwrap().keys().next().unwrap().clone();

        conn.remove(&format!("results/c1/{}", key)).await.unwrap();

        assert_eq!(conn.read("results/c1").await.unwrap(), None);
        assert_eq!(store.snapshot("results"), None);
    }

    #[tokio::test]
    async fn test_null_write_deletes() {
        let store = MemoryStore::new();
        let conn = store.connect();

        let mut updates = BTreeMap::new();
        updates.insert("a".to_string(), json!({"b": 1, "c": 2}));
        conn.update(updates).await.unwrap();

        let mut updates = BTreeMap::new();
        updates.insert("a/b".to_string(), serde_json::Value::Null);
        conn.update(updates).await.unwrap();

        assert_eq!(conn.read("a").await.unwrap(), Some(json!({"c": 2})));
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let store = MemoryStore::new();
        let conn = store.connect();

        store.set_fail_writes(true);
        let result = conn.push("x", json!(1)).await;
        assert!(matches!(result, Err(StoreError::Write { .. })));

        store.set_fail_writes(false);
        store.set_fail_reads(true);
        let result = conn.read("x").await;
        assert!(matches!(result, Err(StoreError::Read { .. })));
    }

    // ============================================================
    // NOTIFICATION TESTS
    // ============================================================

    #[tokio::test]
    async fn test_subscription_replays_existing_children_in_key_order() {
        let store = MemoryStore::new();
        let conn = store.connect();

        let first = conn.push("list", json!("a")).await.unwrap();
        let second = conn.push("list", json!("b")).await.unwrap();

        let mut sub = conn.subscribe_child_added("list").unwrap();

        assert_eq!(sub.events.recv().await.unwrap().key, first);
        assert_eq!(sub.events.recv().await.unwrap().key, second);
        assert!(sub.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_subscription_sees_new_children_only_once() {
        let store = MemoryStore::new();
        let conn = store.connect();
        let mut sub = conn.subscribe_child_added("list").unwrap();

        let key = conn.push("list", json!({"n": 1})).await.unwrap();
        // Writing below an existing child is not a new child.
        let mut updates = BTreeMap::new();
        updates.insert(format!("list/{}/n", key), json!(2));
        conn.update(updates).await.unwrap();

        let event = sub.events.recv().await.unwrap();
        assert_eq!(event.key, key);
        assert_eq!(event.value, json!({"n": 1}));
        assert!(sub.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_children_from_other_connections_are_observed() {
        let store = MemoryStore::new();
        let watcher = store.connect();
        let writer = store.connect();
        let mut sub = watcher.subscribe_child_added("results/c1").unwrap();

        writer.push("results/c1", json!({"key": "k1"})).await.unwrap();

        let event = sub.events.recv().await.unwrap();
        assert_eq!(event.value["key"], "k1");
    }

    #[tokio::test]
    async fn test_unsubscribe_closes_stream() {
        let store = MemoryStore::new();
        let conn = store.connect();
        let mut sub = conn.subscribe_child_added("list").unwrap();
        assert_eq!(store.subscriber_count("list"), 1);

        conn.unsubscribe(sub.id);
        conn.unsubscribe(sub.id);

        assert_eq!(store.subscriber_count("list"), 0);
        assert!(sub.events.recv().await.is_none());
    }

    // ============================================================
    // EPHEMERAL TESTS
    // ============================================================

    #[tokio::test]
    async fn test_disconnect_removes_ephemeral_paths() {
        let store = MemoryStore::new();
        let owner = store.connect();
        let observer = store.connect();

        let mut updates = BTreeMap::new();
        updates.insert("clients/c1".to_string(), json!({"id": "c1"}));
        updates.insert("results/c1/r1".to_string(), json!({"key": "k"}));
        updates.insert("results/c2/r1".to_string(), json!({"key": "k"}));
        owner.update(updates).await.unwrap();
        owner.on_disconnect_remove("clients/c1").await.unwrap();
        owner.on_disconnect_remove("results/c1").await.unwrap();

        owner.disconnect();

        assert_eq!(observer.read("clients/c1").await.unwrap(), None);
        assert_eq!(observer.read("results/c1").await.unwrap(), None);
        assert!(observer.read("results/c2").await.unwrap().is_some());
        assert_eq!(owner.read("results/c2").await, Err(StoreError::Disconnected));
    }

    #[tokio::test]
    async fn test_dropping_connection_disconnects() {
        let store = MemoryStore::new();
        {
            let conn = store.connect();
            let mut updates = BTreeMap::new();
            updates.insert("clients/c9".to_string(), json!({"id": "c9"}));
            conn.update(updates).await.unwrap();
            conn.on_disconnect_remove("clients/c9").await.unwrap();
            let _sub = conn.subscribe_child_added("results/c9").unwrap();
            assert_eq!(store.subscriber_count("results/c9"), 1);
        }

        assert_eq!(store.snapshot("clients/c9"), None);
        assert_eq!(store.subscriber_count("results/c9"), 0);
    }

    // ============================================================
    // TRANSACTION TESTS
    // ============================================================

    #[tokio::test]
    async fn test_transaction_commit_and_abort() {
        let store = MemoryStore::new();
        let conn = store.connect();

        let committed = conn
            .transaction("counter", &|current| {
                let n = current.and_then(|v| v.as_u64()).unwrap_or(0);
                TxOutcome::Set(json!(n + 1))
            })
            .await
            .unwrap();
        assert!(committed);

        let committed = conn
            .transaction("counter", &|_| TxOutcome::Abort)
            .await
            .unwrap();
        assert!(!committed);
        assert_eq!(conn.read("counter").await.unwrap(), Some(json!(1)));

        conn.transaction("counter", &|_| TxOutcome::Remove)
            .await
            .unwrap();
        assert_eq!(conn.read("counter").await.unwrap(), None);
    }
}
