//! Server Module Tests
//!
//! ## Test Scopes
//! - **Registry**: Registration, lookup, option merging, handler failures.
//! - **Dispatcher**: Malformed items, both liveness checks, store failures.
//! - **Sweeper**: Expiry of unread results.
//! - **Server**: Construction and the full queue round trip.

#[cfg(test)]
mod tests {
    use crate::config::ServerConfig;
    use crate::error::RpcError;
    use crate::presence::tracker::PresenceTracker;
    use crate::protocol::{FailureKind, RemoteError, ResultEnvelope, TaskFailure};
    use crate::queue::types::QueueOptions;
    use crate::server::dispatcher::{DispatchOutcome, DispatchStage, Dispatcher};
    use crate::server::registry::{HandlerRegistry, TaskOptions};
    use crate::server::server::Server;
    use crate::server::sweeper::{ResultSweeper, SweeperOptions};
    use crate::store::memory::{MemoryConnection, MemoryStore};
    use crate::store::path::Namespace;
    use crate::store::types::{SharedStore, now_ms};

    use assert_matches::assert_matches;
    use serde_json::{Map, Value, json};
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn namespace() -> Namespace {
        Namespace::new("rpc")
    }

    fn echo_registry() -> Arc<HandlerRegistry> {
        let registry = HandlerRegistry::new();
        registry.register("echo", |data, _options| async move { Ok(data) });
        registry
    }

    fn task_item(client: &str, task: &str, data: Value, key: &str) -> Value {
        json!({"client": client, "task": task, "data": data, "key": key})
    }

    /// Registers `client_id` as present on its own connection.
    async fn present_client(store: &MemoryStore, client_id: &str) -> Arc<MemoryConnection> {
        let conn = Arc::new(store.connect());
        PresenceTracker::new(conn.clone(), namespace())
            .register(client_id)
            .await
            .unwrap();
        conn
    }

    async fn wait_for<F: Fn() -> Option<Value>>(probe: F) -> Value {
        for _ in 0..250 {
            if let Some(value) = probe() {
                return value;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("value never appeared");
    }

    // ============================================================
    // TEST 1: Registry
    // ============================================================

    #[tokio::test]
    async fn test_handler_registry() {
        // ARRANGE
        let registry = HandlerRegistry::new();

        registry.register("test_task", |_data, _options| async move {
            Ok(json!({"status": "ok"}))
        });

        // ASSERT
        assert!(registry.has_handler("test_task"));
        assert!(!registry.has_handler("nonexistent"));
        assert_eq!(registry.handler_count(), 1);
        assert_eq!(registry.list_handlers(), vec!["test_task".to_string()]);
    }

    #[tokio::test]
    async fn test_invoke_returns_handler_value_unmodified() {
        let registry = echo_registry();

        let result = registry.invoke("echo", json!({"v": 1})).await.unwrap();

        assert_eq!(result, json!({"v": 1}));
    }

    #[tokio::test]
    async fn test_invoke_unknown_task() {
        let registry = echo_registry();

        let result = registry.invoke("nope", json!({})).await;

        assert_matches!(result, Err(RpcError::UnknownTask(name)) if name == "nope");
    }

    #[tokio::test]
    async fn test_invoke_failing_handler() {
        let registry = HandlerRegistry::new();
        registry.register("fail", |_data, _options| async move {
            Err(anyhow::anyhow!("disk full"))
        });

        let result = registry.invoke("fail", json!({})).await;

        assert_matches!(result, Err(RpcError::Handler(message)) if message.contains("disk full"));
    }

    #[tokio::test]
    async fn test_invoke_panicking_handler_is_a_task_error() {
        let registry = HandlerRegistry::new();
        registry.register("explode", |_data, _options| async move {
            if true {
                panic!("boom");
            }
            Ok(Value::Null)
        });

        let result = registry.invoke("explode", json!({})).await;

        assert_matches!(result, Err(RpcError::Handler(_)));
        // The registry stays usable.
        assert!(registry.has_handler("explode"));
    }

    #[tokio::test]
    async fn test_options_merge_defaults_with_call_data() {
        // ARRANGE
        let mut defaults = Map::new();
        defaults.insert("foo".to_string(), json!({"timeout": 200, "label": "default"}));
        let registry = HandlerRegistry::with_defaults(&defaults);
        registry.register("foo", |_data, options: TaskOptions| async move {
            Ok(Value::Object(options.as_map().clone()))
        });

        // ACT
        let merged = registry.invoke("foo", json!({"timeout": 500})).await.unwrap();
        let plain = registry.invoke("foo", json!("not an object")).await.unwrap();

        // ASSERT
        assert_eq!(merged, json!({"timeout": 500, "label": "default"}));
        assert_eq!(plain, json!({"timeout": 200, "label": "default"}));
    }

    #[test]
    fn test_task_options_accessors() {
        let options = TaskOptions::merged(None, &json!({"timeout": 5, "name": "x"}));

        assert_eq!(options.get_u64("timeout"), Some(5));
        assert_eq!(options.get_str("name"), Some("x"));
        assert_eq!(options.get_u64("name"), None);
        assert!(options.get("missing").is_none());
    }

    #[tokio::test]
    async fn test_register_replaces_binding() {
        let registry = HandlerRegistry::new();
        registry.register("t", |_data, _options| async move { Ok(json!(1)) });
        registry.register("t", |_data, _options| async move { Ok(json!(2)) });

        assert_eq!(registry.handler_count(), 1);
        assert_eq!(registry.invoke("t", json!({})).await.unwrap(), json!(2));
    }

    // ============================================================
    // TEST 2: Dispatcher
    // ============================================================

    #[tokio::test]
    async fn test_item_without_task_is_acknowledged() {
        let store = MemoryStore::new();
        let conn: Arc<dyn SharedStore> = Arc::new(store.connect());
        let dispatcher = Dispatcher::new(conn, namespace(), echo_registry());

        let outcome = dispatcher.dispatch(&json!({"foo": 1})).await.unwrap();
        let undecodable = dispatcher.dispatch(&json!({"task": "echo"})).await.unwrap();

        assert_eq!(outcome, DispatchOutcome::Malformed);
        assert_eq!(undecodable, DispatchOutcome::Malformed);
    }

    #[tokio::test]
    async fn test_absent_client_skips_execution() {
        // ARRANGE
        let store = MemoryStore::new();
        let conn: Arc<dyn SharedStore> = Arc::new(store.connect());
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = HandlerRegistry::new();
        let counter = calls.clone();
        registry.register("count", move |_data, _options| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Null)
            }
        });
        let dispatcher = Dispatcher::new(conn, namespace(), registry);

        // ACT
        let outcome = dispatcher
            .dispatch(&task_item("ghost", "count", json!({}), "k1"))
            .await
            .unwrap();

        // ASSERT
        assert_eq!(outcome, DispatchOutcome::ClientGone(DispatchStage::BeforeExecution));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.snapshot("rpc/results/ghost"), None);
    }

    #[tokio::test]
    async fn test_client_leaving_during_execution_drops_result() {
        // ARRANGE
        let store = MemoryStore::new();
        let server_conn: Arc<dyn SharedStore> = Arc::new(store.connect());
        let client_conn = present_client(&store, "c1").await;

        let registry = HandlerRegistry::new();
        let leaving = client_conn.clone();
        registry.register("slow", move |_data, _options| {
            let leaving = leaving.clone();
            async move {
                leaving.disconnect();
                Ok(json!("done"))
            }
        });
        let dispatcher = Dispatcher::new(server_conn, namespace(), registry);

        // ACT
        let outcome = dispatcher
            .dispatch(&task_item("c1", "slow", json!({}), "k1"))
            .await
            .unwrap();

        // ASSERT
        assert_eq!(outcome, DispatchOutcome::ClientGone(DispatchStage::AfterExecution));
        assert_eq!(store.snapshot("rpc/clients/c1"), None);
        assert_eq!(store.snapshot("rpc/results/c1"), None);
    }

    #[tokio::test]
    async fn test_delivered_envelope() {
        // ARRANGE
        let store = MemoryStore::new();
        let server_conn: Arc<dyn SharedStore> = Arc::new(store.connect());
        let _client_conn = present_client(&store, "c1").await;
        let dispatcher = Dispatcher::new(server_conn, namespace(), echo_registry());

        // ACT
        let outcome = dispatcher
            .dispatch(&task_item("c1", "echo", json!({"v": 1}), "k1"))
            .await
            .unwrap();

        // ASSERT
        let DispatchOutcome::Delivered { result_key } = outcome else {
            panic!("expected a delivered result, got {:?}", outcome);
        };
        let record = store
            .snapshot(&format!("rpc/results/c1/{}", result_key))
            .unwrap();
        let envelope: ResultEnvelope = serde_json::from_value(record).unwrap();
        assert_eq!(envelope.client, "c1");
        assert_eq!(envelope.key, "k1");
        assert_eq!(envelope.data, Some(json!({"v": 1})));
        assert_eq!(envelope.error, None);
        assert!(envelope.created_at.unwrap() > 0);
    }

    #[tokio::test]
    async fn test_unknown_task_is_delivered_as_error() {
        let store = MemoryStore::new();
        let server_conn: Arc<dyn SharedStore> = Arc::new(store.connect());
        let _client_conn = present_client(&store, "c1").await;
        let dispatcher = Dispatcher::new(server_conn, namespace(), echo_registry());

        let outcome = dispatcher
            .dispatch(&task_item("c1", "nope", json!({}), "k1"))
            .await
            .unwrap();

        let DispatchOutcome::Delivered { result_key } = outcome else {
            panic!("expected a delivered result, got {:?}", outcome);
        };
        let record = store
            .snapshot(&format!("rpc/results/c1/{}", result_key))
            .unwrap();
        assert_eq!(
            serde_json::from_value::<RemoteError>(record["error"].clone()).unwrap(),
            RemoteError::Structured(TaskFailure {
                kind: FailureKind::UnknownTask,
                message: "nope".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_store_failure_at_liveness_check_is_an_error() {
        let store = MemoryStore::new();
        let server_conn: Arc<dyn SharedStore> = Arc::new(store.connect());
        let _client_conn = present_client(&store, "c1").await;
        let dispatcher = Dispatcher::new(server_conn, namespace(), echo_registry());
        store.set_fail_reads(true);

        let result = dispatcher
            .dispatch(&task_item("c1", "echo", json!({}), "k1"))
            .await;

        assert_matches!(result, Err(RpcError::Store(_)));
    }

    #[tokio::test]
    async fn test_store_failure_at_result_write_is_an_error() {
        let store = MemoryStore::new();
        let server_conn: Arc<dyn SharedStore> = Arc::new(store.connect());
        let _client_conn = present_client(&store, "c1").await;
        let dispatcher = Dispatcher::new(server_conn, namespace(), echo_registry());
        store.set_fail_writes(true);

        let result = dispatcher
            .dispatch(&task_item("c1", "echo", json!({}), "k1"))
            .await;

        assert_matches!(result, Err(RpcError::Store(_)));
    }

    // ============================================================
    // TEST 3: Result sweeper
    // ============================================================

    #[tokio::test]
    async fn test_sweeper_removes_only_expired_results() {
        // ARRANGE
        let store = MemoryStore::new();
        let conn: Arc<dyn SharedStore> = Arc::new(store.connect());
        let mut updates = BTreeMap::new();
        updates.insert(
            "rpc/results/c1/old".to_string(),
            json!({"client": "c1", "key": "a", "data": 1, "createdAt": 1}),
        );
        updates.insert(
            "rpc/results/c1/fresh".to_string(),
            json!({"client": "c1", "key": "b", "data": 2, "createdAt": now_ms()}),
        );
        updates.insert(
            "rpc/results/c2/unstamped".to_string(),
            json!({"client": "c2", "key": "c", "data": 3}),
        );
        conn.update(updates).await.unwrap();
        let sweeper = ResultSweeper::new(
            conn,
            namespace(),
            SweeperOptions {
                result_ttl_ms: 60_000,
                sweep_interval_ms: 1_000,
            },
        );

        // ACT
        let removed = sweeper.sweep_once().await.unwrap();

        // ASSERT
        assert_eq!(removed, 1);
        assert_eq!(store.snapshot("rpc/results/c1/old"), None);
        assert!(store.snapshot("rpc/results/c1/fresh").is_some());
        assert!(store.snapshot("rpc/results/c2/unstamped").is_some());
    }

    #[tokio::test]
    async fn test_sweeper_on_empty_tree() {
        let store = MemoryStore::new();
        let conn: Arc<dyn SharedStore> = Arc::new(store.connect());
        let sweeper = ResultSweeper::new(conn, namespace(), SweeperOptions::default());

        assert_eq!(sweeper.sweep_once().await.unwrap(), 0);
    }

    // ============================================================
    // TEST 4: Server
    // ============================================================

    #[test]
    fn test_server_requires_store() {
        let result = Server::new(ServerConfig::default());

        assert!(matches!(result, Err(RpcError::Config(_))));
    }

    #[tokio::test]
    async fn test_listen_dispatches_queued_tasks() {
        // ARRANGE
        let store = MemoryStore::new();
        let server_conn: Arc<dyn SharedStore> = Arc::new(store.connect());
        let client_conn = present_client(&store, "c1").await;
        let server = Server::new(ServerConfig::with_store(server_conn)).unwrap();
        server.task("echo", |data, _options| async move { Ok(data) });
        let listener = server
            .listen(Some(QueueOptions {
                num_workers: 2,
                ..QueueOptions::default()
            }))
            .await
            .unwrap();

        // ACT
        let mut updates = BTreeMap::new();
        updates.insert(
            "rpc/queue/tasks/k1".to_string(),
            task_item("c1", "echo", json!({"v": 1}), "k1"),
        );
        client_conn.update(updates).await.unwrap();

        // ASSERT
        let results = wait_for(|| store.snapshot("rpc/results/c1")).await;
        let (_, envelope) = results.as_object().unwrap().iter().next().unwrap();
        assert_eq!(envelope["key"], "k1");
        assert_eq!(envelope["data"], json!({"v": 1}));
        wait_for(|| {
            store
                .snapshot("rpc/queue/tasks/k1")
                .is_none()
                .then_some(Value::Null)
        })
        .await;
        assert_eq!(listener.queue().options().num_workers, 2);

        listener.shutdown().await;
    }
}
