use queue_rpc::config::{ClientConfig, ServerConfig, Settings};
use queue_rpc::queue::types::QueueOptions;
use queue_rpc::server::registry::TaskOptions;
use queue_rpc::server::sweeper::SweeperOptions;
use queue_rpc::{Client, MemoryStore, Server, SharedStore};

use rand::Rng;
use rand::seq::SliceRandom;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const TASK_NAMES: [&str; 3] = ["foo", "bar", "baz"];
const TIMEOUTS_MS: [u64; 4] = [500, 1_000, 2_000, 5_000];

/// Sleeps for the `timeout` option, then answers with its own name.
async fn demo_handler(name: &'static str, options: TaskOptions) -> anyhow::Result<Value> {
    let timeout = options.get_u64("timeout").unwrap_or(200);
    tracing::info!("Running {} for {}ms", name, timeout);
    tokio::time::sleep(Duration::from_millis(timeout)).await;
    let mut result = Map::new();
    result.insert(name.to_string(), Value::from(name));
    Ok(Value::Object(result))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = Settings::from_env()?;
    tracing::info!(
        "Starting demo under '{}' with {} workers",
        settings.root,
        settings.workers
    );

    // 1. Shared store; client and server each hold their own connection:
    let store = MemoryStore::new();
    let server_conn: Arc<dyn SharedStore> = Arc::new(store.connect());
    let client_conn: Arc<dyn SharedStore> = Arc::new(store.connect());

    // 2. Server:
    let mut config = ServerConfig::with_store(server_conn)
        .root(&settings.root)
        .queue(QueueOptions {
            num_workers: settings.workers,
            ..QueueOptions::default()
        })
        .sweeper(SweeperOptions::default());
    for name in TASK_NAMES {
        config = config.task_options(name, json!({ "timeout": 200 }));
    }

    let server = Server::new(config)?;
    for name in TASK_NAMES {
        server.task(name, move |_data, options| demo_handler(name, options));
    }
    let listener = server.listen(None).await?;

    // 3. Client:
    let client = Arc::new(Client::new(
        ClientConfig::with_store(client_conn).root(&settings.root),
    )?);
    let session = client.connect().await?;
    tracing::info!("Client session {}", session);

    let interval_ms = settings.interval_ms;
    let caller = client.clone();
    let calls = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));

        loop {
            interval.tick().await;
            let (name, timeout) = {
                let mut rng = rand::thread_rng();
                let name = TASK_NAMES.choose(&mut rng).copied().unwrap_or("foo");
                let timeout = TIMEOUTS_MS[rng.gen_range(0..TIMEOUTS_MS.len())];
                (name, timeout)
            };

            let caller = caller.clone();
            tokio::spawn(async move {
                let started = std::time::Instant::now();
                match caller.run(name, json!({ "timeout": timeout })).await {
                    Ok(result) => tracing::info!(
                        "{} -> {} in {}ms",
                        name,
                        result,
                        started.elapsed().as_millis()
                    ),
                    Err(e) => tracing::warn!("{} failed: {}", name, e),
                }
            });
        }
    });

    // 4. Stats reporter:
    let stats_store = store.clone();
    let root = settings.root.clone();
    let stats = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));

        loop {
            interval.tick().await;
            let queued = stats_store
                .snapshot(&format!("{}/queue/tasks", root))
                .and_then(|tasks| tasks.as_object().map(|tasks| tasks.len()))
                .unwrap_or(0);
            let clients = stats_store
                .snapshot(&format!("{}/clients", root))
                .and_then(|clients| clients.as_object().map(|clients| clients.len()))
                .unwrap_or(0);
            tracing::info!("Queue stats: {} items, {} connected clients", queued, clients);
        }
    });

    tracing::info!("Press Ctrl+C to shutdown");
    tokio::signal::ctrl_c().await?;

    calls.abort();
    stats.abort();
    match listener.queue().counts().await {
        Ok(counts) => tracing::info!(
            "Shutting down: {} pending, {} in progress, {} failed",
            counts.pending,
            counts.in_progress,
            counts.failed
        ),
        Err(e) => tracing::warn!("Could not read queue counts: {}", e),
    }
    listener.shutdown().await;

    Ok(())
}
