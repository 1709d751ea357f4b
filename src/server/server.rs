use super::dispatcher::Dispatcher;
use super::registry::{HandlerRegistry, TaskOptions};
use super::sweeper::ResultSweeper;
use crate::config::ServerConfig;
use crate::error::RpcError;
use crate::queue::executor::TaskQueue;
use crate::queue::types::QueueOptions;
use crate::store::path::Namespace;
use crate::store::types::SharedStore;

use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Executes tasks submitted by clients.
pub struct Server {
    store: Arc<dyn SharedStore>,
    namespace: Namespace,
    registry: Arc<HandlerRegistry>,
    config: ServerConfig,
}

impl Server {
    /// Fails with `RpcError::Config` if `config.store` is missing.
    pub fn new(config: ServerConfig) -> Result<Self, RpcError> {
        let store = config.store.clone().ok_or_else(RpcError::missing_store)?;

        Ok(Self {
            store,
            namespace: Namespace::new(&config.root),
            registry: HandlerRegistry::with_defaults(&config.options),
            config,
        })
    }

    /// Binds `handler` to the task name `name`.
    pub fn task<F, Fut>(&self, name: &str, handler: F) -> &Self
    where
        F: Fn(Value, TaskOptions) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.registry.register(name, handler);
        self
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(self.store.clone(), self.namespace.clone(), self.registry.clone())
    }

    /// Starts consuming the task queue.
    ///
    /// `options` replaces the configured queue options for this listener.
    pub async fn listen(&self, options: Option<QueueOptions>) -> Result<Listener, RpcError> {
        let options = options.unwrap_or_else(|| self.config.queue.clone());
        let queue = TaskQueue::start(
            self.store.clone(),
            &self.namespace.queue_tasks(),
            options,
            Arc::new(self.dispatcher()),
        )
        .await?;

        let sweeper = self.config.sweeper.clone().map(|options| {
            ResultSweeper::new(self.store.clone(), self.namespace.clone(), options).spawn()
        });

        tracing::info!(
            "Server listening on {} with handlers {:?}",
            self.namespace.queue_tasks(),
            self.registry.list_handlers()
        );

        Ok(Listener { queue, sweeper })
    }
}

/// A running server: its queue consumer and optional result sweeper.
pub struct Listener {
    queue: TaskQueue,
    sweeper: Option<JoinHandle<()>>,
}

impl Listener {
    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    /// Stops the sweeper and waits for in-flight tasks.
    pub async fn shutdown(self) {
        if let Some(sweeper) = self.sweeper {
            sweeper.abort();
        }
        self.queue.shutdown().await;
    }
}
