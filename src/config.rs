//! Configuration
//!
//! Construction-time settings for `Client` and `Server`, plus the
//! environment-driven settings of the demo binary.

use crate::queue::types::QueueOptions;
use crate::server::sweeper::SweeperOptions;
use crate::store::types::SharedStore;

use serde_json::{Map, Value};
use std::sync::Arc;

/// Root path used when none is configured.
pub const DEFAULT_ROOT: &str = "rpc";

#[derive(Clone, Default)]
pub struct ClientConfig {
    /// The client's own store connection. Required.
    pub store: Option<Arc<dyn SharedStore>>,
    /// Path below which the protocol tree lives.
    pub root: String,
}

impl ClientConfig {
    pub fn with_store(store: Arc<dyn SharedStore>) -> Self {
        Self {
            store: Some(store),
            root: DEFAULT_ROOT.to_string(),
        }
    }

    pub fn root(mut self, root: &str) -> Self {
        self.root = root.to_string();
        self
    }
}

#[derive(Clone, Default)]
pub struct ServerConfig {
    /// The server's own store connection. Required.
    pub store: Option<Arc<dyn SharedStore>>,
    pub root: String,
    /// Worker pool used by `Server::listen` unless overridden there.
    pub queue: QueueOptions,
    /// Default handler options per task: `{ "<task>": { ... } }`.
    pub options: Map<String, Value>,
    /// Enables expiry of unread results.
    pub sweeper: Option<SweeperOptions>,
}

impl ServerConfig {
    pub fn with_store(store: Arc<dyn SharedStore>) -> Self {
        Self {
            store: Some(store),
            root: DEFAULT_ROOT.to_string(),
            ..Self::default()
        }
    }

    pub fn root(mut self, root: &str) -> Self {
        self.root = root.to_string();
        self
    }

    pub fn queue(mut self, queue: QueueOptions) -> Self {
        self.queue = queue;
        self
    }

    /// Sets the default options of one task.
    pub fn task_options(mut self, task: &str, options: Value) -> Self {
        self.options.insert(task.to_string(), options);
        self
    }

    pub fn sweeper(mut self, sweeper: SweeperOptions) -> Self {
        self.sweeper = Some(sweeper);
        self
    }
}

/// Settings of the demo binary, read from the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub root: String,
    pub workers: usize,
    /// Delay between two demo submissions.
    pub interval_ms: u64,
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds settings from any key lookup (the environment in production).
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let root = lookup("RPC_ROOT").unwrap_or_else(|| DEFAULT_ROOT.to_string());
        let workers = match lookup("RPC_WORKERS") {
            Some(raw) => raw
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid RPC_WORKERS '{}': {}", raw, e))?,
            None => 3,
        };
        let interval_ms = match lookup("RPC_INTERVAL_MS") {
            Some(raw) => raw
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid RPC_INTERVAL_MS '{}': {}", raw, e))?,
            None => 2_000,
        };

        Ok(Self {
            root,
            workers,
            interval_ms,
        })
    }
}
