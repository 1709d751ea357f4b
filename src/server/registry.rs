//! Task Handler Registry
//!
//! Maps task names to async handlers owned by one `Server`. Handlers receive
//! the call's `data` together with a `TaskOptions` value assembled here: the
//! configured defaults for that task, shallow-merged with the call's `data`
//! object (the call wins).

use crate::error::RpcError;

use dashmap::DashMap;
use serde_json::{Map, Value};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Type alias for a thread-safe, asynchronous task handler function.
pub type TaskHandlerFn = Arc<
    dyn Fn(Value, TaskOptions) -> Pin<Box<dyn Future<Output = anyhow::Result<Value>> + Send>>
        + Send
        + Sync,
>;

/// Options handed to a handler invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskOptions(Map<String, Value>);

impl TaskOptions {
    /// Shallow merge: every top-level key of an object `overrides` replaces
    /// the default of the same name.
    pub fn merged(defaults: Option<&Map<String, Value>>, overrides: &Value) -> Self {
        let mut options = defaults.cloned().unwrap_or_default();
        if let Value::Object(call) = overrides {
            for (key, value) in call {
                options.insert(key.clone(), value.clone());
            }
        }
        Self(options)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.0.get(key).and_then(Value::as_u64)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

/// Registry holding the mapping between task names and their implementation.
pub struct HandlerRegistry {
    handlers: DashMap<String, TaskHandlerFn>,
    /// Default options per task name.
    defaults: DashMap<String, Map<String, Value>>,
}

impl HandlerRegistry {
    /// Creates a new, empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Creates a registry with per-task default options.
    ///
    /// `defaults` maps a task name to an options object; entries that are not
    /// objects are ignored.
    pub fn with_defaults(defaults: &Map<String, Value>) -> Arc<Self> {
        let registry = Self::default();
        for (name, options) in defaults {
            match options {
                Value::Object(options) => {
                    registry.defaults.insert(name.clone(), options.clone());
                }
                _ => tracing::warn!("Ignoring non-object default options for task '{}'", name),
            }
        }
        Arc::new(registry)
    }

    /// Registers a handler under `name`, replacing any previous binding.
    pub fn register<F, Fut>(&self, name: &str, handler: F)
    where
        F: Fn(Value, TaskOptions) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let handler_fn: TaskHandlerFn = Arc::new(move |data, options| {
            Box::pin(handler(data, options))
                as Pin<Box<dyn Future<Output = anyhow::Result<Value>> + Send>>
        });

        self.handlers.insert(name.to_string(), handler_fn);

        tracing::info!("Registered task handler: {}", name);
    }

    /// Replaces the default options of one task.
    pub fn set_defaults(&self, name: &str, options: Map<String, Value>) {
        self.defaults.insert(name.to_string(), options);
    }

    /// Builds the options a handler for `name` receives for this call.
    pub fn options_for(&self, name: &str, data: &Value) -> TaskOptions {
        let defaults = self.defaults.get(name);
        TaskOptions::merged(defaults.as_deref(), data)
    }

    /// Looks up `name` and runs its handler.
    ///
    /// # Returns
    /// * `Ok(value)` with the handler's result, unmodified.
    /// * `Err(RpcError::UnknownTask)` if nothing is bound to `name`.
    /// * `Err(RpcError::Handler)` if the handler failed or panicked.
    pub async fn invoke(&self, name: &str, data: Value) -> Result<Value, RpcError> {
        // Clone out of the map so no shard lock is held across the await.
        let handler_fn = match self.handlers.get(name) {
            Some(entry) => entry.value().clone(),
            None => {
                tracing::warn!("Unknown task handler: {}", name);
                return Err(RpcError::UnknownTask(name.to_string()));
            }
        };

        let options = self.options_for(name, &data);
        tracing::debug!("Executing task '{}' (payload size: {} bytes)", name, data.to_string().len());

        // A panicking handler surfaces as a task error, not a dead worker.
        match tokio::spawn(handler_fn(data, options)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(RpcError::Handler(format!("{:#}", e))),
            Err(e) => {
                tracing::error!("Handler '{}' did not complete: {}", name, e);
                Err(RpcError::Handler(format!("handler '{}' panicked", name)))
            }
        }
    }

    /// Returns a list of all registered handler names.
    pub fn list_handlers(&self) -> Vec<String> {
        self.handlers
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Checks if a handler is registered.
    pub fn has_handler(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Returns the total number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self {
            handlers: DashMap::new(),
            defaults: DashMap::new(),
        }
    }
}
