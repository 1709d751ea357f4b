//! Error Taxonomy
//!
//! Errors surfaced by the client and server facades. Store failures carry the
//! underlying `StoreError`; handler failures travel as data inside the result
//! envelope and are rebuilt into `RpcError` on the client side.

use crate::store::types::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RpcError {
    /// A required collaborator was not supplied at construction time.
    #[error("configuration error: {0}")]
    Config(String),

    /// No handler is bound to the requested task name.
    #[error("unknown task: {0}")]
    UnknownTask(String),

    /// The handler ran and reported a failure.
    #[error("task failed: {0}")]
    Handler(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),

    /// A record read from the store did not have the expected shape.
    #[error("malformed record at {path}: {reason}")]
    Malformed { path: String, reason: String },
}

impl RpcError {
    pub fn missing_store() -> Self {
        Self::Config("expected `store` to be a shared store connection".to_string())
    }
}
