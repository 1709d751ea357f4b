//! Queue-Backed RPC Library
//!
//! Remote procedure calls carried over a shared hierarchical store. Clients
//! write tasks into a durable queue; servers claim them, run the named handler
//! and append the outcome under the submitting client's results path. Every
//! client keeps an ephemeral presence record so servers can skip work whose
//! caller is already gone.
//!
//! ## Architecture Modules
//!
//! - **`store`**: The `SharedStore` connection trait and the in-memory backend
//!   (`MemoryStore`) with ephemeral paths and child-added subscriptions.
//! - **`presence`**: Client presence records and liveness checks.
//! - **`queue`**: A lease-based work queue with a worker pool, retries and
//!   dead-lettering.
//! - **`protocol`**: The task and result records exchanged through the store.
//! - **`client`**: Submission and result correlation.
//! - **`server`**: Handler registry, dispatch with liveness checks, and result
//!   expiry.
//! - **`config`** / **`error`**: Construction settings and the error type.

pub mod client;
pub mod config;
pub mod error;
pub mod presence;
pub mod protocol;
pub mod queue;
pub mod server;
pub mod store;

pub use client::correlator::Client;
pub use config::{ClientConfig, ServerConfig};
pub use error::RpcError;
pub use server::server::{Listener, Server};
pub use store::memory::MemoryStore;
pub use store::types::SharedStore;
