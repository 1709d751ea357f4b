//! Server Module
//!
//! The server side of the protocol: it consumes the task queue, runs the named
//! handler, and appends the outcome to the submitting client's results, but
//! only while that client is still present.
//!
//! ## Submodules
//! - **`registry`**: Maps task names to handlers and assembles their options.
//! - **`dispatcher`**: The per-item state machine with its two liveness checks.
//! - **`sweeper`**: Expires results no client ever read.
//! - **`server`**: The `Server` facade wiring registry, dispatcher and queue.

pub mod dispatcher;
pub mod registry;
pub mod server;
pub mod sweeper;

#[cfg(test)]
mod tests;
