//! Shared Store Module
//!
//! The hierarchical key-value store every other subsystem is layered on.
//! Clients and servers never talk to each other directly: they append records
//! to well-known paths and react to child-added notifications.
//!
//! ## Core Concepts
//! - **Connection**: A `SharedStore` value is one connection. Ephemeral paths
//!   registered through it are removed when that connection drops.
//! - **Push keys**: `push_key` yields 20-character keys that sort in creation
//!   order, so queue and result collections are naturally time-ordered.
//! - **Atomic writes**: `update` applies a set of paths as one step; `transaction`
//!   is a read-modify-write on a single path, used by the queue for leases.
//! - **Notifications**: `subscribe_child_added` replays existing children and then
//!   streams each child that appears afterwards.
//!
//! ## Submodules
//! - **`types`**: The `SharedStore` contract, snapshots, subscriptions and errors.
//! - **`path`**: Path helpers and the `Namespace` that lays out the RPC tree.
//! - **`push_id`**: The monotonic push-key generator.
//! - **`memory`**: An in-process store with per-connection ephemeral semantics.

pub mod memory;
pub mod path;
pub mod push_id;
pub mod types;

#[cfg(test)]
mod tests;
