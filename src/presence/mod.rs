//! Presence Module
//!
//! Tracks which clients are still connected. Each client owns one ephemeral
//! record under `clients/{id}`; the store removes it (together with the
//! client's results collection) when the client's connection drops.
//!
//! ## Core Mechanisms
//! - **Registration**: The removal intent is attached before the record is
//!   written, so a record can never outlive the connection that wrote it.
//! - **Liveness check**: A single point read. Any value at the path counts as
//!   connected; only absence means disconnected. The answer is advisory: the
//!   client may vanish right after the check.

pub mod tracker;
pub mod types;
