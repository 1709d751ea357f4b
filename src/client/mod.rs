//! Client Module
//!
//! The calling side of the protocol. A `Client` owns one session: it marks
//! itself present, enqueues tasks, and correlates the results servers append
//! to its results path back to the call that is waiting for them.
//!
//! ## Responsibilities
//! - **Session**: One presence record per client, created on first use and
//!   removed by the store when the connection drops.
//! - **Submission**: Each call writes its task and refreshes `lastActivity`
//!   in a single atomic update.
//! - **Correlation**: Each call listens for the one result carrying its key,
//!   stops listening, deletes the result, and settles exactly once.
//!
//! ## Submodules
//! - **`correlator`**: The `Client` facade and its `run` call.
//! - **`watcher`**: A subscription that ends after its first match.

pub mod correlator;
pub mod watcher;
