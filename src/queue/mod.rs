//! Durable Task Queue Module
//!
//! A work queue whose items live under one store path. Producers simply write
//! items there; any number of consumers share them through a lease-based
//! claim protocol.
//!
//! ## Architecture Overview
//! 1. **Submission**: A producer writes an item at `{tasks}/{pushKey}`.
//! 2. **Claiming**: A worker atomically marks the item `in_progress` under its
//!    own owner name and a timestamp (the lease).
//! 3. **Processing**: The item is handed to a `Processor` with a `Job` handle
//!    exposing `progress`, `resolve` and `reject`.
//! 4. **Leasing**: While the processor runs the lease is renewed. If the
//!    worker dies the lease expires and another worker reclaims the item
//!    (at-least-once under failure, exactly-once otherwise).
//! 5. **Completion**: Resolved items are removed. Rejected items are retried
//!    up to `retries` times and then parked in the `error` state.
//!
//! ## Submodules
//! - **`types`**: Options, item states, bookkeeping fields and errors.
//! - **`queue`**: Store-side lease operations (claim, renew, resolve, reject).
//! - **`job`**: The `Processor` trait and the per-delivery `Job` handle.
//! - **`executor`**: The worker pool (`TaskQueue`).

pub mod executor;
pub mod job;
pub mod queue;
pub mod types;
