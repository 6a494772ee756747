//! Synchronizer decision core.
//!
//! This module holds the **Functional Core** of the blockchain synchronizer:
//! the lifecycle state machine and the reconciliation arithmetic.
//!
//! # Architecture guarantees
//! * **No Network**: node calls live in `runtime`.
//! * **No Threads**: the worker thread, locks and condition variable live in `runtime`.
//! * **Deterministic**: transitions depend only on the state pair, so they are tested without a node.

pub mod logic;
pub mod state;
pub mod types;

#[cfg(test)]
mod tests;

pub use crate::sync::engine::state::LifecycleState;
pub use crate::sync::engine::types::{Action, ObserverChange, State, Transition, UpdateConsumersResult};
