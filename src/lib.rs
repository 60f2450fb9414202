//! Execution core of a mini-batch training engine.
//!
//! The crate is split the same way the runtime is:
//! - [`data`] holds the compact instance store and the batch source that
//!   feeds mini-batches into the graph,
//! - [`layer`] defines the computation-graph interface plus the pooling
//!   reference layer,
//! - [`updater`] applies accumulated gradients, either synchronously or
//!   overlapped with backprop through a parameter store.

pub mod data;
pub mod error;
pub mod layer;
pub mod updater;

pub use error::{NetErr, Result};
