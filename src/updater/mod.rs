pub mod async_ps;
pub mod key;
pub mod sgd;
pub mod store;

pub use async_ps::AsyncPsUpdater;
pub use key::{decode_tag, encode_data_key, DATA_KEY_STEP};
pub use sgd::SgdUpdater;
pub use store::{LocalStore, ParamStore};

use std::sync::Arc;

use ndarray::{Array2, ArrayView2};
use parking_lot::Mutex;

use crate::error::Result;
use crate::layer::{Node, Visitor};

/// One learnable parameter: a 2-D weight tensor with a same-shape gradient
/// accumulator.
///
/// The layer side accumulates into `grad` during backprop; the updater
/// consumes it. Shared behind a lock because the asynchronous updater's
/// apply path runs off the compute thread.
#[derive(Debug)]
pub struct ParamBlock {
    pub weight: Array2<f32>,
    pub grad: Array2<f32>,
}

impl ParamBlock {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            weight: Array2::zeros((rows, cols)),
            grad: Array2::zeros((rows, cols)),
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        self.weight.dim()
    }
}

pub type SharedParam = Arc<Mutex<ParamBlock>>;

pub fn shared_param(rows: usize, cols: usize) -> SharedParam {
    Arc::new(Mutex::new(ParamBlock::new(rows, cols)))
}

/// Applies accumulated gradients to one weight tensor.
///
/// `epoch` counts mini-batch steps; `round` counts full passes over the
/// dataset (schedules decay by round).
pub trait Updater {
    /// One-time setup; logs what the updater will do.
    fn init(&mut self);

    /// Configures optimizer hyperparameters; unrecognized keys are ignored.
    fn set_param(&mut self, name: &str, val: &str);

    /// Signals a new full pass over the dataset.
    fn start_round(&mut self, round: usize);

    /// Applies one optimizer step using the accumulated gradient.
    fn update(&mut self, epoch: u64) -> Result<()>;

    /// Applies one optimizer step using an externally supplied gradient.
    fn update_with(&mut self, epoch: u64, grad: ArrayView2<f32>) -> Result<()>;

    /// Exposes the weight for inspection without revealing storage layout.
    fn apply_visitor(&mut self, visitor: &mut dyn Visitor);
}

/// Updater that overlaps gradient communication with the backward pass of
/// earlier layers.
///
/// The bracket calls are the only synchronization points with the secondary
/// apply channel: `after_backprop` puts the update for layer `k` in flight
/// while layer `k-1`'s backward computes on the main thread. The inherited
/// synchronous `update`/`update_with` must fail on implementations of this
/// trait; at most one update per weight may be in flight at a time.
pub trait AsyncUpdater: Updater {
    /// Called once before any layer's forward pass in a step; pulls the
    /// latest parameter value from the remote store before it is read.
    fn before_all_forward(&mut self) -> Result<()>;

    /// Called immediately before the owning layer's backward call.
    fn before_backprop(&mut self, nodes_in: &[Node], nodes_out: &[Node]);

    /// Called immediately after the owning layer's backward call; enqueues
    /// the gradient push. Fails if an update is already in flight.
    fn after_backprop(&mut self, do_update: bool, epoch: u64) -> Result<()>;

    /// Blocks until the in-flight apply completes; returns immediately when
    /// nothing is outstanding.
    fn update_wait(&mut self) -> Result<()>;
}
