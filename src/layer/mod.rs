pub mod param;
pub mod pooling;

pub use param::LayerParam;
pub use pooling::{PoolKind, PoolingLayer};

use ndarray::{Array4, ArrayView2};

use crate::error::Result;

/// The unit flowing between layers in the computation graph: a rank-4
/// tensor (batch × channel × height × width) plus shape accessors.
///
/// A layer owns the nodes it produces; nodes it consumes are borrowed from
/// the preceding layer. By convention the same buffer carries activations
/// after forward and gradients during the backward pass.
#[derive(Debug, Clone)]
pub struct Node {
    pub data: Array4<f32>,
}

impl Node {
    pub fn new(batch: usize, channels: usize, height: usize, width: usize) -> Self {
        Self {
            data: Array4::zeros((batch, channels, height, width)),
        }
    }

    pub fn shape(&self) -> (usize, usize, usize, usize) {
        self.data.dim()
    }

    pub fn batch_size(&self) -> usize {
        self.data.dim().0
    }
}

/// Per-connection scratch state a layer allocates when shapes are
/// established and reuses across forward/backward calls.
///
/// Invalidated and resized on batch-size or input-shape changes only, never
/// per batch. Exclusively owned by one layer instance.
#[derive(Debug, Default)]
pub struct ConnectState {
    pub states: Vec<Array4<f32>>,
}

/// Callback over the learnable tensors a layer or updater owns, used for
/// checkpointing and inspection without exposing storage layout.
pub trait Visitor {
    fn visit(&mut self, name: &str, weight: ArrayView2<f32>, grad: ArrayView2<f32>);
}

/// The unit of computation in the network graph.
///
/// One primary compute thread drives forward in graph order and backprop in
/// reverse order; there is no concurrency within a single call.
pub trait Layer {
    /// Configures the layer; unrecognized keys are silently ignored.
    fn set_param(&mut self, name: &str, val: &str);

    /// Validates connection arity, infers the output shape from the input
    /// shape and configuration, and allocates scratch buffers.
    fn init_connection(
        &mut self,
        nodes_in: &[Node],
        nodes_out: &mut [Node],
        state: &mut ConnectState,
    ) -> Result<()>;

    /// Resizes the batch-size-dependent dimension of cached state, without a
    /// full topology re-init. Node shapes have already been adjusted.
    fn on_batch_size_changed(
        &mut self,
        nodes_in: &[Node],
        nodes_out: &[Node],
        state: &mut ConnectState,
    );

    /// Computes outputs from inputs and state. Must not mutate inputs unless
    /// the concrete layer documents it.
    fn forward(
        &mut self,
        is_train: bool,
        nodes_in: &mut [Node],
        nodes_out: &mut [Node],
        state: &mut ConnectState,
    ) -> Result<()>;

    /// Consumes the upstream gradient held in the output nodes and, when
    /// `prop_grad` is set, writes the input gradient into the input nodes.
    /// Input/leaf layers pass `prop_grad = false` to skip the work.
    fn backprop(
        &mut self,
        prop_grad: bool,
        nodes_in: &mut [Node],
        nodes_out: &mut [Node],
        state: &mut ConnectState,
    ) -> Result<()>;

    /// Exposes internal weight/bias tensors to a visitor.
    fn apply_visitor(&mut self, visitor: &mut dyn Visitor);
}
