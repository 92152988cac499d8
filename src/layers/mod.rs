//! Benchmark layers wrapping the timed compute primitives.
//!
//! Each layer owns its output buffers and learnable parameters, while
//! input buffers are either allocated by the layer itself (standalone
//! mode) or shared with the previous layer's outputs through chunk ids
//! (chained mode). Layers follow a strict two-phase protocol: `setup`
//! resolves shapes and allocates memory, `forward` runs the timed kernel.

mod activation;
mod convolution;
mod fully_connected;
mod lrn;
mod pooling;
mod softmax;

pub use activation::ActivationLayer;
pub use convolution::ConvolutionLayer;
pub use fully_connected::FullyConnectedLayer;
pub use lrn::LrnLayer;
pub use pooling::PoolingLayer;
pub use softmax::SoftmaxLayer;

use std::cell::RefCell;
use std::rc::Rc;

use log::debug;

use crate::backend::BackendError;
use crate::config::{LayerConfig, LayerParams};
use crate::data_manager::{Data, DataManager};
use crate::handle::Handle;
use crate::shape::{DataDim, TensorDesc};

/// Closed set of benchmarkable primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    Convolution,
    Pooling,
    Activation,
    Lrn,
    FullyConnected,
    Softmax,
}

/// One benchmarkable layer.
pub trait Layer {
    fn kind(&self) -> LayerKind;

    fn base(&self) -> &LayerBase;

    fn base_mut(&mut self) -> &mut LayerBase;

    /// Resolves shapes, allocates buffers and negotiates with the backend.
    /// Must run exactly once, after any chaining via
    /// [`LayerBase::bind_input`].
    fn setup(&mut self, handle: &Handle, manager: &mut DataManager) -> Result<(), BackendError>;

    /// Runs the timed forward kernel over every input buffer.
    fn forward(&mut self, handle: &Handle) -> Result<(), BackendError>;

    /// Backward pass. Layers without one are free to leave this empty.
    fn backward(&mut self, _handle: &Handle) -> Result<(), BackendError> {
        Ok(())
    }

    /// Output shape, available once `setup` has run.
    fn output_dim(&self) -> DataDim;

    /// Chunk ids of the output buffers, for chaining into the next layer.
    fn top_chunk_ids(&self) -> &[usize];

    fn top_diff_chunk_ids(&self) -> &[usize];

    fn has_learnable_params(&self) -> bool {
        false
    }
}

/// State common to every layer: identity, chaining and input buffers.
pub struct LayerBase {
    layer_id: usize,
    name: String,
    previous_layer_name: Option<String>,
    input_dim: DataDim,
    bound_dim: Option<DataDim>,
    bottom_desc: Option<TensorDesc>,
    num_inputs: usize,
    bottoms: Vec<Rc<RefCell<Data>>>,
    bottom_chunk_ids: Vec<usize>,
    bottom_diffs: Vec<Rc<RefCell<Data>>>,
    bottom_diff_chunk_ids: Vec<usize>,
}

impl LayerBase {
    pub fn from_config(layer_id: usize, config: &LayerConfig) -> Self {
        Self {
            layer_id,
            name: config.name.clone(),
            previous_layer_name: config.previous.clone(),
            input_dim: config.input_dim(),
            bound_dim: None,
            bottom_desc: None,
            num_inputs: 1,
            bottoms: Vec::new(),
            bottom_chunk_ids: Vec::new(),
            bottom_diffs: Vec::new(),
            bottom_diff_chunk_ids: Vec::new(),
        }
    }

    pub fn layer_id(&self) -> usize {
        self.layer_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn previous_layer_name(&self) -> Option<&str> {
        self.previous_layer_name.as_deref()
    }

    /// True when this layer allocates its own inputs rather than sharing
    /// the previous layer's outputs.
    pub fn is_standalone(&self) -> bool {
        self.bound_dim.is_none()
    }

    /// Adopts the previous layer's output shape and buffers. The layer
    /// will skip its own input allocation during setup.
    pub fn bind_input(
        &mut self,
        dim: DataDim,
        top_chunk_ids: &[usize],
        top_diff_chunk_ids: &[usize],
        manager: &DataManager,
    ) {
        self.bound_dim = Some(dim);
        self.bottom_chunk_ids = top_chunk_ids.to_vec();
        self.bottoms = top_chunk_ids.iter().map(|&id| manager.get_data(id)).collect();
        self.bottom_diff_chunk_ids = top_diff_chunk_ids.to_vec();
        self.bottom_diffs = top_diff_chunk_ids
            .iter()
            .map(|&id| manager.get_data(id))
            .collect();
    }

    /// Allocates input buffers in standalone mode and records the input
    /// descriptor. Returns the effective input shape.
    pub fn setup(&mut self, manager: &mut DataManager) -> Result<DataDim, BackendError> {
        let dim = self.bound_dim.unwrap_or(self.input_dim);
        if !dim.is_fully_specified() {
            return Err(BackendError::BadParam {
                call: "layer_setup",
                message: format!(
                    "layer {} has no fully specified input shape and no previous layer",
                    self.name
                ),
            });
        }

        if self.is_standalone() {
            for _ in 0..self.num_inputs {
                let id = manager.create_data(dim.size());
                self.bottom_chunk_ids.push(id);
                self.bottoms.push(manager.get_data(id));

                let diff_id = manager.create_data(dim.size());
                self.bottom_diff_chunk_ids.push(diff_id);
                self.bottom_diffs.push(manager.get_data(diff_id));
            }
            debug!(
                "layer {} allocated {} input buffer(s) of {} elements",
                self.name,
                self.num_inputs,
                dim.size()
            );
        }

        self.bottom_desc = Some(TensorDesc::from_dim(&dim));
        Ok(dim)
    }

    pub fn num_inputs(&self) -> usize {
        self.num_inputs
    }

    pub fn bottoms(&self) -> &[Rc<RefCell<Data>>] {
        &self.bottoms
    }

    pub fn bottom_chunk_ids(&self) -> &[usize] {
        &self.bottom_chunk_ids
    }

    pub fn bottom_diffs(&self) -> &[Rc<RefCell<Data>>] {
        &self.bottom_diffs
    }

    pub fn bottom_diff_chunk_ids(&self) -> &[usize] {
        &self.bottom_diff_chunk_ids
    }

    /// Input descriptor; setup must have run.
    pub fn bottom_desc(&self) -> TensorDesc {
        self.bottom_desc.expect("setup must run before forward")
    }

    /// Refills every input buffer with a fresh synthetic batch.
    pub fn fill_bottoms(&self) {
        for bottom in &self.bottoms {
            bottom.borrow_mut().filler();
        }
    }
}

/// Output-side buffers shared by every layer implementation.
#[derive(Default)]
pub struct TopBlobs {
    tops: Vec<Rc<RefCell<Data>>>,
    top_chunk_ids: Vec<usize>,
    top_diffs: Vec<Rc<RefCell<Data>>>,
    top_diff_chunk_ids: Vec<usize>,
}

impl TopBlobs {
    pub fn allocate(&mut self, manager: &mut DataManager, size: usize, count: usize) {
        for _ in 0..count {
            let id = manager.create_data(size);
            self.top_chunk_ids.push(id);
            self.tops.push(manager.get_data(id));

            let diff_id = manager.create_data(size);
            self.top_diff_chunk_ids.push(diff_id);
            self.top_diffs.push(manager.get_data(diff_id));
        }
    }

    pub fn tops(&self) -> &[Rc<RefCell<Data>>] {
        &self.tops
    }

    pub fn top_chunk_ids(&self) -> &[usize] {
        &self.top_chunk_ids
    }

    pub fn top_diffs(&self) -> &[Rc<RefCell<Data>>] {
        &self.top_diffs
    }

    pub fn top_diff_chunk_ids(&self) -> &[usize] {
        &self.top_diff_chunk_ids
    }
}

/// Builds the layer implementation matching the config's `type` tag.
pub fn create_layer(layer_id: usize, config: &LayerConfig) -> Box<dyn Layer> {
    match &config.params {
        LayerParams::Convolution(param) => {
            Box::new(ConvolutionLayer::new(layer_id, config, param.clone()))
        }
        LayerParams::Pooling(param) => {
            Box::new(PoolingLayer::new(layer_id, config, param.clone()))
        }
        LayerParams::Activation(param) => {
            Box::new(ActivationLayer::new(layer_id, config, param.clone()))
        }
        LayerParams::Lrn(param) => Box::new(LrnLayer::new(layer_id, config, param.clone())),
        LayerParams::FullyConnected(param) => {
            Box::new(FullyConnectedLayer::new(layer_id, config, param.clone()))
        }
        LayerParams::Softmax(param) => {
            Box::new(SoftmaxLayer::new(layer_id, config, param.clone()))
        }
    }
}
