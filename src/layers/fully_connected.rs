//! Fully-connected layer: one GEMM over the flattened input, no bias.

use std::cell::RefCell;
use std::rc::Rc;

use crate::backend::BackendError;
use crate::config::LayerConfig;
use crate::data_manager::{Data, DataManager};
use crate::handle::Handle;
use crate::params::FullyConnectedParam;
use crate::shape::{DataDim, TensorDesc};

use super::{Layer, LayerBase, LayerKind, TopBlobs};

pub struct FullyConnectedLayer {
    base: LayerBase,
    param: FullyConnectedParam,
    tops: TopBlobs,
    weights: Option<Rc<RefCell<Data>>>,
    weight_chunk_id: Option<usize>,
    weight_diff_chunk_id: Option<usize>,
    top_desc: Option<TensorDesc>,
    output_dim: Option<DataDim>,
}

impl FullyConnectedLayer {
    pub fn new(layer_id: usize, config: &LayerConfig, param: FullyConnectedParam) -> Self {
        Self {
            base: LayerBase::from_config(layer_id, config),
            param,
            tops: TopBlobs::default(),
            weights: None,
            weight_chunk_id: None,
            weight_diff_chunk_id: None,
            top_desc: None,
            output_dim: None,
        }
    }

    pub fn weight_chunk_id(&self) -> Option<usize> {
        self.weight_chunk_id
    }

    pub fn weight_diff_chunk_id(&self) -> Option<usize> {
        self.weight_diff_chunk_id
    }
}

impl Layer for FullyConnectedLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::FullyConnected
    }

    fn base(&self) -> &LayerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn setup(&mut self, _handle: &Handle, manager: &mut DataManager) -> Result<(), BackendError> {
        let in_dim = self.base.setup(manager)?;

        // Every output neuron sees the whole flattened image.
        let out_dim = DataDim::new(in_dim.n, self.param.output_num, 1, 1);
        let weight_count = self.param.output_num * in_dim.c * in_dim.h * in_dim.w;

        self.tops
            .allocate(manager, out_dim.size(), self.base.num_inputs());

        let weight_id = manager.create_data(weight_count);
        self.weight_chunk_id = Some(weight_id);
        self.weights = Some(manager.get_data(weight_id));
        self.weight_diff_chunk_id = Some(manager.create_data(weight_count));

        self.top_desc = Some(TensorDesc::from_dim(&out_dim));
        self.output_dim = Some(out_dim);
        Ok(())
    }

    fn forward(&mut self, handle: &Handle) -> Result<(), BackendError> {
        let bottom_desc = self.base.bottom_desc();
        let top_desc = self.top_desc.expect("setup must run before forward");

        let weights = self.weights.as_ref().expect("setup must run before forward");
        weights.borrow_mut().filler();
        self.base.fill_bottoms();

        let weights = weights.borrow();
        for (bottom, top) in self.base.bottoms().iter().zip(self.tops.tops().iter()) {
            let bottom = bottom.borrow();
            let mut top = top.borrow_mut();
            handle.backend().fully_connected_forward(
                weights.as_slice(),
                self.param.output_num,
                &bottom_desc,
                bottom.as_slice(),
                &top_desc,
                top.as_mut_slice(),
            )?;
        }
        Ok(())
    }

    fn output_dim(&self) -> DataDim {
        self.output_dim.expect("setup must run before forward")
    }

    fn top_chunk_ids(&self) -> &[usize] {
        self.tops.top_chunk_ids()
    }

    fn top_diff_chunk_ids(&self) -> &[usize] {
        self.tops.top_diff_chunk_ids()
    }

    fn has_learnable_params(&self) -> bool {
        true
    }
}
