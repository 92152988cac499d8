//! Softmax layer. Shape-preserving.

use crate::backend::BackendError;
use crate::config::LayerConfig;
use crate::data_manager::DataManager;
use crate::handle::Handle;
use crate::params::SoftmaxParam;
use crate::shape::{DataDim, TensorDesc};

use super::{Layer, LayerBase, LayerKind, TopBlobs};

pub struct SoftmaxLayer {
    base: LayerBase,
    param: SoftmaxParam,
    tops: TopBlobs,
    desc: Option<TensorDesc>,
    output_dim: Option<DataDim>,
}

impl SoftmaxLayer {
    pub fn new(layer_id: usize, config: &LayerConfig, param: SoftmaxParam) -> Self {
        Self {
            base: LayerBase::from_config(layer_id, config),
            param,
            tops: TopBlobs::default(),
            desc: None,
            output_dim: None,
        }
    }
}

impl Layer for SoftmaxLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::Softmax
    }

    fn base(&self) -> &LayerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn setup(&mut self, _handle: &Handle, manager: &mut DataManager) -> Result<(), BackendError> {
        let in_dim = self.base.setup(manager)?;
        self.tops
            .allocate(manager, in_dim.size(), self.base.num_inputs());
        self.desc = Some(TensorDesc::from_dim(&in_dim));
        self.output_dim = Some(in_dim);
        Ok(())
    }

    fn forward(&mut self, handle: &Handle) -> Result<(), BackendError> {
        let desc = self.desc.expect("setup must run before forward");

        self.base.fill_bottoms();
        for (bottom, top) in self.base.bottoms().iter().zip(self.tops.tops().iter()) {
            let bottom = bottom.borrow();
            let mut top = top.borrow_mut();
            handle.backend().softmax_forward(
                &self.param,
                &desc,
                bottom.as_slice(),
                &desc,
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
}
