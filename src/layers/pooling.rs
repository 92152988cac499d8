//! Pooling layer: square-window max or average downsampling.

use crate::backend::BackendError;
use crate::config::LayerConfig;
use crate::data_manager::DataManager;
use crate::handle::Handle;
use crate::params::PoolingParam;
use crate::shape::{conv_out_extent, DataDim, TensorDesc};

use super::{Layer, LayerBase, LayerKind, TopBlobs};

pub struct PoolingLayer {
    base: LayerBase,
    param: PoolingParam,
    tops: TopBlobs,
    top_desc: Option<TensorDesc>,
    output_dim: Option<DataDim>,
}

impl PoolingLayer {
    pub fn new(layer_id: usize, config: &LayerConfig, param: PoolingParam) -> Self {
        Self {
            base: LayerBase::from_config(layer_id, config),
            param,
            tops: TopBlobs::default(),
            top_desc: None,
            output_dim: None,
        }
    }
}

impl Layer for PoolingLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::Pooling
    }

    fn base(&self) -> &LayerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn setup(&mut self, _handle: &Handle, manager: &mut DataManager) -> Result<(), BackendError> {
        let in_dim = self.base.setup(manager)?;

        // Windowed downsampling follows the same floor rule as convolution.
        let out_dim = DataDim::new(
            in_dim.n,
            in_dim.c,
            conv_out_extent(in_dim.h, self.param.pad, self.param.kernel_size, self.param.stride)?,
            conv_out_extent(in_dim.w, self.param.pad, self.param.kernel_size, self.param.stride)?,
        );

        self.tops
            .allocate(manager, out_dim.size(), self.base.num_inputs());
        self.top_desc = Some(TensorDesc::from_dim(&out_dim));
        self.output_dim = Some(out_dim);
        Ok(())
    }

    fn forward(&mut self, handle: &Handle) -> Result<(), BackendError> {
        let bottom_desc = self.base.bottom_desc();
        let top_desc = self.top_desc.expect("setup must run before forward");

        self.base.fill_bottoms();
        for (bottom, top) in self.base.bottoms().iter().zip(self.tops.tops().iter()) {
            let bottom = bottom.borrow();
            let mut top = top.borrow_mut();
            handle.backend().pooling_forward(
                &self.param,
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
}
