//! Convolution layer: the only primitive with algorithm negotiation and
//! scratch workspace memory.

use std::cell::RefCell;
use std::rc::Rc;

use log::debug;

use crate::backend::{BackendError, ConvolutionAlgorithm, ConvolutionDesc, Workspace};
use crate::config::LayerConfig;
use crate::data_manager::{Data, DataManager};
use crate::handle::Handle;
use crate::params::{ConvolutionParam, WorkspacePolicy};
use crate::shape::{conv_out_extent, DataDim, FilterDesc, TensorDesc};

use super::{Layer, LayerBase, LayerKind, TopBlobs};

pub struct ConvolutionLayer {
    base: LayerBase,
    param: ConvolutionParam,
    tops: TopBlobs,
    weights: Option<Rc<RefCell<Data>>>,
    weight_chunk_id: Option<usize>,
    weight_diff_chunk_id: Option<usize>,
    filter_desc: Option<FilterDesc>,
    conv_desc: ConvolutionDesc,
    top_desc: Option<TensorDesc>,
    output_dim: Option<DataDim>,
    algo: Option<ConvolutionAlgorithm>,
    workspace_bytes: usize,
    workspace: Option<Workspace>,
}

impl ConvolutionLayer {
    pub fn new(layer_id: usize, config: &LayerConfig, param: ConvolutionParam) -> Self {
        let conv_desc = ConvolutionDesc {
            pad_h: param.pad_h,
            pad_w: param.pad_w,
            stride_u: param.stride_u,
            stride_v: param.stride_v,
        };
        Self {
            base: LayerBase::from_config(layer_id, config),
            param,
            tops: TopBlobs::default(),
            weights: None,
            weight_chunk_id: None,
            weight_diff_chunk_id: None,
            filter_desc: None,
            conv_desc,
            top_desc: None,
            output_dim: None,
            algo: None,
            workspace_bytes: 0,
            workspace: None,
        }
    }

    pub fn weight_chunk_id(&self) -> Option<usize> {
        self.weight_chunk_id
    }

    pub fn weight_diff_chunk_id(&self) -> Option<usize> {
        self.weight_diff_chunk_id
    }

    pub fn chosen_algorithm(&self) -> Option<ConvolutionAlgorithm> {
        self.algo
    }

    pub fn workspace_bytes(&self) -> usize {
        self.workspace_bytes
    }
}

impl Layer for ConvolutionLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::Convolution
    }

    fn base(&self) -> &LayerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn setup(&mut self, handle: &Handle, manager: &mut DataManager) -> Result<(), BackendError> {
        let in_dim = self.base.setup(manager)?;

        let filter_desc = FilterDesc {
            k: self.param.output_num,
            c: in_dim.c,
            h: self.param.kernel_size_h,
            w: self.param.kernel_size_w,
        };
        let out_dim = DataDim::new(
            in_dim.n,
            self.param.output_num,
            conv_out_extent(
                in_dim.h,
                self.param.pad_h,
                self.param.kernel_size_h,
                self.param.stride_u,
            )?,
            conv_out_extent(
                in_dim.w,
                self.param.pad_w,
                self.param.kernel_size_w,
                self.param.stride_v,
            )?,
        );

        self.tops
            .allocate(manager, out_dim.size(), self.base.num_inputs());

        let weight_id = manager.create_data(filter_desc.size());
        self.weight_chunk_id = Some(weight_id);
        self.weights = Some(manager.get_data(weight_id));
        self.weight_diff_chunk_id = Some(manager.create_data(filter_desc.size()));

        let bottom_desc = self.base.bottom_desc();
        let top_desc = TensorDesc::from_dim(&out_dim);
        let backend = handle.backend();
        let algo = backend.find_convolution_algorithm(
            self.param.pref,
            &bottom_desc,
            &filter_desc,
            &self.conv_desc,
            &top_desc,
        )?;
        let workspace_bytes = backend.convolution_workspace_size(
            algo,
            &bottom_desc,
            &filter_desc,
            &self.conv_desc,
            &top_desc,
        )?;
        if workspace_bytes > 0 {
            self.workspace = Some(backend.alloc_workspace(workspace_bytes)?);
        }
        debug!(
            "layer {} picked {:?} with {} workspace bytes",
            self.base.name(),
            algo,
            workspace_bytes
        );

        self.filter_desc = Some(filter_desc);
        self.top_desc = Some(top_desc);
        self.output_dim = Some(out_dim);
        self.algo = Some(algo);
        self.workspace_bytes = workspace_bytes;
        Ok(())
    }

    fn forward(&mut self, handle: &Handle) -> Result<(), BackendError> {
        let backend = handle.backend();
        let bottom_desc = self.base.bottom_desc();
        let filter_desc = self.filter_desc.expect("setup must run before forward");
        let top_desc = self.top_desc.expect("setup must run before forward");
        let algo = self.algo.expect("setup must run before forward");

        let weights = self.weights.as_ref().expect("setup must run before forward");
        weights.borrow_mut().filler();
        self.base.fill_bottoms();

        // PerCall frees the workspace at the end of every forward, so it
        // may need re-allocating here.
        if self.workspace_bytes > 0 && self.workspace.is_none() {
            self.workspace = Some(backend.alloc_workspace(self.workspace_bytes)?);
        }

        let weights = weights.borrow();
        for (bottom, top) in self.base.bottoms().iter().zip(self.tops.tops().iter()) {
            let bottom = bottom.borrow();
            let mut top = top.borrow_mut();
            backend.convolution_forward(
                1.0,
                0.0,
                &bottom_desc,
                bottom.as_slice(),
                &filter_desc,
                weights.as_slice(),
                &self.conv_desc,
                algo,
                self.workspace.as_mut(),
                &top_desc,
                top.as_mut_slice(),
            )?;
        }

        if self.param.workspace_policy == WorkspacePolicy::PerCall {
            if let Some(workspace) = self.workspace.take() {
                backend.free_workspace(workspace);
            }
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
