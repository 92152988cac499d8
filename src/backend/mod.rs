//! Accelerator math library seam.
//!
//! Every shape-driven kernel the harness times is reached through the
//! [`Backend`] trait: descriptor-driven forward entry points, algorithm
//! negotiation for convolution, and workspace memory management. Every
//! call returns a status; any non-success status is fatal to a benchmark
//! run (a partially-failed kernel produces meaningless timings).

mod reference;

pub use reference::ReferenceBackend;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::params::{ActivationMode, LrnParam, PoolingParam, SoftmaxParam};
use crate::shape::{FilterDesc, TensorDesc};
use crate::Elem;

/// Non-success statuses reported by backend entry points.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("bad parameter in {call}: {message}")]
    BadParam { call: &'static str, message: String },

    #[error("shape mismatch in {call}: descriptor expects {expected} elements, buffer holds {actual}")]
    ShapeMismatch {
        call: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("workspace allocation of {bytes} bytes failed")]
    AllocFailed { bytes: usize },

    #[error("{call} is not supported by the {backend} backend")]
    NotSupported {
        call: &'static str,
        backend: &'static str,
    },

    #[error("execution of {call} failed: {message}")]
    ExecutionFailed { call: &'static str, message: String },
}

/// Forward convolution algorithm chosen during negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvolutionAlgorithm {
    /// Straightforward nested loops; needs no scratch memory.
    Direct,
    /// im2col followed by a matrix multiply; needs a column workspace.
    Gemm,
}

/// Configuration hint steering the backend's algorithm choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConvolutionPreference {
    /// Pick the fastest algorithm regardless of memory cost.
    #[default]
    PreferFastest,
    /// Only algorithms that need no workspace.
    NoWorkspace,
    /// Fastest algorithm whose workspace fits within the limit.
    SpecifyWorkspaceLimit { limit_bytes: usize },
}

/// Scratch device memory leased from a backend for one algorithm.
///
/// Obtained from [`Backend::alloc_workspace`] and returned through
/// [`Backend::free_workspace`]; sized by the backend's own estimate.
#[derive(Debug)]
pub struct Workspace {
    buf: Vec<Elem>,
    bytes: usize,
}

impl Workspace {
    fn with_capacity(bytes: usize) -> Self {
        let elems = bytes.div_ceil(std::mem::size_of::<Elem>());
        Self {
            buf: vec![0.0; elems],
            bytes,
        }
    }

    /// Size of the allocation in bytes, as requested.
    pub fn size_in_bytes(&self) -> usize {
        self.bytes
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [Elem] {
        &mut self.buf
    }
}

/// Running workspace allocation counters, for leak accounting in tests
/// and reports rather than device telemetry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkspaceStats {
    pub allocs: u64,
    pub frees: u64,
    pub live: u64,
}

/// One accelerator math library.
///
/// All entry points are synchronous: each call blocks until the operation
/// completes on the backend's single implicit execution context.
pub trait Backend {
    fn name(&self) -> &'static str;

    /// Picks the fastest available forward convolution algorithm under
    /// the given preference policy.
    fn find_convolution_algorithm(
        &self,
        pref: ConvolutionPreference,
        bottom: &TensorDesc,
        filter: &FilterDesc,
        conv: &ConvolutionDesc,
        top: &TensorDesc,
    ) -> Result<ConvolutionAlgorithm, BackendError>;

    /// Scratch memory the chosen algorithm requires, in bytes.
    fn convolution_workspace_size(
        &self,
        algo: ConvolutionAlgorithm,
        bottom: &TensorDesc,
        filter: &FilterDesc,
        conv: &ConvolutionDesc,
        top: &TensorDesc,
    ) -> Result<usize, BackendError>;

    fn alloc_workspace(&self, bytes: usize) -> Result<Workspace, BackendError>;

    fn free_workspace(&self, workspace: Workspace);

    fn workspace_stats(&self) -> WorkspaceStats;

    /// Forward convolution: `top = alpha * conv(bottom, weights) + beta * top`.
    #[allow(clippy::too_many_arguments)]
    fn convolution_forward(
        &self,
        alpha: Elem,
        beta: Elem,
        bottom_desc: &TensorDesc,
        bottom: &[Elem],
        filter_desc: &FilterDesc,
        weights: &[Elem],
        conv_desc: &ConvolutionDesc,
        algo: ConvolutionAlgorithm,
        workspace: Option<&mut Workspace>,
        top_desc: &TensorDesc,
        top: &mut [Elem],
    ) -> Result<(), BackendError>;

    fn pooling_forward(
        &self,
        param: &PoolingParam,
        bottom_desc: &TensorDesc,
        bottom: &[Elem],
        top_desc: &TensorDesc,
        top: &mut [Elem],
    ) -> Result<(), BackendError>;

    fn activation_forward(
        &self,
        mode: ActivationMode,
        bottom_desc: &TensorDesc,
        bottom: &[Elem],
        top_desc: &TensorDesc,
        top: &mut [Elem],
    ) -> Result<(), BackendError>;

    fn lrn_forward(
        &self,
        param: &LrnParam,
        bottom_desc: &TensorDesc,
        bottom: &[Elem],
        top_desc: &TensorDesc,
        top: &mut [Elem],
    ) -> Result<(), BackendError>;

    /// Fully-connected forward, a plain GEMM over flattened inputs.
    fn fully_connected_forward(
        &self,
        weights: &[Elem],
        output_num: usize,
        bottom_desc: &TensorDesc,
        bottom: &[Elem],
        top_desc: &TensorDesc,
        top: &mut [Elem],
    ) -> Result<(), BackendError>;

    fn softmax_forward(
        &self,
        param: &SoftmaxParam,
        bottom_desc: &TensorDesc,
        bottom: &[Elem],
        top_desc: &TensorDesc,
        top: &mut [Elem],
    ) -> Result<(), BackendError>;
}

/// Backend-native convolution configuration: padding and stride.
/// The kernel extent lives in the [`FilterDesc`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvolutionDesc {
    pub pad_h: usize,
    pub pad_w: usize,
    pub stride_u: usize,
    pub stride_v: usize,
}
