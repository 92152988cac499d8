//! Per-primitive hyperparameter structs, supplied by configuration.

use serde::{Deserialize, Serialize};

use crate::backend::ConvolutionPreference;

fn default_stride() -> usize {
    1
}

/// Workspace lifetime policy for algorithms that need scratch memory.
///
/// `PerCall` frees the workspace after every forward call and re-allocates
/// it lazily on the next one, reproducing the original benchmark's
/// observed behavior; `Hoisted` keeps the setup-time allocation alive for
/// the layer's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkspacePolicy {
    #[default]
    PerCall,
    Hoisted,
}

/// Convolution hyperparameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvolutionParam {
    /// Number of output channels.
    pub output_num: usize,
    pub kernel_size_h: usize,
    pub kernel_size_w: usize,
    #[serde(default)]
    pub pad_h: usize,
    #[serde(default)]
    pub pad_w: usize,
    #[serde(default = "default_stride")]
    pub stride_u: usize,
    #[serde(default = "default_stride")]
    pub stride_v: usize,
    /// Algorithm-selection hint forwarded to the backend.
    #[serde(default)]
    pub pref: ConvolutionPreference,
    #[serde(default)]
    pub workspace_policy: WorkspacePolicy,
}

/// Pooling window mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PoolingMode {
    Max,
    /// Average over valid (non-padding) window cells.
    Avg,
}

/// Pooling hyperparameters; the window is square.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolingParam {
    pub mode: PoolingMode,
    pub kernel_size: usize,
    #[serde(default)]
    pub pad: usize,
    #[serde(default = "default_stride")]
    pub stride: usize,
}

/// Elementwise activation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActivationMode {
    Relu,
    Sigmoid,
    Tanh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivationParam {
    pub mode: ActivationMode,
}

fn default_local_size() -> usize {
    5
}

fn default_lrn_alpha() -> f64 {
    1e-4
}

fn default_lrn_beta() -> f64 {
    0.75
}

fn default_lrn_k() -> f64 {
    2.0
}

/// Local-response-normalization hyperparameters (cross-channel).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LrnParam {
    /// Channel window size; must be odd.
    #[serde(default = "default_local_size")]
    pub local_size: usize,
    #[serde(default = "default_lrn_alpha")]
    pub alpha: f64,
    #[serde(default = "default_lrn_beta")]
    pub beta: f64,
    #[serde(default = "default_lrn_k")]
    pub k: f64,
}

/// Fully-connected hyperparameters. The layer is a plain GEMM; no bias.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FullyConnectedParam {
    /// Number of output neurons.
    pub output_num: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SoftmaxAlgorithm {
    /// Direct exponentiation, no max subtraction.
    Fast,
    /// Numerically stable: subtracts the running maximum first.
    #[default]
    Accurate,
    /// Log-probabilities of the accurate variant.
    Log,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SoftmaxMode {
    /// Normalize across channels at each spatial position.
    #[default]
    Channel,
    /// Normalize over all elements of each image.
    Instance,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SoftmaxParam {
    #[serde(default)]
    pub algorithm: SoftmaxAlgorithm,
    #[serde(default)]
    pub mode: SoftmaxMode,
}
