//! CPU reference implementation of the accelerator seam.
//!
//! Exists so the harness can run and be tested without device hardware.
//! Kernels are deliberately plain nested loops; the point of this crate
//! is measuring call latency through a uniform seam, not competing with
//! tuned device libraries.

use std::cell::Cell;

use crate::params::{ActivationMode, LrnParam, PoolingMode, PoolingParam, SoftmaxAlgorithm,
    SoftmaxMode, SoftmaxParam};
use crate::shape::{FilterDesc, TensorDesc};
use crate::Elem;

use super::{Backend, BackendError, ConvolutionAlgorithm, ConvolutionDesc, ConvolutionPreference,
    Workspace, WorkspaceStats};

/// In-process backend with workspace allocation accounting.
#[derive(Debug, Default)]
pub struct ReferenceBackend {
    allocs: Cell<u64>,
    frees: Cell<u64>,
    live: Cell<u64>,
}

impl ReferenceBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn gemm_workspace_bytes(filter: &FilterDesc, top: &TensorDesc) -> usize {
        // im2col column buffer for one image
        filter.c * filter.h * filter.w * top.h * top.w * std::mem::size_of::<Elem>()
    }

    fn check_conv_geometry(
        call: &'static str,
        bottom: &TensorDesc,
        filter: &FilterDesc,
        conv: &ConvolutionDesc,
        top: &TensorDesc,
    ) -> Result<(), BackendError> {
        if conv.stride_u == 0 || conv.stride_v == 0 {
            return Err(BackendError::BadParam {
                call,
                message: "stride must be at least 1".to_string(),
            });
        }
        if filter.c != bottom.c {
            return Err(BackendError::BadParam {
                call,
                message: format!(
                    "filter input channels {} do not match tensor channels {}",
                    filter.c, bottom.c
                ),
            });
        }
        let padded_h = bottom.h + 2 * conv.pad_h;
        let padded_w = bottom.w + 2 * conv.pad_w;
        if filter.h > padded_h || filter.w > padded_w {
            return Err(BackendError::BadParam {
                call,
                message: format!(
                    "filter {}x{} exceeds padded input {}x{}",
                    filter.h, filter.w, padded_h, padded_w
                ),
            });
        }
        let expect_h = (padded_h - filter.h) / conv.stride_u + 1;
        let expect_w = (padded_w - filter.w) / conv.stride_v + 1;
        if top.n != bottom.n || top.c != filter.k || top.h != expect_h || top.w != expect_w {
            return Err(BackendError::BadParam {
                call,
                message: format!(
                    "output descriptor ({},{},{},{}) does not match configured geometry \
                     ({},{},{},{})",
                    top.n, top.c, top.h, top.w, bottom.n, filter.k, expect_h, expect_w
                ),
            });
        }
        Ok(())
    }
}

fn check_len(call: &'static str, desc: &TensorDesc, actual: usize) -> Result<(), BackendError> {
    if desc.size() != actual {
        return Err(BackendError::ShapeMismatch {
            call,
            expected: desc.size(),
            actual,
        });
    }
    Ok(())
}

#[inline]
fn nchw(desc: &TensorDesc, n: usize, c: usize, h: usize, w: usize) -> usize {
    ((n * desc.c + c) * desc.h + h) * desc.w + w
}

impl Backend for ReferenceBackend {
    fn name(&self) -> &'static str {
        "reference"
    }

    fn find_convolution_algorithm(
        &self,
        pref: ConvolutionPreference,
        bottom: &TensorDesc,
        filter: &FilterDesc,
        conv: &ConvolutionDesc,
        top: &TensorDesc,
    ) -> Result<ConvolutionAlgorithm, BackendError> {
        Self::check_conv_geometry("find_convolution_algorithm", bottom, filter, conv, top)?;
        let algo = match pref {
            ConvolutionPreference::PreferFastest => ConvolutionAlgorithm::Gemm,
            ConvolutionPreference::NoWorkspace => ConvolutionAlgorithm::Direct,
            ConvolutionPreference::SpecifyWorkspaceLimit { limit_bytes } => {
                if Self::gemm_workspace_bytes(filter, top) <= limit_bytes {
                    ConvolutionAlgorithm::Gemm
                } else {
                    ConvolutionAlgorithm::Direct
                }
            }
        };
        Ok(algo)
    }

    fn convolution_workspace_size(
        &self,
        algo: ConvolutionAlgorithm,
        bottom: &TensorDesc,
        filter: &FilterDesc,
        conv: &ConvolutionDesc,
        top: &TensorDesc,
    ) -> Result<usize, BackendError> {
        Self::check_conv_geometry("convolution_workspace_size", bottom, filter, conv, top)?;
        Ok(match algo {
            ConvolutionAlgorithm::Direct => 0,
            ConvolutionAlgorithm::Gemm => Self::gemm_workspace_bytes(filter, top),
        })
    }

    fn alloc_workspace(&self, bytes: usize) -> Result<Workspace, BackendError> {
        self.allocs.set(self.allocs.get() + 1);
        self.live.set(self.live.get() + 1);
        Ok(Workspace::with_capacity(bytes))
    }

    fn free_workspace(&self, workspace: Workspace) {
        drop(workspace);
        self.frees.set(self.frees.get() + 1);
        self.live.set(self.live.get() - 1);
    }

    fn workspace_stats(&self) -> WorkspaceStats {
        WorkspaceStats {
            allocs: self.allocs.get(),
            frees: self.frees.get(),
            live: self.live.get(),
        }
    }

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
    ) -> Result<(), BackendError> {
        const CALL: &str = "convolution_forward";
        Self::check_conv_geometry(CALL, bottom_desc, filter_desc, conv_desc, top_desc)?;
        check_len(CALL, bottom_desc, bottom.len())?;
        check_len(CALL, top_desc, top.len())?;
        if weights.len() != filter_desc.size() {
            return Err(BackendError::ShapeMismatch {
                call: CALL,
                expected: filter_desc.size(),
                actual: weights.len(),
            });
        }

        match algo {
            ConvolutionAlgorithm::Direct => conv_direct(
                alpha, beta, bottom_desc, bottom, filter_desc, weights, conv_desc, top_desc, top,
            ),
            ConvolutionAlgorithm::Gemm => {
                let required = filter_desc.c * filter_desc.h * filter_desc.w * top_desc.h
                    * top_desc.w;
                let workspace = workspace.ok_or(BackendError::BadParam {
                    call: CALL,
                    message: "GEMM algorithm requires a workspace".to_string(),
                })?;
                if workspace.as_mut_slice().len() < required {
                    return Err(BackendError::BadParam {
                        call: CALL,
                        message: format!(
                            "workspace holds {} elements, GEMM needs {}",
                            workspace.as_mut_slice().len(),
                            required
                        ),
                    });
                }
                conv_gemm(
                    alpha, beta, bottom_desc, bottom, filter_desc, weights, conv_desc, workspace,
                    top_desc, top,
                )
            }
        }
        Ok(())
    }

    fn pooling_forward(
        &self,
        param: &PoolingParam,
        bottom_desc: &TensorDesc,
        bottom: &[Elem],
        top_desc: &TensorDesc,
        top: &mut [Elem],
    ) -> Result<(), BackendError> {
        const CALL: &str = "pooling_forward";
        check_len(CALL, bottom_desc, bottom.len())?;
        check_len(CALL, top_desc, top.len())?;
        if param.kernel_size == 0 || param.stride == 0 {
            return Err(BackendError::BadParam {
                call: CALL,
                message: "kernel size and stride must be at least 1".to_string(),
            });
        }

        for n in 0..top_desc.n {
            for c in 0..top_desc.c {
                for oh in 0..top_desc.h {
                    for ow in 0..top_desc.w {
                        let mut acc: Elem = match param.mode {
                            PoolingMode::Max => Elem::NEG_INFINITY,
                            PoolingMode::Avg => 0.0,
                        };
                        let mut count = 0usize;
                        for kh in 0..param.kernel_size {
                            for kw in 0..param.kernel_size {
                                let ih = oh * param.stride + kh;
                                let iw = ow * param.stride + kw;
                                if ih < param.pad || iw < param.pad {
                                    continue;
                                }
                                let (ih, iw) = (ih - param.pad, iw - param.pad);
                                if ih >= bottom_desc.h || iw >= bottom_desc.w {
                                    continue;
                                }
                                let value = bottom[nchw(bottom_desc, n, c, ih, iw)];
                                match param.mode {
                                    PoolingMode::Max => acc = acc.max(value),
                                    PoolingMode::Avg => acc += value,
                                }
                                count += 1;
                            }
                        }
                        top[nchw(top_desc, n, c, oh, ow)] = match param.mode {
                            PoolingMode::Max if count == 0 => 0.0,
                            PoolingMode::Max => acc,
                            PoolingMode::Avg if count == 0 => 0.0,
                            PoolingMode::Avg => acc / count as Elem,
                        };
                    }
                }
            }
        }
        Ok(())
    }

    fn activation_forward(
        &self,
        mode: ActivationMode,
        bottom_desc: &TensorDesc,
        bottom: &[Elem],
        top_desc: &TensorDesc,
        top: &mut [Elem],
    ) -> Result<(), BackendError> {
        const CALL: &str = "activation_forward";
        check_len(CALL, bottom_desc, bottom.len())?;
        check_len(CALL, top_desc, top.len())?;

        for (out, &x) in top.iter_mut().zip(bottom.iter()) {
            *out = match mode {
                ActivationMode::Relu => x.max(0.0),
                ActivationMode::Sigmoid => 1.0 / (1.0 + (-x).exp()),
                ActivationMode::Tanh => x.tanh(),
            };
        }
        Ok(())
    }

    fn lrn_forward(
        &self,
        param: &LrnParam,
        bottom_desc: &TensorDesc,
        bottom: &[Elem],
        top_desc: &TensorDesc,
        top: &mut [Elem],
    ) -> Result<(), BackendError> {
        const CALL: &str = "lrn_forward";
        check_len(CALL, bottom_desc, bottom.len())?;
        check_len(CALL, top_desc, top.len())?;
        if param.local_size == 0 || param.local_size % 2 == 0 {
            return Err(BackendError::BadParam {
                call: CALL,
                message: format!("local_size {} must be odd and non-zero", param.local_size),
            });
        }

        let half = (param.local_size - 1) / 2;
        let alpha = param.alpha as Elem / param.local_size as Elem;
        let beta = param.beta as Elem;
        let k = param.k as Elem;

        for n in 0..bottom_desc.n {
            for c in 0..bottom_desc.c {
                let lo = c.saturating_sub(half);
                let hi = (c + half).min(bottom_desc.c - 1);
                for h in 0..bottom_desc.h {
                    for w in 0..bottom_desc.w {
                        let mut squares: Elem = 0.0;
                        for cc in lo..=hi {
                            let x = bottom[nchw(bottom_desc, n, cc, h, w)];
                            squares += x * x;
                        }
                        let scale = (k + alpha * squares).powf(beta);
                        let idx = nchw(bottom_desc, n, c, h, w);
                        top[idx] = bottom[idx] / scale;
                    }
                }
            }
        }
        Ok(())
    }

    fn fully_connected_forward(
        &self,
        weights: &[Elem],
        output_num: usize,
        bottom_desc: &TensorDesc,
        bottom: &[Elem],
        top_desc: &TensorDesc,
        top: &mut [Elem],
    ) -> Result<(), BackendError> {
        const CALL: &str = "fully_connected_forward";
        check_len(CALL, bottom_desc, bottom.len())?;
        check_len(CALL, top_desc, top.len())?;
        let input_size = bottom_desc.c * bottom_desc.h * bottom_desc.w;
        if top_desc.n != bottom_desc.n || top_desc.c * top_desc.h * top_desc.w != output_num {
            return Err(BackendError::BadParam {
                call: CALL,
                message: format!(
                    "output descriptor does not describe {} neurons per image",
                    output_num
                ),
            });
        }
        if weights.len() != output_num * input_size {
            return Err(BackendError::ShapeMismatch {
                call: CALL,
                expected: output_num * input_size,
                actual: weights.len(),
            });
        }

        for n in 0..bottom_desc.n {
            let x = &bottom[n * input_size..(n + 1) * input_size];
            for o in 0..output_num {
                let row = &weights[o * input_size..(o + 1) * input_size];
                let mut sum: Elem = 0.0;
                for (weight, value) in row.iter().zip(x.iter()) {
                    sum += weight * value;
                }
                top[n * output_num + o] = sum;
            }
        }
        Ok(())
    }

    fn softmax_forward(
        &self,
        param: &SoftmaxParam,
        bottom_desc: &TensorDesc,
        bottom: &[Elem],
        top_desc: &TensorDesc,
        top: &mut [Elem],
    ) -> Result<(), BackendError> {
        const CALL: &str = "softmax_forward";
        check_len(CALL, bottom_desc, bottom.len())?;
        check_len(CALL, top_desc, top.len())?;

        match param.mode {
            SoftmaxMode::Channel => {
                for n in 0..bottom_desc.n {
                    for h in 0..bottom_desc.h {
                        for w in 0..bottom_desc.w {
                            let indexes: Vec<usize> = (0..bottom_desc.c)
                                .map(|c| nchw(bottom_desc, n, c, h, w))
                                .collect();
                            softmax_at(param.algorithm, bottom, top, &indexes);
                        }
                    }
                }
            }
            SoftmaxMode::Instance => {
                let image = bottom_desc.c * bottom_desc.h * bottom_desc.w;
                for n in 0..bottom_desc.n {
                    let indexes: Vec<usize> = (n * image..(n + 1) * image).collect();
                    softmax_at(param.algorithm, bottom, top, &indexes);
                }
            }
        }
        Ok(())
    }
}

/// Softmax over the values at `indexes`, written to the same positions of
/// `top`. Accurate and Log subtract the running maximum first.
fn softmax_at(algorithm: SoftmaxAlgorithm, bottom: &[Elem], top: &mut [Elem], indexes: &[usize]) {
    let max = match algorithm {
        SoftmaxAlgorithm::Fast => 0.0,
        SoftmaxAlgorithm::Accurate | SoftmaxAlgorithm::Log => indexes
            .iter()
            .fold(Elem::NEG_INFINITY, |acc, &i| acc.max(bottom[i])),
    };
    let mut sum: Elem = 0.0;
    for &i in indexes {
        let e = (bottom[i] - max).exp();
        top[i] = e;
        sum += e;
    }
    match algorithm {
        SoftmaxAlgorithm::Log => {
            let log_sum = sum.ln();
            for &i in indexes {
                top[i] = bottom[i] - max - log_sum;
            }
        }
        _ => {
            for &i in indexes {
                top[i] /= sum;
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn conv_direct(
    alpha: Elem,
    beta: Elem,
    bottom_desc: &TensorDesc,
    bottom: &[Elem],
    filter_desc: &FilterDesc,
    weights: &[Elem],
    conv_desc: &ConvolutionDesc,
    top_desc: &TensorDesc,
    top: &mut [Elem],
) {
    for n in 0..top_desc.n {
        for oc in 0..top_desc.c {
            for oh in 0..top_desc.h {
                for ow in 0..top_desc.w {
                    let mut acc: Elem = 0.0;
                    for ic in 0..filter_desc.c {
                        for kh in 0..filter_desc.h {
                            let ih = oh * conv_desc.stride_u + kh;
                            if ih < conv_desc.pad_h {
                                continue;
                            }
                            let ih = ih - conv_desc.pad_h;
                            if ih >= bottom_desc.h {
                                continue;
                            }
                            for kw in 0..filter_desc.w {
                                let iw = ow * conv_desc.stride_v + kw;
                                if iw < conv_desc.pad_w {
                                    continue;
                                }
                                let iw = iw - conv_desc.pad_w;
                                if iw >= bottom_desc.w {
                                    continue;
                                }
                                let weight = weights
                                    [((oc * filter_desc.c + ic) * filter_desc.h + kh)
                                        * filter_desc.w
                                        + kw];
                                acc += weight * bottom[nchw(bottom_desc, n, ic, ih, iw)];
                            }
                        }
                    }
                    let idx = nchw(top_desc, n, oc, oh, ow);
                    top[idx] = alpha * acc + beta * top[idx];
                }
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn conv_gemm(
    alpha: Elem,
    beta: Elem,
    bottom_desc: &TensorDesc,
    bottom: &[Elem],
    filter_desc: &FilterDesc,
    weights: &[Elem],
    conv_desc: &ConvolutionDesc,
    workspace: &mut Workspace,
    top_desc: &TensorDesc,
    top: &mut [Elem],
) {
    let rows = filter_desc.c * filter_desc.h * filter_desc.w;
    let cols = top_desc.h * top_desc.w;
    let columns = workspace.as_mut_slice();

    for n in 0..top_desc.n {
        // im2col for this image
        for ic in 0..filter_desc.c {
            for kh in 0..filter_desc.h {
                for kw in 0..filter_desc.w {
                    let row = (ic * filter_desc.h + kh) * filter_desc.w + kw;
                    for oh in 0..top_desc.h {
                        for ow in 0..top_desc.w {
                            let ih = oh * conv_desc.stride_u + kh;
                            let iw = ow * conv_desc.stride_v + kw;
                            let value = if ih < conv_desc.pad_h
                                || iw < conv_desc.pad_w
                                || ih - conv_desc.pad_h >= bottom_desc.h
                                || iw - conv_desc.pad_w >= bottom_desc.w
                            {
                                0.0
                            } else {
                                bottom[nchw(
                                    bottom_desc,
                                    n,
                                    ic,
                                    ih - conv_desc.pad_h,
                                    iw - conv_desc.pad_w,
                                )]
                            };
                            columns[row * cols + oh * top_desc.w + ow] = value;
                        }
                    }
                }
            }
        }

        // weights (k x rows) times columns (rows x cols)
        for oc in 0..filter_desc.k {
            let weight_row = &weights[oc * rows..(oc + 1) * rows];
            for s in 0..cols {
                let mut acc: Elem = 0.0;
                for (r, &weight) in weight_row.iter().enumerate() {
                    acc += weight * columns[r * cols + s];
                }
                let idx = nchw(top_desc, n, oc, 0, 0) + s;
                top[idx] = alpha * acc + beta * top[idx];
            }
        }
    }
}
