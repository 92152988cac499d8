//! Tensor shape arithmetic and backend descriptor translation.

use crate::backend::BackendError;

/// Four-dimensional tensor shape in NCHW order.
///
/// A shape with any dimension equal to zero is a placeholder meaning the
/// effective shape comes from the previous layer in a chained pipeline;
/// an all-nonzero shape configures standalone mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DataDim {
    pub n: usize,
    pub c: usize,
    pub h: usize,
    pub w: usize,
}

impl DataDim {
    pub fn new(n: usize, c: usize, h: usize, w: usize) -> Self {
        Self { n, c, h, w }
    }

    /// Element count of a buffer backing this shape.
    pub fn size(&self) -> usize {
        self.n * self.c * self.h * self.w
    }

    /// True when all four dimensions are non-zero (standalone mode).
    pub fn is_fully_specified(&self) -> bool {
        self.n != 0 && self.c != 0 && self.h != 0 && self.w != 0
    }
}

/// One spatial extent of the "valid convolution with padding and stride"
/// output-shape rule. Integer division truncates, never rounds.
///
/// A window that does not fit the padded input is a `BadParam` error, not
/// a panic: chained layers only learn their input shape at setup time, so
/// this cannot be caught by upfront configuration validation.
pub fn conv_out_extent(
    input: usize,
    pad: usize,
    kernel: usize,
    stride: usize,
) -> Result<usize, BackendError> {
    let padded = input + 2 * pad;
    if kernel == 0 || kernel > padded || stride == 0 {
        return Err(BackendError::BadParam {
            call: "conv_out_extent",
            message: format!(
                "kernel {} does not fit padded extent {} with stride {}",
                kernel, padded, stride
            ),
        });
    }
    Ok((padded - kernel) / stride + 1)
}

/// Backend-native NCHW tensor descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorDesc {
    pub n: usize,
    pub c: usize,
    pub h: usize,
    pub w: usize,
}

impl TensorDesc {
    pub fn from_dim(dim: &DataDim) -> Self {
        Self {
            n: dim.n,
            c: dim.c,
            h: dim.h,
            w: dim.w,
        }
    }

    pub fn size(&self) -> usize {
        self.n * self.c * self.h * self.w
    }
}

/// Backend-native filter descriptor: output channels, input channels,
/// kernel height and width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterDesc {
    pub k: usize,
    pub c: usize,
    pub h: usize,
    pub w: usize,
}

impl FilterDesc {
    pub fn size(&self) -> usize {
        self.k * self.c * self.h * self.w
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conv_out_extent_basic() {
        // 28x28 input, 5x5 kernel, no padding, stride 1 -> 24
        assert_eq!(conv_out_extent(28, 0, 5, 1).unwrap(), 24);
    }

    #[test]
    fn test_conv_out_extent_truncates() {
        // (7 + 0 - 3) / 2 + 1 = 3, the fractional part is dropped
        assert_eq!(conv_out_extent(7, 0, 3, 2).unwrap(), 3);
        assert_eq!(conv_out_extent(8, 0, 3, 2).unwrap(), 3);
        assert_eq!(conv_out_extent(9, 0, 3, 2).unwrap(), 4);
    }

    #[test]
    fn test_conv_out_extent_with_padding() {
        // Same-size convolution: 32 + 2*2 - 5 + 1 = 32
        assert_eq!(conv_out_extent(32, 2, 5, 1).unwrap(), 32);
    }

    #[test]
    fn test_conv_out_extent_kernel_too_large() {
        assert!(matches!(
            conv_out_extent(4, 0, 5, 1),
            Err(BackendError::BadParam { .. })
        ));
    }

    #[test]
    fn test_conv_out_extent_zero_stride() {
        assert!(matches!(
            conv_out_extent(8, 0, 3, 0),
            Err(BackendError::BadParam { .. })
        ));
    }

    #[test]
    fn test_data_dim_size() {
        let dim = DataDim::new(1, 3, 32, 32);
        assert_eq!(dim.size(), 3072);
    }

    #[test]
    fn test_data_dim_mode_detection() {
        assert!(DataDim::new(1, 3, 32, 32).is_fully_specified());
        assert!(!DataDim::new(0, 0, 0, 0).is_fully_specified());
        assert!(!DataDim::new(1, 3, 0, 32).is_fully_specified());
    }

    #[test]
    fn test_tensor_desc_from_dim() {
        let dim = DataDim::new(2, 16, 14, 14);
        let desc = TensorDesc::from_dim(&dim);
        assert_eq!(desc.size(), dim.size());
        assert_eq!(desc.c, 16);
    }
}
