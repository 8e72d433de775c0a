//! Kernel contract: the leaf operations the executor dispatches to.
//!
//! A kernel set implements every signature below. Each call receives contiguous NCHW operands
//! for a single group (or the whole tensor for variants that handle grouping themselves) and
//! returns a newly allocated output.

use crate::error::{ConvError, ConvResult};
use crate::params::{conv_output_size, ConvParams};
use crate::tensor::{Shape, Tensor};

/// Operands and window geometry common to every 2-D kernel.
#[derive(Debug, Clone, Copy)]
pub struct Conv2dArgs<'a> {
    pub input: &'a Tensor,
    pub weight: &'a Tensor,
    pub bias: Option<&'a Tensor>,
    pub kernel_size: [usize; 2],
    pub stride: [usize; 2],
    pub padding: [usize; 2],
}

impl Conv2dArgs<'_> {
    /// Output shape of the forward convolution under `dilation`.
    pub fn output_shape(&self, dilation: [usize; 2]) -> ConvResult<Shape> {
        let dims = conv_output_size(
            self.input.sizes(),
            self.weight.sizes(),
            &self.stride,
            &self.padding,
            &dilation,
        )?;
        Ok(Shape::new(dims))
    }

    /// Rejects a call whose kernel/stride do not match a specialized variant's window.
    pub fn check_window(&self, kernel: &'static str, window: Option<Window2d>) -> ConvResult<()> {
        let Some(window) = window else {
            return Ok(());
        };
        let expected_kernel = [window.kernel; 2];
        let expected_stride = [window.stride; 2];
        if self.kernel_size != expected_kernel || self.stride != expected_stride {
            return Err(ConvError::kernel(
                kernel,
                format!(
                    "expects a {k}x{k} window with stride {s}, got kernel {:?} stride {:?}",
                    self.kernel_size,
                    self.stride,
                    k = window.kernel,
                    s = window.stride
                ),
            ));
        }
        Ok(())
    }
}

/// Square kernel/stride pair a specialized variant is restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window2d {
    pub kernel: usize,
    pub stride: usize,
}

const fn window(kernel: usize, stride: usize) -> Option<Window2d> {
    Some(Window2d { kernel, stride })
}

/// Per-group int8 dequantization scales.
///
/// `input` holds one scale; `weight` holds one scale per output channel of the group.
#[derive(Debug, Clone, Copy)]
pub struct QuantScales<'a> {
    pub input: &'a Tensor,
    pub weight: &'a Tensor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlideWinVariant {
    General,
    Neon1x1S1,
    Neon3x3S1,
}

impl SlideWinVariant {
    pub fn window(self) -> Option<Window2d> {
        match self {
            SlideWinVariant::General => None,
            SlideWinVariant::Neon1x1S1 => window(1, 1),
            SlideWinVariant::Neon3x3S1 => window(3, 1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SgemmVariant {
    Neon,
    Neon1x1S1,
    Neon1x1S2,
    X86,
}

impl SgemmVariant {
    pub fn window(self) -> Option<Window2d> {
        match self {
            SgemmVariant::Neon | SgemmVariant::X86 => None,
            SgemmVariant::Neon1x1S1 => window(1, 1),
            SgemmVariant::Neon1x1S2 => window(1, 2),
        }
    }
}

/// Winograd flavours differ in output tile size; both cover 3x3 stride-1 windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WinogradVariant {
    /// F(6x6, 3x3) tiles.
    Neon,
    /// F(2x2, 3x3) tiles.
    X86,
}

impl WinogradVariant {
    pub fn output_tile(self) -> usize {
        match self {
            WinogradVariant::Neon => 6,
            WinogradVariant::X86 => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DepthwiseVariant {
    NeonK3S1,
    NeonK3S2,
    NeonK5S1,
    NeonK5S2,
    X86K3S1,
    X86K3S2,
}

impl DepthwiseVariant {
    pub fn window(self) -> Option<Window2d> {
        match self {
            DepthwiseVariant::NeonK3S1 | DepthwiseVariant::X86K3S1 => window(3, 1),
            DepthwiseVariant::NeonK3S2 | DepthwiseVariant::X86K3S2 => window(3, 2),
            DepthwiseVariant::NeonK5S1 => window(5, 1),
            DepthwiseVariant::NeonK5S2 => window(5, 2),
        }
    }
}

/// Leaf convolution kernels.
///
/// Implementations must be shareable across threads; the planner holds them as
/// `&dyn ConvKernels` or `Arc<dyn ConvKernels>`.
pub trait ConvKernels: Send + Sync {
    /// Human-readable kernel set identifier (e.g. "cpu", "faer").
    fn kernels_name(&self) -> &str;

    /// Portable direct convolution, stride/padding only.
    fn slow_conv2d(&self, args: &Conv2dArgs<'_>) -> ConvResult<Tensor>;

    /// Portable convolution with dilation.
    fn slow_conv_dilated2d(&self, args: &Conv2dArgs<'_>, dilation: [usize; 2])
        -> ConvResult<Tensor>;

    /// Portable transposed convolution. `weight` is `[C_in, C_out, kh, kw]`.
    fn slow_conv_transpose2d(
        &self,
        args: &Conv2dArgs<'_>,
        output_padding: [usize; 2],
        dilation: [usize; 2],
    ) -> ConvResult<Tensor>;

    /// Transposed convolution specialized for 4x4 windows with stride 2.
    fn deconv2d_4x4s2(
        &self,
        args: &Conv2dArgs<'_>,
        output_padding: [usize; 2],
        dilation: [usize; 2],
    ) -> ConvResult<Tensor>;

    /// Direct sliding-window convolution.
    fn slide_win_conv2d(&self, args: &Conv2dArgs<'_>, variant: SlideWinVariant)
        -> ConvResult<Tensor>;

    /// Batched-matmul convolution, optionally reading a pre-packed weight.
    fn sgemm_conv2d(
        &self,
        args: &Conv2dArgs<'_>,
        packed_weight: Option<&Tensor>,
        variant: SgemmVariant,
    ) -> ConvResult<Tensor>;

    /// Winograd convolution for 3x3 stride-1 windows, optionally reading pre-transformed
    /// weights.
    fn winograd_conv2d_3x3s1(
        &self,
        args: &Conv2dArgs<'_>,
        packed_weight: Option<&Tensor>,
        variant: WinogradVariant,
    ) -> ConvResult<Tensor>;

    /// Packed convolution for 3x3 stride-2 windows.
    fn packed_conv2d_3x3s2(
        &self,
        args: &Conv2dArgs<'_>,
        packed_weight: Option<&Tensor>,
    ) -> ConvResult<Tensor>;

    /// Depthwise convolution over the whole tensor; `weight` is `[C, 1, kh, kw]`.
    fn depthwise_conv2d(&self, args: &Conv2dArgs<'_>, variant: DepthwiseVariant)
        -> ConvResult<Tensor>;

    /// Int8 sliding-window convolution producing dequantized `F32` output.
    fn slide_win_conv2d_int8(
        &self,
        args: &Conv2dArgs<'_>,
        dilation: [usize; 2],
        scales: &QuantScales<'_>,
    ) -> ConvResult<Tensor>;

    /// Convolution on a non-CPU device. Receives the full tensors and normalized parameters.
    fn overrideable_conv2d(
        &self,
        args: &Conv2dArgs<'_>,
        params: &ConvParams,
    ) -> ConvResult<Tensor> {
        Err(ConvError::unsupported(format!(
            "kernel set {} has no device override for {} tensors ({params})",
            self.kernels_name(),
            args.input.device()
        )))
    }
}
