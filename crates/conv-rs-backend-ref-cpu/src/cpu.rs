use std::sync::Arc;

use conv_rs::error::{ConvError, ConvResult};
use conv_rs::kernels::{
    Conv2dArgs, ConvKernels, DepthwiseVariant, QuantScales, SgemmVariant, SlideWinVariant,
    Window2d, WinogradVariant,
};
use conv_rs::tensor::Tensor;

/// Primitive operations an accelerated kernel set may take over.
#[derive(Debug, Clone, Copy)]
pub enum CpuOp<'a> {
    /// Row-major `[m, k] x [k, n] -> [m, n]`.
    Matmul {
        lhs: &'a [f32],
        rhs: &'a [f32],
        m: usize,
        k: usize,
        n: usize,
    },
}

/// Hook that lets an accelerated kernel set run primitive operations instead of the portable
/// routines. Returning `None` falls back to the reference path.
pub trait CpuKernelInterceptor: Send + Sync + 'static {
    fn try_execute(&self, op: &CpuOp<'_>) -> Option<ConvResult<Vec<f32>>>;

    /// Name reported by the kernel set wrapping this interceptor.
    fn kernels_name(&self) -> &'static str {
        "cpu"
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopInterceptor;

impl CpuKernelInterceptor for NoopInterceptor {
    fn try_execute(&self, _op: &CpuOp<'_>) -> Option<ConvResult<Vec<f32>>> {
        None
    }
}

/// Reference kernel set, parameterized by an interceptor for accelerated primitives.
///
/// Specialized variants check that the call geometry matches their window and then compute the
/// same result as the portable routines.
#[derive(Clone)]
pub struct GenericCpuKernels<I: CpuKernelInterceptor> {
    interceptor: Arc<I>,
}

pub type CpuConvKernels = GenericCpuKernels<NoopInterceptor>;

impl Default for GenericCpuKernels<NoopInterceptor> {
    fn default() -> Self {
        Self::new()
    }
}

impl GenericCpuKernels<NoopInterceptor> {
    pub fn new() -> Self {
        Self::with_interceptor(NoopInterceptor)
    }
}

impl<I: CpuKernelInterceptor> GenericCpuKernels<I> {
    pub fn with_interceptor(interceptor: I) -> Self {
        Self {
            interceptor: Arc::new(interceptor),
        }
    }

    pub fn with_arc(interceptor: Arc<I>) -> Self {
        Self { interceptor }
    }

    pub fn interceptor(&self) -> &I {
        &self.interceptor
    }

    /// Row-major matrix product, routed through the interceptor first.
    pub fn matmul(
        &self,
        lhs: &[f32],
        rhs: &[f32],
        m: usize,
        k: usize,
        n: usize,
    ) -> ConvResult<Vec<f32>> {
        if lhs.len() != m * k || rhs.len() != k * n {
            return Err(ConvError::kernel(
                "matmul",
                format!(
                    "operand sizes {} and {} do not match [{m}, {k}] x [{k}, {n}]",
                    lhs.len(),
                    rhs.len()
                ),
            ));
        }
        let op = CpuOp::Matmul { lhs, rhs, m, k, n };
        if let Some(result) = self.interceptor.try_execute(&op) {
            return result;
        }
        Ok(crate::gemm::matmul_f32(lhs, rhs, m, k, n))
    }
}

impl<I: CpuKernelInterceptor> ConvKernels for GenericCpuKernels<I> {
    fn kernels_name(&self) -> &str {
        self.interceptor.kernels_name()
    }

    fn slow_conv2d(&self, args: &Conv2dArgs<'_>) -> ConvResult<Tensor> {
        self.im2col_conv2d("slow_conv2d", args, [1, 1], None)
    }

    fn slow_conv_dilated2d(
        &self,
        args: &Conv2dArgs<'_>,
        dilation: [usize; 2],
    ) -> ConvResult<Tensor> {
        self.im2col_conv2d("slow_conv_dilated2d", args, dilation, None)
    }

    fn slow_conv_transpose2d(
        &self,
        args: &Conv2dArgs<'_>,
        output_padding: [usize; 2],
        dilation: [usize; 2],
    ) -> ConvResult<Tensor> {
        self.col2im_conv_transpose2d("slow_conv_transpose2d", args, output_padding, dilation)
    }

    fn deconv2d_4x4s2(
        &self,
        args: &Conv2dArgs<'_>,
        output_padding: [usize; 2],
        dilation: [usize; 2],
    ) -> ConvResult<Tensor> {
        args.check_window(
            "deconv2d_4x4s2",
            Some(Window2d {
                kernel: 4,
                stride: 2,
            }),
        )?;
        self.col2im_conv_transpose2d("deconv2d_4x4s2", args, output_padding, dilation)
    }

    fn slide_win_conv2d(
        &self,
        args: &Conv2dArgs<'_>,
        variant: SlideWinVariant,
    ) -> ConvResult<Tensor> {
        args.check_window("slide_win_conv2d", variant.window())?;
        crate::conv2d::direct_conv2d("slide_win_conv2d", args, [1, 1])
    }

    fn sgemm_conv2d(
        &self,
        args: &Conv2dArgs<'_>,
        packed_weight: Option<&Tensor>,
        variant: SgemmVariant,
    ) -> ConvResult<Tensor> {
        args.check_window("sgemm_conv2d", variant.window())?;
        self.im2col_conv2d("sgemm_conv2d", args, [1, 1], packed_weight)
    }

    fn winograd_conv2d_3x3s1(
        &self,
        args: &Conv2dArgs<'_>,
        _packed_weight: Option<&Tensor>,
        variant: WinogradVariant,
    ) -> ConvResult<Tensor> {
        args.check_window(
            "winograd_conv2d_3x3s1",
            Some(Window2d {
                kernel: 3,
                stride: 1,
            }),
        )?;
        tracing::trace!(
            tile = variant.output_tile(),
            "winograd weights are recomputed from the canonical layout"
        );
        self.im2col_conv2d("winograd_conv2d_3x3s1", args, [1, 1], None)
    }

    fn packed_conv2d_3x3s2(
        &self,
        args: &Conv2dArgs<'_>,
        packed_weight: Option<&Tensor>,
    ) -> ConvResult<Tensor> {
        args.check_window(
            "packed_conv2d_3x3s2",
            Some(Window2d {
                kernel: 3,
                stride: 2,
            }),
        )?;
        self.im2col_conv2d("packed_conv2d_3x3s2", args, [1, 1], packed_weight)
    }

    fn depthwise_conv2d(
        &self,
        args: &Conv2dArgs<'_>,
        variant: DepthwiseVariant,
    ) -> ConvResult<Tensor> {
        args.check_window("depthwise_conv2d", variant.window())?;
        crate::conv2d::depthwise_conv2d_direct("depthwise_conv2d", args)
    }

    fn slide_win_conv2d_int8(
        &self,
        args: &Conv2dArgs<'_>,
        dilation: [usize; 2],
        scales: &QuantScales<'_>,
    ) -> ConvResult<Tensor> {
        crate::int8::slide_win_conv2d_int8("slide_win_conv2d_int8", args, dilation, scales)
    }
}

/// Extents of a rank-4 NCHW tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Nchw {
    pub n: usize,
    pub c: usize,
    pub h: usize,
    pub w: usize,
}

impl Nchw {
    pub(crate) fn of(kernel: &'static str, what: &str, tensor: &Tensor) -> ConvResult<Self> {
        match tensor.sizes() {
            &[n, c, h, w] => Ok(Nchw { n, c, h, w }),
            other => Err(ConvError::kernel(
                kernel,
                format!("expects a rank-4 {what}, got shape {other:?}"),
            )),
        }
    }

    pub(crate) fn plane(&self) -> usize {
        self.h * self.w
    }

    pub(crate) fn image(&self) -> usize {
        self.c * self.h * self.w
    }
}

/// Dense `F32` copy of an operand, tagged with the calling kernel on failure.
pub(crate) fn dense_f32(kernel: &'static str, tensor: &Tensor) -> ConvResult<Vec<f32>> {
    tensor
        .to_vec_f32()
        .map_err(|err| ConvError::kernel(kernel, err.to_string()))
}

/// Bias values, or zeros when no bias is given.
pub(crate) fn bias_or_zeros(
    kernel: &'static str,
    bias: Option<&Tensor>,
    channels: usize,
) -> ConvResult<Vec<f32>> {
    let Some(bias) = bias else {
        return Ok(vec![0.0; channels]);
    };
    if bias.sizes() != [channels] {
        return Err(ConvError::kernel(
            kernel,
            format!(
                "expects bias of shape [{channels}], got {:?}",
                bias.sizes()
            ),
        ));
    }
    dense_f32(kernel, bias)
}
