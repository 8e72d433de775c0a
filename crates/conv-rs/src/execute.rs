//! Maps a selected backend onto exactly one kernel invocation.

use crate::backend::ConvBackend;
use crate::error::{ConvError, ConvResult};
use crate::kernels::{
    Conv2dArgs, ConvKernels, DepthwiseVariant, QuantScales, SgemmVariant, SlideWinVariant,
    WinogradVariant,
};
use crate::params::ConvParams;
use crate::profiling;
use crate::tensor::Tensor;

/// Operands of a single-group kernel call.
#[derive(Debug, Clone, Copy)]
pub struct NogroupOperands<'a> {
    pub input: &'a Tensor,
    pub weight: &'a Tensor,
    pub packed_weight: Option<&'a Tensor>,
    pub bias: Option<&'a Tensor>,
    pub scales: Option<QuantScales<'a>>,
}

/// Runs `backend` once on `operands`.
///
/// The input is made contiguous first. Every non-overridden result is checked against the
/// standard output shape before it is returned.
pub fn execute_nogroup(
    kernels: &dyn ConvKernels,
    backend: ConvBackend,
    operands: &NogroupOperands<'_>,
    params: &ConvParams,
) -> ConvResult<Tensor> {
    let _scope = profiling::kernel_scope(backend.name());
    let input = operands.input.contiguous();
    let weight = operands.weight;
    if weight.rank() != 4 || input.rank() != 4 {
        return Err(ConvError::unsupported(format!(
            "{backend} expects 4-dimensional input and weight, got {:?} and {:?}",
            input.sizes(),
            weight.sizes()
        )));
    }
    if backend == ConvBackend::SlideWin2dInt8 && params.transposed {
        return Err(ConvError::unsupported(format!(
            "{backend} only computes forward convolutions; transposed int8 is not supported"
        )));
    }
    let geometry = params.geometry_2d()?;
    let args = Conv2dArgs {
        input: &input,
        weight,
        bias: operands.bias,
        kernel_size: [weight.size(2), weight.size(3)],
        stride: geometry.stride,
        padding: geometry.padding,
    };
    let packed = operands.packed_weight;

    let output = match backend {
        ConvBackend::Overrideable => return kernels.overrideable_conv2d(&args, params),
        ConvBackend::SlideWin2dInt8 => {
            let scales = operands.scales.ok_or_else(|| {
                ConvError::invalid_parameter(
                    "int8 convolution requires both input and weight scales",
                )
            })?;
            kernels.slide_win_conv2d_int8(&args, geometry.dilation, &scales)?
        }
        ConvBackend::SlowTranspose2d => {
            kernels.slow_conv_transpose2d(&args, geometry.output_padding, geometry.dilation)?
        }
        ConvBackend::Transpose2dNeonK4S2 => {
            kernels.deconv2d_4x4s2(&args, geometry.output_padding, geometry.dilation)?
        }
        ConvBackend::SlowDilated2d => kernels.slow_conv_dilated2d(&args, geometry.dilation)?,
        ConvBackend::DepthwiseNeonK3S1 => {
            kernels.depthwise_conv2d(&args, DepthwiseVariant::NeonK3S1)?
        }
        ConvBackend::DepthwiseNeonK3S2 => {
            kernels.depthwise_conv2d(&args, DepthwiseVariant::NeonK3S2)?
        }
        ConvBackend::DepthwiseNeonK5S1 => {
            kernels.depthwise_conv2d(&args, DepthwiseVariant::NeonK5S1)?
        }
        ConvBackend::DepthwiseNeonK5S2 => {
            kernels.depthwise_conv2d(&args, DepthwiseVariant::NeonK5S2)?
        }
        ConvBackend::DepthwiseX86K3S1 => {
            kernels.depthwise_conv2d(&args, DepthwiseVariant::X86K3S1)?
        }
        ConvBackend::DepthwiseX86K3S2 => {
            kernels.depthwise_conv2d(&args, DepthwiseVariant::X86K3S2)?
        }
        ConvBackend::Sgemm2dNeonK1S1 => {
            kernels.sgemm_conv2d(&args, packed, SgemmVariant::Neon1x1S1)?
        }
        ConvBackend::Sgemm2dNeonK1S2 => {
            kernels.sgemm_conv2d(&args, packed, SgemmVariant::Neon1x1S2)?
        }
        ConvBackend::Sgemm2dNeon => kernels.sgemm_conv2d(&args, packed, SgemmVariant::Neon)?,
        ConvBackend::Sgemm2dX86 => kernels.sgemm_conv2d(&args, packed, SgemmVariant::X86)?,
        ConvBackend::SlideWin2dNeonK1S1 => {
            kernels.slide_win_conv2d(&args, SlideWinVariant::Neon1x1S1)?
        }
        ConvBackend::SlideWin2dNeonK3S1 => {
            kernels.slide_win_conv2d(&args, SlideWinVariant::Neon3x3S1)?
        }
        ConvBackend::SlideWin2d => kernels.slide_win_conv2d(&args, SlideWinVariant::General)?,
        ConvBackend::WinogradNeonK3S1 => {
            kernels.winograd_conv2d_3x3s1(&args, packed, WinogradVariant::Neon)?
        }
        ConvBackend::WinogradX86K3S1 => {
            kernels.winograd_conv2d_3x3s1(&args, packed, WinogradVariant::X86)?
        }
        ConvBackend::Packed2dNeonK3S2 => kernels.packed_conv2d_3x3s2(&args, packed)?,
        ConvBackend::Slow2d => kernels.slow_conv2d(&args)?,
    };

    let local = ConvParams {
        groups: 1,
        ..params.clone()
    };
    let expected = local.output_size(input.sizes(), weight.sizes())?;
    if output.sizes() != expected.as_slice() {
        return Err(ConvError::kernel(
            backend.name(),
            format!(
                "returned output of shape {:?}, expected {expected:?}",
                output.sizes()
            ),
        ));
    }
    Ok(output)
}
