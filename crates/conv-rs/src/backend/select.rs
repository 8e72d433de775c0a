use super::{ConvBackend, ConvTuning, IsaCapability};
use crate::error::{ConvError, ConvResult};
use crate::params::{conv_output_size, ConvParams};
use crate::tensor::Tensor;

/// Picks the convolution algorithm for one call.
///
/// Pure function of its arguments: device, dtypes, geometry, `isa`, and `tuning` fully
/// determine the result. Expects 1-D convolutions to be lifted to 2-D beforehand.
pub fn select_conv_backend(
    input: &Tensor,
    weight: &Tensor,
    params: &ConvParams,
    isa: IsaCapability,
    tuning: &dyn ConvTuning,
) -> ConvResult<ConvBackend> {
    let backend = select_inner(input, weight, params, isa, tuning)?;
    tracing::debug!(
        backend = %backend,
        input = ?input.sizes(),
        weight = ?weight.sizes(),
        params = %params,
        "selected convolution backend"
    );
    Ok(backend)
}

fn select_inner(
    input: &Tensor,
    weight: &Tensor,
    params: &ConvParams,
    isa: IsaCapability,
    tuning: &dyn ConvTuning,
) -> ConvResult<ConvBackend> {
    if !input.device().is_cpu() {
        return Ok(ConvBackend::Overrideable);
    }
    if params.is_int8(input, weight) {
        return Ok(ConvBackend::SlideWin2dInt8);
    }
    if input.dtype() != weight.dtype() {
        return Err(ConvError::unsupported(format!(
            "mixed input/weight dtypes {} and {} have no convolution backend",
            input.dtype(),
            weight.dtype()
        )));
    }

    let planar = input.rank() == 4 && weight.rank() == 4;
    if params.transposed {
        if params.is_dilated() {
            return Ok(ConvBackend::SlowTranspose2d);
        }
        if !planar {
            return Err(unsupported_rank(input, params));
        }
        let window = Window::of(weight, params);
        if isa.supports_neon() && window.is(4, 2) {
            return Ok(ConvBackend::Transpose2dNeonK4S2);
        }
        return Ok(ConvBackend::SlowTranspose2d);
    }

    if params.is_dilated() {
        return Ok(ConvBackend::SlowDilated2d);
    }
    if !planar {
        return Err(unsupported_rank(input, params));
    }

    if isa.supports_neon() {
        select_neon(input, weight, params, tuning)
    } else if isa.supports_x86() {
        Ok(select_x86(input, weight, params, tuning))
    } else {
        Ok(ConvBackend::Slow2d)
    }
}

fn select_neon(
    input: &Tensor,
    weight: &Tensor,
    params: &ConvParams,
    tuning: &dyn ConvTuning,
) -> ConvResult<ConvBackend> {
    let window = Window::of(weight, params);
    let in_channels = input.size(1);
    let out_channels = weight.size(0);

    if params.is_depthwise(input, weight) {
        if window.is(3, 1) {
            return Ok(ConvBackend::DepthwiseNeonK3S1);
        } else if window.is(3, 2) {
            return Ok(ConvBackend::DepthwiseNeonK3S2);
        } else if window.is(5, 1) {
            return Ok(ConvBackend::DepthwiseNeonK5S1);
        } else if window.is(5, 2) {
            return Ok(ConvBackend::DepthwiseNeonK5S2);
        }
    }

    let backend = if window.is(1, 1) {
        if tuning.neon_sgemm_1x1s1(in_channels, out_channels) {
            ConvBackend::Sgemm2dNeonK1S1
        } else {
            ConvBackend::SlideWin2dNeonK1S1
        }
    } else if window.is(1, 2) {
        ConvBackend::Sgemm2dNeonK1S2
    } else if window.is(3, 1) {
        if tuning.neon_winograd_3x3s1(in_channels, out_channels, input.size(2), input.size(3)) {
            ConvBackend::WinogradNeonK3S1
        } else {
            ConvBackend::SlideWin2dNeonK3S1
        }
    } else if window.is(3, 2) {
        let geometry = params.geometry_2d()?;
        let output = conv_output_size(
            input.sizes(),
            weight.sizes(),
            &geometry.stride,
            &geometry.padding,
            &[1, 1],
        )?;
        if tuning.neon_packed_3x3s2(output[2], output[3]) {
            ConvBackend::Packed2dNeonK3S2
        } else {
            ConvBackend::Sgemm2dNeon
        }
    } else if tuning.neon_prefer_sgemm(in_channels, out_channels, window.kernel_w) {
        ConvBackend::Sgemm2dNeon
    } else {
        ConvBackend::SlideWin2d
    };
    Ok(backend)
}

fn select_x86(
    input: &Tensor,
    weight: &Tensor,
    params: &ConvParams,
    tuning: &dyn ConvTuning,
) -> ConvBackend {
    let window = Window::of(weight, params);
    if params.is_depthwise(input, weight) {
        if window.is(3, 1) {
            return ConvBackend::DepthwiseX86K3S1;
        } else if window.is(3, 2) {
            return ConvBackend::DepthwiseX86K3S2;
        }
    }
    if window.is(3, 1) && tuning.x86_winograd_3x3s1(input.size(1), weight.size(0)) {
        return ConvBackend::WinogradX86K3S1;
    }
    ConvBackend::Sgemm2dX86
}

/// Square-window predicate over kernel and stride extents.
struct Window {
    kernel_h: usize,
    kernel_w: usize,
    stride_h: i64,
    stride_w: i64,
}

impl Window {
    fn of(weight: &Tensor, params: &ConvParams) -> Self {
        Window {
            kernel_h: weight.size(2),
            kernel_w: weight.size(3),
            stride_h: params.stride[0],
            stride_w: params.stride[1],
        }
    }

    fn is(&self, kernel: usize, stride: i64) -> bool {
        self.kernel_h == kernel
            && self.kernel_w == kernel
            && self.stride_h == stride
            && self.stride_w == stride
    }
}

fn unsupported_rank(input: &Tensor, params: &ConvParams) -> ConvError {
    ConvError::unsupported(format!(
        "no backend for {}-dimensional input {:?} with {}",
        input.rank(),
        input.sizes(),
        params
    ))
}
