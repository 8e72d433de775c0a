use std::sync::Mutex;

use conv_rs::error::ConvResult;
use conv_rs::kernels::{
    Conv2dArgs, ConvKernels, DepthwiseVariant, QuantScales, SgemmVariant, SlideWinVariant,
    WinogradVariant,
};
use conv_rs::params::{conv_transpose_output_size, ConvParams};
use conv_rs::tensor::{Shape, Tensor};

/// One kernel invocation as observed by [`RecordingKernels`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub method: &'static str,
    pub variant: Option<String>,
    pub input: Vec<usize>,
    pub weight: Vec<usize>,
    pub has_bias: bool,
    pub has_packed_weight: bool,
    pub has_scales: bool,
}

/// Test-only kernel set that records every call and returns zeros of the standard output shape.
#[derive(Default)]
pub struct RecordingKernels {
    calls: Mutex<Vec<RecordedCall>>,
}

struct CallDetails {
    variant: Option<String>,
    packed: bool,
    scales: bool,
}

impl CallDetails {
    fn plain() -> Self {
        Self {
            variant: None,
            packed: false,
            scales: false,
        }
    }

    fn variant(variant: impl std::fmt::Debug) -> Self {
        Self {
            variant: Some(format!("{variant:?}")),
            ..Self::plain()
        }
    }

    fn packed(mut self, packed: Option<&Tensor>) -> Self {
        self.packed = packed.is_some();
        self
    }
}

impl RecordingKernels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().expect("recording mutex poisoned").clone()
    }

    pub fn take_calls(&self) -> Vec<RecordedCall> {
        std::mem::take(&mut *self.calls.lock().expect("recording mutex poisoned"))
    }

    /// Methods invoked so far, in order.
    pub fn methods(&self) -> Vec<&'static str> {
        self.calls().iter().map(|call| call.method).collect()
    }

    fn record(&self, method: &'static str, args: &Conv2dArgs<'_>, details: CallDetails) {
        self.calls
            .lock()
            .expect("recording mutex poisoned")
            .push(RecordedCall {
                method,
                variant: details.variant,
                input: args.input.sizes().to_vec(),
                weight: args.weight.sizes().to_vec(),
                has_bias: args.bias.is_some(),
                has_packed_weight: details.packed,
                has_scales: details.scales,
            });
    }

    fn forward_zeros(args: &Conv2dArgs<'_>, dilation: [usize; 2]) -> ConvResult<Tensor> {
        Ok(Tensor::zeros(args.output_shape(dilation)?))
    }

    fn transposed_zeros(
        args: &Conv2dArgs<'_>,
        output_padding: [usize; 2],
        dilation: [usize; 2],
    ) -> ConvResult<Tensor> {
        let dims = conv_transpose_output_size(
            args.input.sizes(),
            args.weight.sizes(),
            1,
            &args.stride,
            &args.padding,
            &dilation,
            &output_padding,
        )?;
        Ok(Tensor::zeros(Shape::new(dims)))
    }
}

impl ConvKernels for RecordingKernels {
    fn kernels_name(&self) -> &str {
        "recording"
    }

    fn slow_conv2d(&self, args: &Conv2dArgs<'_>) -> ConvResult<Tensor> {
        self.record("slow_conv2d", args, CallDetails::plain());
        Self::forward_zeros(args, [1, 1])
    }

    fn slow_conv_dilated2d(
        &self,
        args: &Conv2dArgs<'_>,
        dilation: [usize; 2],
    ) -> ConvResult<Tensor> {
        self.record("slow_conv_dilated2d", args, CallDetails::plain());
        Self::forward_zeros(args, dilation)
    }

    fn slow_conv_transpose2d(
        &self,
        args: &Conv2dArgs<'_>,
        output_padding: [usize; 2],
        dilation: [usize; 2],
    ) -> ConvResult<Tensor> {
        self.record("slow_conv_transpose2d", args, CallDetails::plain());
        Self::transposed_zeros(args, output_padding, dilation)
    }

    fn deconv2d_4x4s2(
        &self,
        args: &Conv2dArgs<'_>,
        output_padding: [usize; 2],
        dilation: [usize; 2],
    ) -> ConvResult<Tensor> {
        self.record("deconv2d_4x4s2", args, CallDetails::plain());
        Self::transposed_zeros(args, output_padding, dilation)
    }

    fn slide_win_conv2d(
        &self,
        args: &Conv2dArgs<'_>,
        variant: SlideWinVariant,
    ) -> ConvResult<Tensor> {
        self.record("slide_win_conv2d", args, CallDetails::variant(variant));
        Self::forward_zeros(args, [1, 1])
    }

    fn sgemm_conv2d(
        &self,
        args: &Conv2dArgs<'_>,
        packed_weight: Option<&Tensor>,
        variant: SgemmVariant,
    ) -> ConvResult<Tensor> {
        self.record(
            "sgemm_conv2d",
            args,
            CallDetails::variant(variant).packed(packed_weight),
        );
        Self::forward_zeros(args, [1, 1])
    }

    fn winograd_conv2d_3x3s1(
        &self,
        args: &Conv2dArgs<'_>,
        packed_weight: Option<&Tensor>,
        variant: WinogradVariant,
    ) -> ConvResult<Tensor> {
        self.record(
            "winograd_conv2d_3x3s1",
            args,
            CallDetails::variant(variant).packed(packed_weight),
        );
        Self::forward_zeros(args, [1, 1])
    }

    fn packed_conv2d_3x3s2(
        &self,
        args: &Conv2dArgs<'_>,
        packed_weight: Option<&Tensor>,
    ) -> ConvResult<Tensor> {
        self.record(
            "packed_conv2d_3x3s2",
            args,
            CallDetails::plain().packed(packed_weight),
        );
        Self::forward_zeros(args, [1, 1])
    }

    fn depthwise_conv2d(
        &self,
        args: &Conv2dArgs<'_>,
        variant: DepthwiseVariant,
    ) -> ConvResult<Tensor> {
        self.record("depthwise_conv2d", args, CallDetails::variant(variant));
        Self::forward_zeros(args, [1, 1])
    }

    fn slide_win_conv2d_int8(
        &self,
        args: &Conv2dArgs<'_>,
        dilation: [usize; 2],
        _scales: &QuantScales<'_>,
    ) -> ConvResult<Tensor> {
        let details = CallDetails {
            scales: true,
            ..CallDetails::plain()
        };
        self.record("slide_win_conv2d_int8", args, details);
        Self::forward_zeros(args, dilation)
    }

    fn overrideable_conv2d(
        &self,
        args: &Conv2dArgs<'_>,
        params: &ConvParams,
    ) -> ConvResult<Tensor> {
        self.record("overrideable_conv2d", args, CallDetails::plain());
        let dims = params.output_size(args.input.sizes(), args.weight.sizes())?;
        Ok(Tensor::zeros(Shape::new(dims)))
    }
}
