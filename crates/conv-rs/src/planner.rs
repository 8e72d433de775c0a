//! Entry point tying normalization, validation, selection, and dispatch together.

use std::fmt;
use std::sync::Arc;

use crate::backend::{
    select_conv_backend, ConvBackend, ConvTuning, DefaultConvTuning, IsaCapability,
};
use crate::error::ConvResult;
use crate::execute::NogroupOperands;
use crate::group::convolution_grouped;
use crate::kernels::{ConvKernels, QuantScales};
use crate::params::{ConvOptions, ConvParams};
use crate::profiling;
use crate::tensor::Tensor;
use crate::validate::check_shape_forward;

/// Caller-owned tensors for one convolution.
#[derive(Debug, Clone, Copy)]
pub struct ConvOperands<'a> {
    pub input: &'a Tensor,
    pub weight: &'a Tensor,
    /// Pre-packed or pre-transformed weight for accelerated kernels.
    pub packed_weight: Option<&'a Tensor>,
    pub bias: Option<&'a Tensor>,
    /// One scale per group.
    pub input_scales: Option<&'a Tensor>,
    /// One scale per output channel.
    pub weight_scales: Option<&'a Tensor>,
}

impl<'a> ConvOperands<'a> {
    pub fn new(input: &'a Tensor, weight: &'a Tensor) -> Self {
        Self {
            input,
            weight,
            packed_weight: None,
            bias: None,
            input_scales: None,
            weight_scales: None,
        }
    }

    pub fn with_bias(mut self, bias: &'a Tensor) -> Self {
        self.bias = Some(bias);
        self
    }

    pub fn with_packed_weight(mut self, packed_weight: &'a Tensor) -> Self {
        self.packed_weight = Some(packed_weight);
        self
    }

    pub fn with_int8_scales(mut self, input_scales: &'a Tensor, weight_scales: &'a Tensor) -> Self {
        self.input_scales = Some(input_scales);
        self.weight_scales = Some(weight_scales);
        self
    }
}

/// Outcome of planning: what will run and what it will produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvPlan {
    /// Normalized parameters as handed to the kernels (2-D form for 1-D convolutions).
    pub params: ConvParams,
    pub backend: ConvBackend,
    /// Shape of the final output, after undoing any 1-D lift.
    pub output_sizes: Vec<usize>,
    /// Whether a 1-D convolution was lifted to 2-D.
    pub lifted_1d: bool,
}

/// Plans and runs convolutions against a fixed ISA capability and threshold policy.
///
/// Holds no per-call state; one planner may serve any number of calls from any thread.
#[derive(Clone)]
pub struct ConvPlanner {
    isa: IsaCapability,
    tuning: Arc<dyn ConvTuning>,
}

impl Default for ConvPlanner {
    fn default() -> Self {
        Self::with_isa(IsaCapability::detect())
    }
}

impl fmt::Debug for ConvPlanner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConvPlanner")
            .field("isa", &self.isa)
            .finish_non_exhaustive()
    }
}

struct Prepared {
    input: Tensor,
    weight: Tensor,
    params: ConvParams,
    backend: ConvBackend,
    lifted_1d: bool,
}

impl ConvPlanner {
    pub fn new(isa: IsaCapability, tuning: impl ConvTuning + 'static) -> Self {
        Self {
            isa,
            tuning: Arc::new(tuning),
        }
    }

    /// Planner for `isa` with the default thresholds.
    pub fn with_isa(isa: IsaCapability) -> Self {
        Self::new(isa, DefaultConvTuning::new())
    }

    pub fn isa(&self) -> IsaCapability {
        self.isa
    }

    /// Normalizes, validates, and selects a backend without running any kernel.
    pub fn plan(&self, operands: &ConvOperands<'_>, options: &ConvOptions) -> ConvResult<ConvPlan> {
        let prepared = self.prepare(operands, options)?;
        let mut output_sizes = prepared
            .params
            .output_size(prepared.input.sizes(), prepared.weight.sizes())?;
        if prepared.lifted_1d {
            output_sizes.remove(2);
        }
        Ok(ConvPlan {
            params: prepared.params,
            backend: prepared.backend,
            output_sizes,
            lifted_1d: prepared.lifted_1d,
        })
    }

    /// Plans, then dispatches through `kernels`.
    pub fn run(
        &self,
        kernels: &dyn ConvKernels,
        operands: &ConvOperands<'_>,
        options: &ConvOptions,
    ) -> ConvResult<Tensor> {
        let _scope = profiling::planner_scope("convolution");
        let prepared = self.prepare(operands, options)?;
        let scales = match (operands.input_scales, operands.weight_scales) {
            (Some(input), Some(weight)) => Some(QuantScales { input, weight }),
            _ => None,
        };
        let nogroup = NogroupOperands {
            input: &prepared.input,
            weight: &prepared.weight,
            packed_weight: operands.packed_weight,
            bias: operands.bias,
            scales,
        };
        let output = convolution_grouped(kernels, prepared.backend, &nogroup, &prepared.params)?;
        if prepared.lifted_1d {
            output.squeeze(2)
        } else {
            Ok(output)
        }
    }

    fn prepare(&self, operands: &ConvOperands<'_>, options: &ConvOptions) -> ConvResult<Prepared> {
        let _scope = profiling::planner_scope("plan");
        let params = ConvParams::normalize(operands.weight.rank(), options)?;
        check_shape_forward(operands.input, operands.weight.sizes(), operands.bias, &params)?;

        let lifted_1d = operands.weight.rank() == 3;
        let (input, weight, params) = if lifted_1d {
            (
                operands.input.contiguous().unsqueeze(2)?,
                operands.weight.unsqueeze(2)?,
                params.view_1d_as_2d(),
            )
        } else {
            (operands.input.clone(), operands.weight.clone(), params)
        };

        let backend = select_conv_backend(&input, &weight, &params, self.isa, &*self.tuning)?;
        Ok(Prepared {
            input,
            weight,
            params,
            backend,
            lifted_1d,
        })
    }
}

/// Runs one convolution with the process-detected ISA capability and default thresholds.
pub fn convolution(
    kernels: &dyn ConvKernels,
    operands: &ConvOperands<'_>,
    options: &ConvOptions,
) -> ConvResult<Tensor> {
    ConvPlanner::default().run(kernels, operands, options)
}
