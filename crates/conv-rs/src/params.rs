//! Convolution parameters: user-facing short forms and their per-axis normalization.

use crate::error::{ConvError, ConvResult};
use crate::tensor::Tensor;
use smallvec::{smallvec, SmallVec};
use std::fmt;

/// Per-spatial-axis integer list. Signed so malformed user input stays representable.
pub type IntList = SmallVec<[i64; 4]>;

/// Caller-supplied convolution options.
///
/// Each list holds either one value (broadcast to every spatial axis) or exactly one value per
/// spatial axis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvOptions {
    pub stride: IntList,
    pub padding: IntList,
    pub dilation: IntList,
    pub output_padding: IntList,
    pub transposed: bool,
    pub groups: i64,
}

impl Default for ConvOptions {
    fn default() -> Self {
        Self {
            stride: smallvec![1],
            padding: smallvec![0],
            dilation: smallvec![1],
            output_padding: smallvec![0],
            transposed: false,
            groups: 1,
        }
    }
}

impl ConvOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stride(mut self, stride: impl AsRef<[i64]>) -> Self {
        self.stride = IntList::from_slice(stride.as_ref());
        self
    }

    pub fn padding(mut self, padding: impl AsRef<[i64]>) -> Self {
        self.padding = IntList::from_slice(padding.as_ref());
        self
    }

    pub fn dilation(mut self, dilation: impl AsRef<[i64]>) -> Self {
        self.dilation = IntList::from_slice(dilation.as_ref());
        self
    }

    pub fn output_padding(mut self, output_padding: impl AsRef<[i64]>) -> Self {
        self.output_padding = IntList::from_slice(output_padding.as_ref());
        self
    }

    pub fn transposed(mut self, transposed: bool) -> Self {
        self.transposed = transposed;
        self
    }

    pub fn groups(mut self, groups: i64) -> Self {
        self.groups = groups;
        self
    }
}

/// Broadcasts a one-element list to `dim` entries, or passes through a list of length `dim`.
pub fn expand_param_if_needed(values: &[i64], name: &str, dim: usize) -> ConvResult<IntList> {
    match values.len() {
        1 => Ok(smallvec![values[0]; dim]),
        len if len == dim => Ok(IntList::from_slice(values)),
        len => Err(ConvError::shape(format!(
            "expected {name} to be a single integer value or a list of {dim} values to match the \
             convolution dimensions, but got {name}={values:?} ({len} values)"
        ))),
    }
}

/// Normalized parameters: every list has exactly one entry per spatial axis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvParams {
    pub stride: IntList,
    pub padding: IntList,
    pub dilation: IntList,
    pub output_padding: IntList,
    pub transposed: bool,
    pub groups: i64,
}

impl ConvParams {
    /// Expands `options` against a weight of rank `weight_rank` (spatial rank `weight_rank - 2`).
    pub fn normalize(weight_rank: usize, options: &ConvOptions) -> ConvResult<Self> {
        if weight_rank < 3 {
            return Err(ConvError::shape(format!(
                "weight should have at least three dimensions, got rank {weight_rank}"
            )));
        }
        let dim = weight_rank - 2;
        Ok(ConvParams {
            stride: expand_param_if_needed(&options.stride, "stride", dim)?,
            padding: expand_param_if_needed(&options.padding, "padding", dim)?,
            dilation: expand_param_if_needed(&options.dilation, "dilation", dim)?,
            output_padding: expand_param_if_needed(
                &options.output_padding,
                "output_padding",
                dim,
            )?,
            transposed: options.transposed,
            groups: options.groups,
        })
    }

    pub fn spatial_rank(&self) -> usize {
        self.stride.len()
    }

    pub fn is_dilated(&self) -> bool {
        self.dilation.iter().any(|&d| d != 1)
    }

    pub fn is_padding_neg(&self) -> bool {
        self.padding.iter().any(|&p| p < 0)
    }

    pub fn is_output_padding_neg(&self) -> bool {
        self.output_padding.iter().any(|&p| p < 0)
    }

    pub fn is_stride_nonpos(&self) -> bool {
        self.stride.iter().any(|&s| s <= 0)
    }

    pub fn is_dilation_nonpos(&self) -> bool {
        self.dilation.iter().any(|&d| d <= 0)
    }

    /// Input channels, output channels and group count all agree.
    pub fn is_depthwise(&self, input: &Tensor, weight: &Tensor) -> bool {
        !self.transposed
            && input.rank() == 4
            && weight.rank() == 4
            && input.size(1) as i64 == self.groups
            && weight.size(0) as i64 == self.groups
    }

    /// Both operands carry quantized int8 payloads.
    pub fn is_int8(&self, input: &Tensor, weight: &Tensor) -> bool {
        input.dtype().is_quantized() && weight.dtype().is_quantized()
    }

    /// Lifts 1-D parameters to 2-D by prepending a unit spatial axis.
    pub fn view_1d_as_2d(&self) -> Self {
        if self.spatial_rank() != 1 {
            return self.clone();
        }
        ConvParams {
            stride: smallvec![1, self.stride[0]],
            padding: smallvec![0, self.padding[0]],
            dilation: smallvec![1, self.dilation[0]],
            output_padding: smallvec![0, self.output_padding[0]],
            transposed: self.transposed,
            groups: self.groups,
        }
    }

    /// Output extents for `input` and `weight` under these (validated) parameters, for any
    /// spatial rank and either layout.
    pub fn output_size(&self, input: &[usize], weight: &[usize]) -> ConvResult<Vec<usize>> {
        let stride = to_unsigned(&self.stride, "stride")?;
        let padding = to_unsigned(&self.padding, "padding")?;
        let dilation = to_unsigned(&self.dilation, "dilation")?;
        if self.transposed {
            let output_padding = to_unsigned(&self.output_padding, "output_padding")?;
            let groups = usize::try_from(self.groups).map_err(|_| {
                ConvError::invalid_parameter(format!("negative groups {}", self.groups))
            })?;
            conv_transpose_output_size(
                input,
                weight,
                groups,
                &stride,
                &padding,
                &dilation,
                &output_padding,
            )
        } else {
            conv_output_size(input, weight, &stride, &padding, &dilation)
        }
    }

    /// Unsigned 2-D geometry for kernel invocation. Requires validated parameters.
    pub fn geometry_2d(&self) -> ConvResult<Geometry2d> {
        Ok(Geometry2d {
            stride: to_pair(&self.stride, "stride")?,
            padding: to_pair(&self.padding, "padding")?,
            dilation: to_pair(&self.dilation, "dilation")?,
            output_padding: to_pair(&self.output_padding, "output_padding")?,
        })
    }
}

impl fmt::Display for ConvParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ConvParams {{ stride = {:?} padding = {:?} dilation = {:?} transposed = {} \
             output_padding = {:?} groups = {} }}",
            self.stride.as_slice(),
            self.padding.as_slice(),
            self.dilation.as_slice(),
            self.transposed,
            self.output_padding.as_slice(),
            self.groups
        )
    }
}

/// Height/width geometry handed to 2-D kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry2d {
    pub stride: [usize; 2],
    pub padding: [usize; 2],
    pub dilation: [usize; 2],
    pub output_padding: [usize; 2],
}

fn to_unsigned(values: &[i64], name: &str) -> ConvResult<SmallVec<[usize; 4]>> {
    values
        .iter()
        .map(|&v| {
            usize::try_from(v)
                .map_err(|_| ConvError::invalid_parameter(format!("negative {name} {values:?}")))
        })
        .collect()
}

fn to_pair(values: &[i64], name: &str) -> ConvResult<[usize; 2]> {
    if values.len() != 2 {
        return Err(ConvError::shape(format!(
            "{name} must have two entries for a 2-D kernel, got {values:?}"
        )));
    }
    let unsigned = to_unsigned(values, name)?;
    Ok([unsigned[0], unsigned[1]])
}

/// Output extents of a forward convolution:
/// `out = (in + 2 * pad - dilation * (k - 1) - 1) / stride + 1` per spatial axis.
///
/// `input` is `[N, C, spatial..]` and `weight` is `[O, C / groups, kernel..]`.
pub fn conv_output_size(
    input: &[usize],
    weight: &[usize],
    stride: &[usize],
    padding: &[usize],
    dilation: &[usize],
) -> ConvResult<Vec<usize>> {
    let spatial = check_output_ranks(input, weight, stride, padding, dilation)?;
    let mut out = Vec::with_capacity(input.len());
    out.push(input[0]);
    out.push(weight[0]);
    for axis in 0..spatial {
        let extent = input[axis + 2];
        let kernel = weight[axis + 2];
        if stride[axis] == 0 || kernel == 0 {
            return Err(ConvError::invalid_parameter(format!(
                "stride ({}) and kernel extent ({}) must be positive",
                stride[axis], kernel
            )));
        }
        let padded = padding[axis]
            .checked_mul(2)
            .and_then(|p| p.checked_add(extent))
            .ok_or_else(|| ConvError::shape_mismatch("padded extent overflows usize"))?;
        let window = dilation[axis]
            .checked_mul(kernel - 1)
            .and_then(|v| v.checked_add(1))
            .ok_or_else(|| ConvError::shape_mismatch("dilated window overflows usize"))?;
        if padded < window {
            return Err(ConvError::KernelTooLarge {
                padded: padded.to_string(),
                effective: window.to_string(),
            });
        }
        out.push((padded - window) / stride[axis] + 1);
    }
    Ok(out)
}

/// Output extents of a transposed convolution:
/// `out = (in - 1) * stride - 2 * pad + dilation * (k - 1) + output_padding + 1`.
///
/// `weight` is `[C_in, O / groups, kernel..]`, so the output has `weight[1] * groups` channels.
pub fn conv_transpose_output_size(
    input: &[usize],
    weight: &[usize],
    groups: usize,
    stride: &[usize],
    padding: &[usize],
    dilation: &[usize],
    output_padding: &[usize],
) -> ConvResult<Vec<usize>> {
    let spatial = check_output_ranks(input, weight, stride, padding, dilation)?;
    if output_padding.len() != spatial {
        return Err(ConvError::shape(format!(
            "output_padding has {} entries for {spatial} spatial axes",
            output_padding.len()
        )));
    }
    let overflow = |what: &str, axis: usize| {
        ConvError::invalid_parameter(format!("transposed {what} overflows usize on axis {axis}"))
    };
    let mut out = Vec::with_capacity(input.len());
    out.push(input[0]);
    out.push(
        weight[1]
            .checked_mul(groups)
            .ok_or_else(|| ConvError::invalid_parameter("transposed output channels overflow"))?,
    );
    for axis in 0..spatial {
        let grown = input[axis + 2]
            .saturating_sub(1)
            .checked_mul(stride[axis])
            .ok_or_else(|| overflow("strided extent", axis))?
            .checked_add(
                dilation[axis]
                    .checked_mul(weight[axis + 2].saturating_sub(1))
                    .ok_or_else(|| overflow("dilated window", axis))?,
            )
            .and_then(|v| v.checked_add(output_padding[axis]))
            .and_then(|v| v.checked_add(1))
            .ok_or_else(|| overflow("output extent", axis))?;
        let trimmed = padding[axis]
            .checked_mul(2)
            .and_then(|p| grown.checked_sub(p))
            .ok_or_else(|| {
                ConvError::invalid_parameter(format!(
                    "padding {} removes the whole transposed output extent {} on axis {axis}",
                    padding[axis], grown
                ))
            })?;
        if trimmed == 0 {
            return Err(ConvError::invalid_parameter(format!(
                "transposed output extent is empty on axis {axis}"
            )));
        }
        out.push(trimmed);
    }
    Ok(out)
}

fn check_output_ranks(
    input: &[usize],
    weight: &[usize],
    stride: &[usize],
    padding: &[usize],
    dilation: &[usize],
) -> ConvResult<usize> {
    if input.len() < 3 || input.len() != weight.len() {
        return Err(ConvError::shape_mismatch(format!(
            "input {input:?} and weight {weight:?} must share a rank of at least 3"
        )));
    }
    let spatial = input.len() - 2;
    if stride.len() != spatial || padding.len() != spatial || dilation.len() != spatial {
        return Err(ConvError::shape(format!(
            "geometry lists must have {spatial} entries: stride {stride:?}, padding {padding:?}, \
             dilation {dilation:?}"
        )));
    }
    Ok(spatial)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_scalar_to_every_axis() {
        let expanded = expand_param_if_needed(&[2], "stride", 3).unwrap();
        assert_eq!(expanded.as_slice(), &[2, 2, 2]);
    }

    #[test]
    fn passes_full_length_lists_through() {
        let expanded = expand_param_if_needed(&[1, 2], "padding", 2).unwrap();
        assert_eq!(expanded.as_slice(), &[1, 2]);
    }

    #[test]
    fn rejects_wrong_length_lists() {
        let err = expand_param_if_needed(&[1, 2, 3], "dilation", 2).expect_err("length 3 vs 2");
        assert!(matches!(err, ConvError::Shape(_)));
        assert!(err.to_string().contains("dilation"));
    }

    #[test]
    fn display_lists_every_field() {
        let params = ConvParams::normalize(4, &ConvOptions::new().stride([2]).groups(4)).unwrap();
        let text = params.to_string();
        assert!(text.contains("stride = [2, 2]"));
        assert!(text.contains("groups = 4"));
        assert!(text.contains("transposed = false"));
    }

    #[test]
    fn view_1d_as_2d_prepends_unit_axis() {
        let params = ConvParams::normalize(
            3,
            &ConvOptions::new()
                .stride([3])
                .padding([2])
                .dilation([2])
                .output_padding([1]),
        )
        .unwrap();
        let lifted = params.view_1d_as_2d();
        assert_eq!(lifted.stride.as_slice(), &[1, 3]);
        assert_eq!(lifted.padding.as_slice(), &[0, 2]);
        assert_eq!(lifted.dilation.as_slice(), &[1, 2]);
        assert_eq!(lifted.output_padding.as_slice(), &[0, 1]);
    }

    #[test]
    fn transposed_output_extent_follows_formula() {
        let out = conv_transpose_output_size(
            &[1, 4, 5, 7],
            &[4, 3, 3, 3],
            2,
            &[2, 2],
            &[1, 1],
            &[1, 1],
            &[1, 0],
        )
        .unwrap();
        // (5-1)*2 - 2 + 2 + 1 + 1 = 10; (7-1)*2 - 2 + 2 + 0 + 1 = 13
        assert_eq!(out, vec![1, 6, 10, 13]);
    }
}
