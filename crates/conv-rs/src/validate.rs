//! Shape gate run before any backend is selected.

use crate::error::{ConvError, ConvResult};
use crate::params::ConvParams;
use crate::tensor::Tensor;

/// Checks that `input`, a weight of shape `weight_sizes`, and the optional `bias` form a legal
/// convolution under `params`.
///
/// Checks run in a fixed order and the first failure wins: parameter signs, rank agreement,
/// group divisibility, then channel/bias/kernel-extent agreement for the forward or transposed
/// layout.
pub fn check_shape_forward(
    input: &Tensor,
    weight_sizes: &[usize],
    bias: Option<&Tensor>,
    params: &ConvParams,
) -> ConvResult<()> {
    let input_sizes = input.sizes();
    let groups = params.groups;

    if params.is_padding_neg() {
        return Err(ConvError::invalid_parameter(format!(
            "negative padding is not supported: {:?}",
            params.padding.as_slice()
        )));
    }
    if params.is_output_padding_neg() {
        return Err(ConvError::invalid_parameter(format!(
            "negative output_padding is not supported: {:?}",
            params.output_padding.as_slice()
        )));
    }
    if params.is_stride_nonpos() {
        return Err(ConvError::invalid_parameter(format!(
            "non-positive stride is not supported: {:?}",
            params.stride.as_slice()
        )));
    }
    if params.is_dilation_nonpos() {
        return Err(ConvError::invalid_parameter(format!(
            "non-positive dilation is not supported: {:?}",
            params.dilation.as_slice()
        )));
    }
    if groups <= 0 {
        return Err(ConvError::invalid_parameter(format!(
            "non-positive groups is not supported: {groups}"
        )));
    }

    let weight_dim = weight_sizes.len();
    if weight_dim != input.rank() {
        return Err(ConvError::shape_mismatch(format!(
            "expected {weight_dim}-dimensional input for {weight_dim}-dimensional weight \
             {weight_sizes:?}, but got {}-dimensional input of size {input_sizes:?} instead",
            input.rank()
        )));
    }
    if params.spatial_rank() + 2 != weight_dim {
        return Err(ConvError::shape(format!(
            "{} carries {} spatial axes but weight {weight_sizes:?} has {}",
            params,
            params.spatial_rank(),
            weight_dim.saturating_sub(2)
        )));
    }

    let out_channels = weight_sizes[0] as i64;
    if out_channels < groups {
        return Err(ConvError::invalid_parameter(format!(
            "given groups={groups}, expected weight to be at least {groups} at dimension 0, but \
             got weight of size {weight_sizes:?} instead"
        )));
    }
    if out_channels % groups != 0 {
        return Err(ConvError::invalid_parameter(format!(
            "given groups={groups}, expected weight to be divisible by {groups} at dimension 0, \
             but got weight of size {weight_sizes:?} instead"
        )));
    }

    if !params.transposed {
        let expected_channels = weight_sizes[1] as i64 * groups;
        if input_sizes[1] as i64 != expected_channels {
            return Err(ConvError::shape_mismatch(format!(
                "given groups={groups}, weight of size {weight_sizes:?}, expected input \
                 {input_sizes:?} to have {expected_channels} channels, but got {} channels \
                 instead",
                input_sizes[1]
            )));
        }
        check_bias(bias, weight_sizes[0], weight_sizes)?;
        check_kernel_fits(input_sizes, weight_sizes, params)?;
    } else {
        if input_sizes[1] != weight_sizes[0] {
            return Err(ConvError::shape_mismatch(format!(
                "given transposed=true, weight of size {weight_sizes:?}, expected input \
                 {input_sizes:?} to have {} channels, but got {} channels instead",
                weight_sizes[0], input_sizes[1]
            )));
        }
        check_bias(bias, weight_sizes[1] * groups as usize, weight_sizes)?;
    }
    Ok(())
}

fn check_bias(bias: Option<&Tensor>, expected: usize, weight_sizes: &[usize]) -> ConvResult<()> {
    let Some(bias) = bias else {
        return Ok(());
    };
    if bias.rank() != 1 || bias.size(0) != expected {
        return Err(ConvError::shape_mismatch(format!(
            "given weight of size {weight_sizes:?}, expected bias to be 1-dimensional with \
             {expected} elements, but got bias of size {:?} instead",
            bias.sizes()
        )));
    }
    Ok(())
}

fn check_kernel_fits(
    input_sizes: &[usize],
    weight_sizes: &[usize],
    params: &ConvParams,
) -> ConvResult<()> {
    let mut padded = Vec::with_capacity(params.spatial_rank());
    let mut effective = Vec::with_capacity(params.spatial_rank());
    let mut too_large = false;
    for axis in 2..input_sizes.len() {
        let padding = params.padding[axis - 2];
        let dilation = params.dilation[axis - 2];
        let padded_extent = padding
            .checked_mul(2)
            .and_then(|p| p.checked_add(input_sizes[axis] as i64))
            .ok_or_else(|| {
                ConvError::invalid_parameter(format!(
                    "padding {padding} overflows the padded extent of axis {axis}"
                ))
            })?;
        let effective_kernel = dilation
            .checked_mul(weight_sizes[axis] as i64 - 1)
            .and_then(|d| d.checked_add(1))
            .ok_or_else(|| {
                ConvError::invalid_parameter(format!(
                    "dilation {dilation} overflows the effective kernel extent of axis {axis}"
                ))
            })?;
        too_large |= padded_extent < effective_kernel;
        padded.push(padded_extent);
        effective.push(effective_kernel);
    }
    if too_large {
        return Err(ConvError::KernelTooLarge {
            padded: join_extents(&padded),
            effective: join_extents(&effective),
        });
    }
    Ok(())
}

fn join_extents(extents: &[i64]) -> String {
    let parts: Vec<String> = extents.iter().map(i64::to_string).collect();
    format!("({})", parts.join(" x "))
}
