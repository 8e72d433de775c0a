//! Group partitioning and recombination.

use std::sync::Arc;

use crate::backend::ConvBackend;
use crate::error::{ConvError, ConvResult};
use crate::execute::{execute_nogroup, NogroupOperands};
use crate::kernels::{ConvKernels, QuantScales};
use crate::params::ConvParams;
use crate::tensor::{DType, Shape, Tensor, TensorData};

/// Splits `tensor` into `groups` equal slices along `dim`.
///
/// All slices are packed into one contiguous allocation and returned as dense views into it, in
/// group order. The source is never modified.
pub fn partition_channels(tensor: &Tensor, dim: usize, groups: usize) -> ConvResult<Vec<Tensor>> {
    if dim >= tensor.rank() {
        return Err(ConvError::shape_mismatch(format!(
            "cannot partition axis {dim} of shape {:?}",
            tensor.sizes()
        )));
    }
    let extent = tensor.size(dim);
    if groups == 0 || extent % groups != 0 {
        return Err(ConvError::shape_mismatch(format!(
            "axis {dim} of shape {:?} does not split into {groups} equal groups",
            tensor.sizes()
        )));
    }
    let per_group = extent / groups;
    let mut dims = tensor.sizes().to_vec();
    dims[dim] = per_group;
    let slice_shape = Shape::new(dims);
    let slice_len = slice_shape.num_elements();

    let data = match tensor.dtype() {
        DType::F32 => {
            let mut arena = Vec::with_capacity(tensor.len());
            for g in 0..groups {
                arena.extend(tensor.narrow(dim, g * per_group, per_group)?.to_vec_f32()?);
            }
            TensorData::F32(Arc::from(arena))
        }
        DType::I8 => {
            let mut arena = Vec::with_capacity(tensor.len());
            for g in 0..groups {
                arena.extend(tensor.narrow(dim, g * per_group, per_group)?.to_vec_i8()?);
            }
            TensorData::I8(Arc::from(arena))
        }
    };

    (0..groups)
        .map(|g| {
            Tensor::from_storage(
                slice_shape.clone(),
                slice_shape.contiguous_strides(),
                g * slice_len,
                data.clone(),
            )
            .map(|view| view.with_device(tensor.device().clone()))
        })
        .collect()
}

/// Runs `backend` over every group and concatenates the results along the channel axis.
///
/// Single-group calls, and variants that handle grouping inside the kernel, go straight to the
/// nogroup executor. A packed weight describes the whole weight, so it cannot be split across
/// groups and is rejected here.
pub fn convolution_grouped(
    kernels: &dyn ConvKernels,
    backend: ConvBackend,
    operands: &NogroupOperands<'_>,
    params: &ConvParams,
) -> ConvResult<Tensor> {
    if params.groups == 1 || backend.handles_groups() {
        return execute_nogroup(kernels, backend, operands, params);
    }
    let groups = usize::try_from(params.groups)
        .map_err(|_| ConvError::invalid_parameter(format!("groups {}", params.groups)))?;
    if operands.packed_weight.is_some() {
        return Err(ConvError::unsupported(format!(
            "{backend} runs groups={groups} one group at a time; a packed weight is only \
             accepted for single-group convolutions"
        )));
    }

    let inputs = partition_channels(operands.input, 1, groups)?;
    let weights = partition_channels(operands.weight, 0, groups)?;
    let biases = operands
        .bias
        .map(|bias| partition_channels(bias, 0, groups))
        .transpose()?;
    let scales = operands
        .scales
        .map(|scales| {
            Ok::<_, ConvError>((
                partition_channels(scales.input, 0, groups)?,
                partition_channels(scales.weight, 0, groups)?,
            ))
        })
        .transpose()?;

    let mut outputs = Vec::with_capacity(groups);
    for g in 0..groups {
        tracing::trace!(group = g, groups, backend = %backend, "dispatching convolution group");
        let group_scales = scales.as_ref().map(|(input, weight)| QuantScales {
            input: &input[g],
            weight: &weight[g],
        });
        let group = NogroupOperands {
            input: &inputs[g],
            weight: &weights[g],
            packed_weight: None,
            bias: biases.as_ref().map(|bias| &bias[g]),
            scales: group_scales,
        };
        outputs.push(execute_nogroup(kernels, backend, &group, params)?);
    }
    Tensor::cat(&outputs, 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slices_share_one_arena() {
        let values: Vec<f32> = (0..24).map(|v| v as f32).collect();
        let tensor = Tensor::from_vec(Shape::new([2, 4, 3]), values).unwrap();
        let parts = partition_channels(&tensor, 1, 2).unwrap();
        assert_eq!(parts.len(), 2);
        assert!(parts[0].shares_storage(&parts[1]));
        assert!(!parts[0].shares_storage(&tensor));
        for part in &parts {
            assert!(part.is_contiguous());
            assert_eq!(part.sizes(), &[2, 2, 3]);
        }
        assert_eq!(
            parts[1].as_f32_slice().unwrap(),
            &[6.0, 7.0, 8.0, 9.0, 10.0, 11.0, 18.0, 19.0, 20.0, 21.0, 22.0, 23.0]
        );
    }

    #[test]
    fn indivisible_axis_is_rejected() {
        let tensor = Tensor::zeros(Shape::new([1, 5, 2, 2]));
        assert!(partition_channels(&tensor, 1, 2).is_err());
        assert!(partition_channels(&tensor, 1, 0).is_err());
    }

    #[test]
    fn partitions_quantized_payloads() {
        let tensor = Tensor::from_i8(Shape::new([4]), vec![1, 2, 3, 4]).unwrap();
        let parts = partition_channels(&tensor, 0, 4).unwrap();
        let values: Vec<i8> = parts
            .iter()
            .map(|part| part.as_i8_slice().unwrap()[0])
            .collect();
        assert_eq!(values, vec![1, 2, 3, 4]);
    }
}
