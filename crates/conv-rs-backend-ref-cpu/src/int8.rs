//! Int8 sliding-window convolution with per-output-channel dequantization.

use conv_rs::error::{ConvError, ConvResult};
use conv_rs::im2col::{im2col, ColumnGeometry};
use conv_rs::kernels::{Conv2dArgs, QuantScales};
use conv_rs::tensor::{DType, Shape, Tensor};

use crate::cpu::{bias_or_zeros, dense_f32, Nchw};

/// Accumulates `i8 x i8` products in `i32`, then maps each output channel back to `f32` as
/// `acc / (input_scale * weight_scale[oc]) + bias[oc]`. A zero scale product dequantizes to the
/// bias alone.
pub(crate) fn slide_win_conv2d_int8(
    kernel: &'static str,
    args: &Conv2dArgs<'_>,
    dilation: [usize; 2],
    scales: &QuantScales<'_>,
) -> ConvResult<Tensor> {
    if args.input.dtype() != DType::I8 || args.weight.dtype() != DType::I8 {
        return Err(ConvError::kernel(
            kernel,
            format!(
                "expects i8 input and weight, got {} and {}",
                args.input.dtype(),
                args.weight.dtype()
            ),
        ));
    }
    let input = Nchw::of(kernel, "input", args.input)?;
    let weight = Nchw::of(kernel, "weight", args.weight)?;
    if weight.c != input.c || [weight.h, weight.w] != args.kernel_size {
        return Err(ConvError::kernel(
            kernel,
            format!(
                "weight {:?} does not match input {:?}",
                args.weight.sizes(),
                args.input.sizes()
            ),
        ));
    }

    let input_scales = dense_f32(kernel, scales.input)?;
    let weight_scales = dense_f32(kernel, scales.weight)?;
    let &[input_scale] = input_scales.as_slice() else {
        return Err(ConvError::kernel(
            kernel,
            format!("expects one input scale, got {}", input_scales.len()),
        ));
    };
    if weight_scales.len() != weight.n {
        return Err(ConvError::kernel(
            kernel,
            format!(
                "expects {} weight scales, got {}",
                weight.n,
                weight_scales.len()
            ),
        ));
    }
    let bias = bias_or_zeros(kernel, args.bias, weight.n)?;

    let geometry = ColumnGeometry::for_conv(
        input.c,
        input.h,
        input.w,
        args.kernel_size,
        args.padding,
        args.stride,
        dilation,
    )?;
    let rows = geometry.column_rows();
    let cols = geometry.column_cols();
    let x = args
        .input
        .to_vec_i8()
        .map_err(|err| ConvError::kernel(kernel, err.to_string()))?;
    let w = args
        .weight
        .to_vec_i8()
        .map_err(|err| ConvError::kernel(kernel, err.to_string()))?;

    let dequant: Vec<f32> = weight_scales
        .iter()
        .map(|&ws| {
            let product = input_scale * ws;
            if product == 0.0 {
                0.0
            } else {
                1.0 / product
            }
        })
        .collect();

    let mut out = Vec::with_capacity(input.n * weight.n * cols);
    let mut columns = vec![0i8; geometry.column_len()];
    let mut acc = vec![0i32; cols];
    for n_idx in 0..input.n {
        let image = &x[n_idx * input.image()..(n_idx + 1) * input.image()];
        im2col(image, &geometry, &mut columns)?;
        for oc in 0..weight.n {
            acc.fill(0);
            let w_row = &w[oc * rows..(oc + 1) * rows];
            for (r, &wv) in w_row.iter().enumerate() {
                if wv == 0 {
                    continue;
                }
                let col_row = &columns[r * cols..(r + 1) * cols];
                for (a, &xv) in acc.iter_mut().zip(col_row) {
                    *a += i32::from(wv) * i32::from(xv);
                }
            }
            out.extend(acc.iter().map(|&a| a as f32 * dequant[oc] + bias[oc]));
        }
    }
    Tensor::from_vec(
        Shape::new([
            input.n,
            weight.n,
            geometry.output_height,
            geometry.output_width,
        ]),
        out,
    )
}
