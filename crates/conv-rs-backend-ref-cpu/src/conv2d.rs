//! Forward NCHW convolutions: im2col + matmul, direct sliding window, and direct depthwise.

use conv_rs::error::{ConvError, ConvResult};
use conv_rs::im2col::{im2col, ColumnGeometry};
use conv_rs::kernels::Conv2dArgs;
use conv_rs::tensor::{Shape, Tensor};

use crate::cpu::{bias_or_zeros, dense_f32, CpuKernelInterceptor, GenericCpuKernels, Nchw};

impl<I: CpuKernelInterceptor> GenericCpuKernels<I> {
    /// Lowers each image to a column matrix and multiplies it by the `[O, C*kh*kw]` weight.
    ///
    /// `packed_weight`, when given, replaces the canonical weight as the left operand and must
    /// hold the same `O * C * kh * kw` values in row-major `[O, C*kh*kw]` order.
    pub(crate) fn im2col_conv2d(
        &self,
        kernel: &'static str,
        args: &Conv2dArgs<'_>,
        dilation: [usize; 2],
        packed_weight: Option<&Tensor>,
    ) -> ConvResult<Tensor> {
        let input = Nchw::of(kernel, "input", args.input)?;
        let weight = Nchw::of(kernel, "weight", args.weight)?;
        check_forward_weight(kernel, args, &input, &weight)?;

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
        let lhs = match packed_weight {
            Some(packed) if packed.len() != weight.n * rows => {
                return Err(ConvError::kernel(
                    kernel,
                    format!(
                        "packed weight of shape {:?} does not hold [{}, {rows}] values",
                        packed.sizes(),
                        weight.n
                    ),
                ))
            }
            Some(packed) => dense_f32(kernel, packed)?,
            None => dense_f32(kernel, args.weight)?,
        };
        let bias = bias_or_zeros(kernel, args.bias, weight.n)?;
        let x = dense_f32(kernel, args.input)?;

        let mut out = Vec::with_capacity(input.n * weight.n * cols);
        let mut columns = vec![0.0f32; geometry.column_len()];
        for image in x.chunks_exact(input.image().max(1)).take(input.n) {
            im2col(image, &geometry, &mut columns)?;
            let mut product = self.matmul(&lhs, &columns, weight.n, rows, cols)?;
            if cols > 0 {
                for (channel, values) in product.chunks_exact_mut(cols).enumerate() {
                    let b = bias[channel];
                    values.iter_mut().for_each(|v| *v += b);
                }
            }
            out.extend_from_slice(&product);
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
}

/// Direct sliding-window convolution: every output accumulates its window in place.
pub(crate) fn direct_conv2d(
    kernel: &'static str,
    args: &Conv2dArgs<'_>,
    dilation: [usize; 2],
) -> ConvResult<Tensor> {
    let input = Nchw::of(kernel, "input", args.input)?;
    let weight = Nchw::of(kernel, "weight", args.weight)?;
    check_forward_weight(kernel, args, &input, &weight)?;
    let geometry = ColumnGeometry::for_conv(
        input.c,
        input.h,
        input.w,
        args.kernel_size,
        args.padding,
        args.stride,
        dilation,
    )?;
    let (out_h, out_w) = (geometry.output_height, geometry.output_width);
    let [k_h, k_w] = args.kernel_size;
    let x = dense_f32(kernel, args.input)?;
    let w = dense_f32(kernel, args.weight)?;
    let bias = bias_or_zeros(kernel, args.bias, weight.n)?;

    let mut out = vec![0.0f32; input.n * weight.n * out_h * out_w];
    for n_idx in 0..input.n {
        for oc in 0..weight.n {
            let out_base = (n_idx * weight.n + oc) * out_h * out_w;
            let plane = &mut out[out_base..out_base + out_h * out_w];
            plane.fill(bias[oc]);
            for ic in 0..input.c {
                let in_base = (n_idx * input.c + ic) * input.plane();
                let w_base = (oc * input.c + ic) * k_h * k_w;
                for ki in 0..k_h {
                    for kj in 0..k_w {
                        let wv = w[w_base + ki * k_w + kj];
                        accumulate_tap(
                            plane,
                            &x[in_base..in_base + input.plane()],
                            wv,
                            &input,
                            &geometry,
                            [ki, kj],
                        );
                    }
                }
            }
        }
    }
    Tensor::from_vec(Shape::new([input.n, weight.n, out_h, out_w]), out)
}

/// Depthwise convolution: channel `c` of the output reads only channel `c` of the input through
/// its own `[1, kh, kw]` filter.
pub(crate) fn depthwise_conv2d_direct(
    kernel: &'static str,
    args: &Conv2dArgs<'_>,
) -> ConvResult<Tensor> {
    let input = Nchw::of(kernel, "input", args.input)?;
    let weight = Nchw::of(kernel, "weight", args.weight)?;
    if weight.n != input.c || weight.c != 1 {
        return Err(ConvError::kernel(
            kernel,
            format!(
                "expects weight [{}, 1, kh, kw] for input {:?}, got {:?}",
                input.c,
                args.input.sizes(),
                args.weight.sizes()
            ),
        ));
    }
    let geometry = ColumnGeometry::for_conv(
        input.c,
        input.h,
        input.w,
        args.kernel_size,
        args.padding,
        args.stride,
        [1, 1],
    )?;
    let (out_h, out_w) = (geometry.output_height, geometry.output_width);
    let [k_h, k_w] = args.kernel_size;
    let x = dense_f32(kernel, args.input)?;
    let w = dense_f32(kernel, args.weight)?;
    let bias = bias_or_zeros(kernel, args.bias, input.c)?;

    let mut out = vec![0.0f32; input.n * input.c * out_h * out_w];
    for n_idx in 0..input.n {
        for c in 0..input.c {
            let in_base = (n_idx * input.c + c) * input.plane();
            let out_base = (n_idx * input.c + c) * out_h * out_w;
            let plane = &mut out[out_base..out_base + out_h * out_w];
            plane.fill(bias[c]);
            for ki in 0..k_h {
                for kj in 0..k_w {
                    let wv = w[(c * k_h + ki) * k_w + kj];
                    accumulate_tap(
                        plane,
                        &x[in_base..in_base + input.plane()],
                        wv,
                        &input,
                        &geometry,
                        [ki, kj],
                    );
                }
            }
        }
    }
    Tensor::from_vec(Shape::new([input.n, input.c, out_h, out_w]), out)
}

/// Adds `wv * x[ih, iw]` to every output position whose window covers tap `(ki, kj)` in bounds.
#[inline]
fn accumulate_tap(
    plane: &mut [f32],
    channel: &[f32],
    wv: f32,
    input: &Nchw,
    geometry: &ColumnGeometry,
    [ki, kj]: [usize; 2],
) {
    let out_w = geometry.output_width;
    for oh in 0..geometry.output_height {
        let Some(ih) = (oh * geometry.stride[0] + ki * geometry.dilation[0])
            .checked_sub(geometry.padding[0])
            .filter(|&ih| ih < input.h)
        else {
            continue;
        };
        let row = &channel[ih * input.w..(ih + 1) * input.w];
        let dst = &mut plane[oh * out_w..(oh + 1) * out_w];
        for (ow, slot) in dst.iter_mut().enumerate() {
            let Some(iw) = (ow * geometry.stride[1] + kj * geometry.dilation[1])
                .checked_sub(geometry.padding[1])
                .filter(|&iw| iw < input.w)
            else {
                continue;
            };
            *slot += wv * row[iw];
        }
    }
}

fn check_forward_weight(
    kernel: &'static str,
    args: &Conv2dArgs<'_>,
    input: &Nchw,
    weight: &Nchw,
) -> ConvResult<()> {
    if weight.c != input.c || [weight.h, weight.w] != args.kernel_size {
        return Err(ConvError::kernel(
            kernel,
            format!(
                "weight {:?} does not match input {:?} with kernel {:?}",
                args.weight.sizes(),
                args.input.sizes(),
                args.kernel_size
            ),
        ));
    }
    Ok(())
}
