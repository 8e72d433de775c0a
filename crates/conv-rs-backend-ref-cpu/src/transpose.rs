//! Transposed convolution as matmul followed by `col2im`.

use conv_rs::error::{ConvError, ConvResult};
use conv_rs::im2col::{col2im, ColumnGeometry};
use conv_rs::kernels::Conv2dArgs;
use conv_rs::params::conv_transpose_output_size;
use conv_rs::tensor::{Shape, Tensor};

use crate::cpu::{bias_or_zeros, dense_f32, CpuKernelInterceptor, GenericCpuKernels, Nchw};

impl<I: CpuKernelInterceptor> GenericCpuKernels<I> {
    /// `weight` is `[C_in, C_out, kh, kw]`. Each input image is multiplied by the transposed
    /// weight into a `[C_out*kh*kw, H*W]` column matrix, which `col2im` scatters onto the
    /// enlarged output plane.
    pub(crate) fn col2im_conv_transpose2d(
        &self,
        kernel: &'static str,
        args: &Conv2dArgs<'_>,
        output_padding: [usize; 2],
        dilation: [usize; 2],
    ) -> ConvResult<Tensor> {
        let input = Nchw::of(kernel, "input", args.input)?;
        let weight = Nchw::of(kernel, "weight", args.weight)?;
        if weight.n != input.c || [weight.h, weight.w] != args.kernel_size {
            return Err(ConvError::kernel(
                kernel,
                format!(
                    "transposed weight {:?} does not match input {:?} with kernel {:?}",
                    args.weight.sizes(),
                    args.input.sizes(),
                    args.kernel_size
                ),
            ));
        }
        let out_channels = weight.c;
        let out_dims = conv_transpose_output_size(
            args.input.sizes(),
            args.weight.sizes(),
            1,
            &args.stride,
            &args.padding,
            &dilation,
            &output_padding,
        )?;
        let (out_h, out_w) = (out_dims[2], out_dims[3]);
        let geometry = ColumnGeometry {
            channels: out_channels,
            height: out_h,
            width: out_w,
            output_height: input.h,
            output_width: input.w,
            kernel: args.kernel_size,
            padding: args.padding,
            stride: args.stride,
            dilation,
        };
        let rows = geometry.column_rows();

        // [C_in, C_out*kh*kw] -> [C_out*kh*kw, C_in]
        let w = dense_f32(kernel, args.weight)?;
        let mut w_t = vec![0.0f32; w.len()];
        for ci in 0..input.c {
            for r in 0..rows {
                w_t[r * input.c + ci] = w[ci * rows + r];
            }
        }
        let bias = bias_or_zeros(kernel, args.bias, out_channels)?;
        let x = dense_f32(kernel, args.input)?;

        let image_len = geometry.image_len();
        let mut out = vec![0.0f32; input.n * image_len];
        for (n_idx, image) in out.chunks_exact_mut(image_len.max(1)).take(input.n).enumerate() {
            let x_img = &x[n_idx * input.image()..(n_idx + 1) * input.image()];
            let columns = self.matmul(&w_t, x_img, rows, input.c, input.plane())?;
            col2im(&columns, &geometry, image)?;
            for (channel, plane) in image.chunks_exact_mut((out_h * out_w).max(1)).enumerate() {
                let b = bias[channel];
                plane.iter_mut().for_each(|v| *v += b);
            }
        }
        Tensor::from_vec(Shape::new([input.n, out_channels, out_h, out_w]), out)
    }
}
