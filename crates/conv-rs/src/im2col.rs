//! Column expansion (`im2col`) and its adjoint (`col2im`) for single images in CHW layout.
//!
//! Column row `c * kh * kw + i * kw + j` holds kernel tap `(i, j)` of channel `c`; column
//! `oh * out_w + ow` holds output position `(oh, ow)`.

use crate::error::{ConvError, ConvResult};
use crate::tensor::StorageElement;

/// Image and window geometry shared by both directions of the transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnGeometry {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    pub output_height: usize,
    pub output_width: usize,
    pub kernel: [usize; 2],
    pub padding: [usize; 2],
    pub stride: [usize; 2],
    pub dilation: [usize; 2],
}

impl ColumnGeometry {
    /// Derives output extents with the standard convolution formula.
    pub fn for_conv(
        channels: usize,
        height: usize,
        width: usize,
        kernel: [usize; 2],
        padding: [usize; 2],
        stride: [usize; 2],
        dilation: [usize; 2],
    ) -> ConvResult<Self> {
        let output_height = output_extent(height, kernel[0], padding[0], stride[0], dilation[0])?;
        let output_width = output_extent(width, kernel[1], padding[1], stride[1], dilation[1])?;
        Ok(ColumnGeometry {
            channels,
            height,
            width,
            output_height,
            output_width,
            kernel,
            padding,
            stride,
            dilation,
        })
    }

    /// Rows of the column matrix: `channels * kh * kw`.
    pub fn column_rows(&self) -> usize {
        self.channels * self.kernel[0] * self.kernel[1]
    }

    /// Columns of the column matrix: `output_height * output_width`.
    pub fn column_cols(&self) -> usize {
        self.output_height * self.output_width
    }

    pub fn column_len(&self) -> usize {
        self.column_rows() * self.column_cols()
    }

    pub fn image_len(&self) -> usize {
        self.channels * self.height * self.width
    }

    /// Image coordinate read by tap `offset` at output position `out`, or `None` when the
    /// tap falls into the implicit zero padding.
    #[inline]
    fn source(&self, axis: usize, out: usize, offset: usize) -> Option<usize> {
        let extent = if axis == 0 { self.height } else { self.width };
        let pos = (out * self.stride[axis] + offset * self.dilation[axis])
            .checked_sub(self.padding[axis])?;
        (pos < extent).then_some(pos)
    }
}

fn output_extent(
    extent: usize,
    kernel: usize,
    padding: usize,
    stride: usize,
    dilation: usize,
) -> ConvResult<usize> {
    if stride == 0 || kernel == 0 || dilation == 0 {
        return Err(ConvError::invalid_parameter(format!(
            "column geometry needs positive stride ({stride}), kernel ({kernel}) and dilation \
             ({dilation})"
        )));
    }
    let padded = extent + 2 * padding;
    let window = dilation * (kernel - 1) + 1;
    if padded < window {
        return Err(ConvError::KernelTooLarge {
            padded: padded.to_string(),
            effective: window.to_string(),
        });
    }
    Ok((padded - window) / stride + 1)
}

/// Expands `image` (`channels x height x width`) into `columns`.
pub fn im2col<T: StorageElement>(
    image: &[T],
    geometry: &ColumnGeometry,
    columns: &mut [T],
) -> ConvResult<()> {
    check_buffers(geometry, image.len(), columns.len())?;
    let [kh, kw] = geometry.kernel;
    let (out_h, out_w) = (geometry.output_height, geometry.output_width);
    let plane = geometry.height * geometry.width;

    for c_col in 0..geometry.column_rows() {
        let w_offset = c_col % kw;
        let h_offset = (c_col / kw) % kh;
        let c_im = c_col / kh / kw;
        let channel = &image[c_im * plane..(c_im + 1) * plane];
        let row = &mut columns[c_col * out_h * out_w..(c_col + 1) * out_h * out_w];
        for h_col in 0..out_h {
            let h_im = geometry.source(0, h_col, h_offset);
            let dst = &mut row[h_col * out_w..(h_col + 1) * out_w];
            for (w_col, slot) in dst.iter_mut().enumerate() {
                *slot = match (h_im, geometry.source(1, w_col, w_offset)) {
                    (Some(h), Some(w)) => channel[h * geometry.width + w],
                    _ => T::zero(),
                };
            }
        }
    }
    Ok(())
}

/// Adjoint of [`im2col`]: zeroes `image`, then accumulates every in-bounds column entry back
/// onto the pixel it was read from.
pub fn col2im<T: StorageElement>(
    columns: &[T],
    geometry: &ColumnGeometry,
    image: &mut [T],
) -> ConvResult<()> {
    check_buffers(geometry, image.len(), columns.len())?;
    image.fill(T::zero());
    let [kh, kw] = geometry.kernel;
    let (out_h, out_w) = (geometry.output_height, geometry.output_width);
    let plane = geometry.height * geometry.width;

    for c_col in 0..geometry.column_rows() {
        let w_offset = c_col % kw;
        let h_offset = (c_col / kw) % kh;
        let c_im = c_col / kh / kw;
        let row = &columns[c_col * out_h * out_w..(c_col + 1) * out_h * out_w];
        for h_col in 0..out_h {
            let Some(h_im) = geometry.source(0, h_col, h_offset) else {
                continue;
            };
            for w_col in 0..out_w {
                if let Some(w_im) = geometry.source(1, w_col, w_offset) {
                    let pixel = &mut image[c_im * plane + h_im * geometry.width + w_im];
                    *pixel = *pixel + row[h_col * out_w + w_col];
                }
            }
        }
    }
    Ok(())
}

fn check_buffers(geometry: &ColumnGeometry, image_len: usize, column_len: usize) -> ConvResult<()> {
    if image_len != geometry.image_len() {
        return Err(ConvError::shape_mismatch(format!(
            "image buffer holds {image_len} elements, geometry {}x{}x{} needs {}",
            geometry.channels,
            geometry.height,
            geometry.width,
            geometry.image_len()
        )));
    }
    if column_len != geometry.column_len() {
        return Err(ConvError::shape_mismatch(format!(
            "column buffer holds {column_len} elements, geometry needs {}x{}",
            geometry.column_rows(),
            geometry.column_cols()
        )));
    }
    Ok(())
}
