//! Seeded operands and a direct-loop reference convolution used to check kernel sets.

use anyhow::{bail, ensure, Context, Result};
use conv_rs::tensor::{Shape, Tensor};
use conv_rs::ConvOptions;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Absolute tolerance, scaled by the magnitude of the expected value.
pub const TOLERANCE: f32 = 1e-4;

pub fn seeded_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

pub fn random_tensor(dims: &[usize], rng: &mut StdRng) -> Tensor {
    Tensor::randn(Shape::new(dims.to_vec()), 1.0, rng)
}

/// Small-magnitude int8 values so accumulations stay exact in `f32`.
pub fn random_i8(dims: &[usize], rng: &mut StdRng) -> Result<Tensor> {
    let shape = Shape::new(dims.to_vec());
    let values = (0..shape.num_elements())
        .map(|_| rng.gen_range(-8i8..=8))
        .collect();
    Ok(Tensor::from_i8(shape, values)?)
}

pub fn positive_scales(len: usize, rng: &mut StdRng) -> Result<Tensor> {
    let values = (0..len).map(|_| rng.gen_range(0.25f32..4.0)).collect();
    Ok(Tensor::from_vec(Shape::new([len]), values)?)
}

/// Widens an `I8` tensor to `F32`, keeping its shape.
pub fn int8_as_f32(tensor: &Tensor) -> Result<Tensor> {
    let values = tensor.to_vec_i8()?.into_iter().map(f32::from).collect();
    Ok(Tensor::from_vec(tensor.shape().clone(), values)?)
}

pub fn assert_close(actual: &Tensor, expected: &Tensor, tolerance: f32) {
    assert_eq!(actual.sizes(), expected.sizes(), "output shape");
    let actual = actual.to_vec_f32().expect("actual output is f32");
    let expected = expected.to_vec_f32().expect("expected output is f32");
    for (index, (a, e)) in actual.iter().zip(&expected).enumerate() {
        let bound = tolerance * (1.0 + e.abs());
        assert!(
            (a - e).abs() <= bound,
            "element {index}: got {a}, expected {e} (tolerance {bound})"
        );
    }
}

/// Height/width geometry of a reference convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceGeometry {
    pub stride: [usize; 2],
    pub padding: [usize; 2],
    pub dilation: [usize; 2],
    pub output_padding: [usize; 2],
    pub groups: usize,
}

impl Default for ReferenceGeometry {
    fn default() -> Self {
        Self {
            stride: [1, 1],
            padding: [0, 0],
            dilation: [1, 1],
            output_padding: [0, 0],
            groups: 1,
        }
    }
}

impl ReferenceGeometry {
    pub fn stride(mut self, stride: [usize; 2]) -> Self {
        self.stride = stride;
        self
    }

    pub fn padding(mut self, padding: [usize; 2]) -> Self {
        self.padding = padding;
        self
    }

    pub fn dilation(mut self, dilation: [usize; 2]) -> Self {
        self.dilation = dilation;
        self
    }

    pub fn output_padding(mut self, output_padding: [usize; 2]) -> Self {
        self.output_padding = output_padding;
        self
    }

    pub fn groups(mut self, groups: usize) -> Self {
        self.groups = groups;
        self
    }

    /// Planner options describing the same convolution.
    pub fn options(&self, transposed: bool) -> ConvOptions {
        let signed = |pair: [usize; 2]| pair.map(|v| v as i64);
        ConvOptions::new()
            .stride(signed(self.stride))
            .padding(signed(self.padding))
            .dilation(signed(self.dilation))
            .output_padding(signed(self.output_padding))
            .transposed(transposed)
            .groups(self.groups as i64)
    }
}

struct Operand {
    values: Vec<f32>,
    dims: [usize; 4],
}

fn nchw(tensor: &Tensor, what: &str) -> Result<Operand> {
    let &[n, c, h, w] = tensor.sizes() else {
        bail!("reference expects a rank-4 {what}, got {:?}", tensor.sizes());
    };
    let values = tensor
        .to_vec_f32()
        .with_context(|| format!("reading {what}"))?;
    Ok(Operand {
        values,
        dims: [n, c, h, w],
    })
}

fn bias_values(bias: Option<&Tensor>, channels: usize) -> Result<Vec<f32>> {
    match bias {
        Some(bias) => {
            let values = bias.to_vec_f32().context("reading bias")?;
            ensure!(values.len() == channels, "bias holds {} values", values.len());
            Ok(values)
        }
        None => Ok(vec![0.0; channels]),
    }
}

/// Direct-loop forward convolution. `weight` is `[O, C / groups, kh, kw]`.
pub fn reference_conv2d(
    input: &Tensor,
    weight: &Tensor,
    bias: Option<&Tensor>,
    geometry: &ReferenceGeometry,
) -> Result<Tensor> {
    let x = nchw(input, "input")?;
    let w = nchw(weight, "weight")?;
    let [n, c, h, width] = x.dims;
    let [o, c_per_group, kh, kw] = w.dims;
    let groups = geometry.groups;
    ensure!(
        groups > 0 && c == c_per_group * groups && o % groups == 0,
        "weight {:?} does not fit input {:?} with {groups} groups",
        weight.sizes(),
        input.sizes()
    );
    let o_per_group = o / groups;
    let [sh, sw] = geometry.stride;
    let [ph, pw] = geometry.padding;
    let [dh, dw] = geometry.dilation;
    let window_h = dh * (kh - 1) + 1;
    let window_w = dw * (kw - 1) + 1;
    ensure!(
        h + 2 * ph >= window_h && width + 2 * pw >= window_w,
        "kernel does not fit the padded input"
    );
    let out_h = (h + 2 * ph - window_h) / sh + 1;
    let out_w = (width + 2 * pw - window_w) / sw + 1;
    let bias = bias_values(bias, o)?;

    let mut out = Vec::with_capacity(n * o * out_h * out_w);
    for ni in 0..n {
        for oc in 0..o {
            let group = oc / o_per_group;
            for oy in 0..out_h {
                for ox in 0..out_w {
                    let mut acc = bias[oc];
                    for icl in 0..c_per_group {
                        let ic = group * c_per_group + icl;
                        for ki in 0..kh {
                            let Some(iy) = (oy * sh + ki * dh).checked_sub(ph).filter(|&v| v < h)
                            else {
                                continue;
                            };
                            for kj in 0..kw {
                                let Some(ix) = (ox * sw + kj * dw)
                                    .checked_sub(pw)
                                    .filter(|&v| v < width)
                                else {
                                    continue;
                                };
                                let xv = x.values[((ni * c + ic) * h + iy) * width + ix];
                                let wv = w.values[((oc * c_per_group + icl) * kh + ki) * kw + kj];
                                acc += xv * wv;
                            }
                        }
                    }
                    out.push(acc);
                }
            }
        }
    }
    Ok(Tensor::from_vec(Shape::new([n, o, out_h, out_w]), out)?)
}

/// Direct-loop transposed convolution. `weight` is `[C_in, O / groups, kh, kw]`.
pub fn reference_conv_transpose2d(
    input: &Tensor,
    weight: &Tensor,
    bias: Option<&Tensor>,
    geometry: &ReferenceGeometry,
) -> Result<Tensor> {
    let x = nchw(input, "input")?;
    let w = nchw(weight, "weight")?;
    let [n, c, h, width] = x.dims;
    let [c_in, o_per_group, kh, kw] = w.dims;
    let groups = geometry.groups;
    ensure!(
        groups > 0 && c == c_in && c % groups == 0,
        "transposed weight {:?} does not fit input {:?} with {groups} groups",
        weight.sizes(),
        input.sizes()
    );
    let c_per_group = c / groups;
    let o = o_per_group * groups;
    let [sh, sw] = geometry.stride;
    let [ph, pw] = geometry.padding;
    let [dh, dw] = geometry.dilation;
    let [oph, opw] = geometry.output_padding;
    let grown_h = (h - 1) * sh + dh * (kh - 1) + oph + 1;
    let grown_w = (width - 1) * sw + dw * (kw - 1) + opw + 1;
    ensure!(
        grown_h > 2 * ph && grown_w > 2 * pw,
        "padding removes the output"
    );
    let out_h = grown_h - 2 * ph;
    let out_w = grown_w - 2 * pw;
    let bias = bias_values(bias, o)?;

    let plane = out_h * out_w;
    let mut out = vec![0.0f32; n * o * plane];
    for (index, value) in out.iter_mut().enumerate() {
        *value = bias[(index / plane) % o];
    }
    for ni in 0..n {
        for ic in 0..c {
            let group = ic / c_per_group;
            for iy in 0..h {
                for ix in 0..width {
                    let xv = x.values[((ni * c + ic) * h + iy) * width + ix];
                    for ocl in 0..o_per_group {
                        let oc = group * o_per_group + ocl;
                        for ki in 0..kh {
                            let Some(oy) = (iy * sh + ki * dh)
                                .checked_sub(ph)
                                .filter(|&v| v < out_h)
                            else {
                                continue;
                            };
                            for kj in 0..kw {
                                let Some(ox) = (ix * sw + kj * dw)
                                    .checked_sub(pw)
                                    .filter(|&v| v < out_w)
                                else {
                                    continue;
                                };
                                let wv = w.values[((ic * o_per_group + ocl) * kh + ki) * kw + kj];
                                out[((ni * o + oc) * out_h + oy) * out_w + ox] += xv * wv;
                            }
                        }
                    }
                }
            }
        }
    }
    Ok(Tensor::from_vec(Shape::new([n, o, out_h, out_w]), out)?)
}
