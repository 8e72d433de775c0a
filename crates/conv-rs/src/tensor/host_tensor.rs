//! Host-backed strided tensor consumed and produced by the planner.

use super::{
    dtype::{DType, Device},
    shape::Shape,
};
use crate::error::{ConvError, ConvResult};
use rand::Rng;
use std::sync::Arc;

/// Shared, immutable element storage.
#[derive(Debug, Clone)]
pub enum TensorData {
    F32(Arc<[f32]>),
    I8(Arc<[i8]>),
}

impl TensorData {
    fn dtype(&self) -> DType {
        match self {
            TensorData::F32(_) => DType::F32,
            TensorData::I8(_) => DType::I8,
        }
    }

    fn storage_len(&self) -> usize {
        match self {
            TensorData::F32(values) => values.len(),
            TensorData::I8(values) => values.len(),
        }
    }

    fn ptr_eq(&self, other: &TensorData) -> bool {
        match (self, other) {
            (TensorData::F32(a), TensorData::F32(b)) => Arc::ptr_eq(a, b),
            (TensorData::I8(a), TensorData::I8(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Strided view over shared storage.
///
/// Views produced by [`Tensor::narrow`], [`Tensor::unsqueeze`] and [`Tensor::squeeze`] alias the
/// source storage; nothing ever writes through an alias, so cloning a tensor is cheap and safe.
#[derive(Debug, Clone)]
pub struct Tensor {
    shape: Shape,
    strides: Vec<usize>,
    offset: usize,
    device: Device,
    data: TensorData,
}

impl Tensor {
    /// Constructs an `F32` tensor from raw values, validating the length against the shape.
    pub fn from_vec(shape: Shape, data: Vec<f32>) -> ConvResult<Self> {
        check_len(&shape, data.len())?;
        Ok(Self::from_data(shape, TensorData::F32(data.into())))
    }

    /// Constructs a quantized `I8` tensor, validating the length against the shape.
    pub fn from_i8(shape: Shape, data: Vec<i8>) -> ConvResult<Self> {
        check_len(&shape, data.len())?;
        Ok(Self::from_data(shape, TensorData::I8(data.into())))
    }

    /// Returns a zero-initialized `F32` tensor of the requested shape.
    pub fn zeros(shape: Shape) -> Self {
        Self::full(shape, 0.0)
    }

    /// Returns an `F32` tensor with every element set to `value`.
    pub fn full(shape: Shape, value: f32) -> Self {
        let len = shape.num_elements();
        Self::from_data(shape, TensorData::F32(vec![value; len].into()))
    }

    /// Samples from a normal distribution (`N(0, std^2)`) using the Box-Muller transform.
    pub fn randn(shape: Shape, std: f32, rng: &mut impl Rng) -> Self {
        let len = shape.num_elements();
        let mut values = Vec::with_capacity(len);
        while values.len() < len {
            let u1: f32 = rng.gen::<f32>().max(f32::MIN_POSITIVE);
            let u2: f32 = rng.gen::<f32>();
            let r = (-2.0 * u1.ln()).sqrt();
            let theta = 2.0 * std::f32::consts::PI * u2;
            values.push(r * theta.cos() * std);
            if values.len() < len {
                values.push(r * theta.sin() * std);
            }
        }
        Self::from_data(shape, TensorData::F32(values.into()))
    }

    /// Builds a view over existing storage. Fails if the view would read past the end.
    pub(crate) fn from_storage(
        shape: Shape,
        strides: Vec<usize>,
        offset: usize,
        data: TensorData,
    ) -> ConvResult<Self> {
        if strides.len() != shape.rank() {
            return Err(ConvError::shape_mismatch(format!(
                "stride rank {} does not match shape {}",
                strides.len(),
                shape
            )));
        }
        let last = shape
            .dims()
            .iter()
            .zip(&strides)
            .map(|(&dim, &stride)| dim.saturating_sub(1) * stride)
            .sum::<usize>();
        if shape.num_elements() > 0 && offset + last >= data.storage_len() {
            return Err(ConvError::shape_mismatch(format!(
                "view {} at offset {} exceeds storage of {} elements",
                shape,
                offset,
                data.storage_len()
            )));
        }
        Ok(Tensor {
            shape,
            strides,
            offset,
            device: Device::Cpu,
            data,
        })
    }

    fn from_data(shape: Shape, data: TensorData) -> Self {
        let strides = shape.contiguous_strides();
        Tensor {
            shape,
            strides,
            offset: 0,
            device: Device::Cpu,
            data,
        }
    }

    /// Tags the tensor with a device. The payload itself stays on the host.
    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    /// Returns the total number of elements addressed by the tensor.
    pub fn len(&self) -> usize {
        self.shape.num_elements()
    }

    /// Reports whether the tensor contains zero elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn sizes(&self) -> &[usize] {
        self.shape.dims()
    }

    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    /// Extent of axis `dim`.
    ///
    /// Panics if `dim` is out of range, like slice indexing.
    pub fn size(&self, dim: usize) -> usize {
        self.shape.dims()[dim]
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Whether both tensors view the same allocation.
    pub fn shares_storage(&self, other: &Tensor) -> bool {
        self.data.ptr_eq(&other.data)
    }

    /// Row-major dense layout check. Unit axes may carry any stride.
    pub fn is_contiguous(&self) -> bool {
        let expected = self.shape.contiguous_strides();
        self.shape
            .dims()
            .iter()
            .zip(self.strides.iter().zip(&expected))
            .all(|(&dim, (&actual, &want))| dim == 1 || actual == want)
    }

    /// Returns a dense row-major tensor, sharing storage when already contiguous.
    pub fn contiguous(&self) -> Tensor {
        if self.is_contiguous() {
            return self.clone();
        }
        let data = match &self.data {
            TensorData::F32(values) => TensorData::F32(self.gather(values).into()),
            TensorData::I8(values) => TensorData::I8(self.gather(values).into()),
        };
        Self::from_data(self.shape.clone(), data).with_device(self.device.clone())
    }

    /// View of `len` entries of axis `dim` starting at `start`.
    pub fn narrow(&self, dim: usize, start: usize, len: usize) -> ConvResult<Tensor> {
        self.check_axis(dim, "narrow")?;
        let extent = self.size(dim);
        if start.checked_add(len).is_none_or(|end| end > extent) {
            return Err(ConvError::shape_mismatch(format!(
                "narrow({dim}, {start}, {len}) exceeds extent {extent} of shape {}",
                self.shape
            )));
        }
        Ok(Tensor {
            shape: self.shape.with_dim(dim, len),
            strides: self.strides.clone(),
            offset: self.offset + start * self.strides[dim],
            device: self.device.clone(),
            data: self.data.clone(),
        })
    }

    /// Inserts a unit axis at position `dim` (which may equal the rank).
    pub fn unsqueeze(&self, dim: usize) -> ConvResult<Tensor> {
        if dim > self.rank() {
            return Err(ConvError::shape_mismatch(format!(
                "unsqueeze axis {dim} out of range for rank {}",
                self.rank()
            )));
        }
        let stride = if dim < self.rank() {
            self.strides[dim] * self.size(dim)
        } else {
            1
        };
        let mut dims = self.sizes().to_vec();
        let mut strides = self.strides.clone();
        dims.insert(dim, 1);
        strides.insert(dim, stride);
        Ok(Tensor {
            shape: Shape::new(dims),
            strides,
            offset: self.offset,
            device: self.device.clone(),
            data: self.data.clone(),
        })
    }

    /// Removes axis `dim`, which must have extent 1.
    pub fn squeeze(&self, dim: usize) -> ConvResult<Tensor> {
        self.check_axis(dim, "squeeze")?;
        if self.size(dim) != 1 {
            return Err(ConvError::shape_mismatch(format!(
                "cannot squeeze axis {dim} of extent {} in shape {}",
                self.size(dim),
                self.shape
            )));
        }
        if self.rank() == 1 {
            return Err(ConvError::shape_mismatch(
                "cannot squeeze the only axis of a tensor",
            ));
        }
        let mut dims = self.sizes().to_vec();
        let mut strides = self.strides.clone();
        dims.remove(dim);
        strides.remove(dim);
        Ok(Tensor {
            shape: Shape::new(dims),
            strides,
            offset: self.offset,
            device: self.device.clone(),
            data: self.data.clone(),
        })
    }

    /// Concatenates tensors along `dim`, preserving input order.
    pub fn cat(tensors: &[Tensor], dim: usize) -> ConvResult<Tensor> {
        let first = tensors
            .first()
            .ok_or_else(|| ConvError::shape_mismatch("cat expects at least one tensor"))?;
        first.check_axis(dim, "cat")?;
        let mut axis_total = 0usize;
        for tensor in tensors {
            if tensor.dtype() != first.dtype() {
                return Err(ConvError::shape_mismatch(format!(
                    "cat dtype mismatch: {} vs {}",
                    first.dtype(),
                    tensor.dtype()
                )));
            }
            let same_outer = tensor.rank() == first.rank()
                && tensor
                    .sizes()
                    .iter()
                    .zip(first.sizes())
                    .enumerate()
                    .all(|(axis, (a, b))| axis == dim || a == b);
            if !same_outer {
                return Err(ConvError::shape_mismatch(format!(
                    "cat shape mismatch along axis {dim}: {} vs {}",
                    first.shape, tensor.shape
                )));
            }
            axis_total += tensor.size(dim);
        }

        let outer: usize = first.sizes()[..dim].iter().product();
        let inner: usize = first.sizes()[dim + 1..].iter().product();
        let shape = first.shape.with_dim(dim, axis_total);
        let parts: Vec<Tensor> = tensors.iter().map(Tensor::contiguous).collect();

        let data = match first.dtype() {
            DType::F32 => {
                let slices = parts
                    .iter()
                    .map(|part| Ok((part.as_f32_slice()?, part.size(dim) * inner)))
                    .collect::<ConvResult<Vec<_>>>()?;
                TensorData::F32(concat_chunks(&slices, outer).into())
            }
            DType::I8 => {
                let slices = parts
                    .iter()
                    .map(|part| Ok((part.as_i8_slice()?, part.size(dim) * inner)))
                    .collect::<ConvResult<Vec<_>>>()?;
                TensorData::I8(concat_chunks(&slices, outer).into())
            }
        };
        Ok(Self::from_data(shape, data).with_device(first.device.clone()))
    }

    /// Dense `F32` payload of a contiguous tensor.
    pub fn as_f32_slice(&self) -> ConvResult<&[f32]> {
        match &self.data {
            TensorData::F32(values) => self.dense_window(values),
            TensorData::I8(_) => Err(dtype_error(DType::F32, self.dtype())),
        }
    }

    /// Dense `I8` payload of a contiguous tensor.
    pub fn as_i8_slice(&self) -> ConvResult<&[i8]> {
        match &self.data {
            TensorData::I8(values) => self.dense_window(values),
            TensorData::F32(_) => Err(dtype_error(DType::I8, self.dtype())),
        }
    }

    /// Copies the `F32` elements out in row-major order, whatever the layout.
    pub fn to_vec_f32(&self) -> ConvResult<Vec<f32>> {
        match &self.data {
            TensorData::F32(values) => Ok(self.gather(values)),
            TensorData::I8(_) => Err(dtype_error(DType::F32, self.dtype())),
        }
    }

    /// Copies the `I8` elements out in row-major order, whatever the layout.
    pub fn to_vec_i8(&self) -> ConvResult<Vec<i8>> {
        match &self.data {
            TensorData::I8(values) => Ok(self.gather(values)),
            TensorData::F32(_) => Err(dtype_error(DType::I8, self.dtype())),
        }
    }

    /// Divides every element by `divisor` in place.
    ///
    /// Only this tensor observes the change: the result is written to fresh dense storage, so
    /// other views of the previous storage keep their values.
    pub fn div_scalar_(&mut self, divisor: f32) -> ConvResult<()> {
        let mut values = self.to_vec_f32()?;
        for value in &mut values {
            *value /= divisor;
        }
        self.strides = self.shape.contiguous_strides();
        self.offset = 0;
        self.data = TensorData::F32(values.into());
        Ok(())
    }

    fn check_axis(&self, dim: usize, op: &str) -> ConvResult<()> {
        if dim >= self.rank() {
            return Err(ConvError::shape_mismatch(format!(
                "{op} axis {dim} out of range for shape {}",
                self.shape
            )));
        }
        Ok(())
    }

    fn dense_window<'a, T>(&self, values: &'a [T]) -> ConvResult<&'a [T]> {
        if !self.is_contiguous() {
            return Err(ConvError::shape_mismatch(format!(
                "tensor of shape {} with strides {:?} is not contiguous",
                self.shape, self.strides
            )));
        }
        Ok(&values[self.offset..self.offset + self.len()])
    }

    fn gather<T: Copy>(&self, values: &[T]) -> Vec<T> {
        let len = self.len();
        if self.is_contiguous() {
            return values[self.offset..self.offset + len].to_vec();
        }
        let dims = self.sizes();
        let mut out = Vec::with_capacity(len);
        let mut index = vec![0usize; dims.len()];
        for _ in 0..len {
            let position = self.offset
                + index
                    .iter()
                    .zip(&self.strides)
                    .map(|(i, s)| i * s)
                    .sum::<usize>();
            out.push(values[position]);
            for axis in (0..dims.len()).rev() {
                index[axis] += 1;
                if index[axis] < dims[axis] {
                    break;
                }
                index[axis] = 0;
            }
        }
        out
    }
}

fn check_len(shape: &Shape, len: usize) -> ConvResult<()> {
    if len != shape.num_elements() {
        return Err(ConvError::shape_mismatch(format!(
            "tensor data length ({}) does not match shape {}",
            len, shape
        )));
    }
    Ok(())
}

fn dtype_error(expected: DType, actual: DType) -> ConvError {
    ConvError::unsupported(format!("expected {expected} tensor, found {actual}"))
}

/// Interleaves `(slice, chunk)` pairs: for each of `outer` rows, copy one `chunk` from each part.
fn concat_chunks<T: Copy>(parts: &[(&[T], usize)], outer: usize) -> Vec<T> {
    let total: usize = parts.iter().map(|(_, chunk)| chunk * outer).sum();
    let mut out = Vec::with_capacity(total);
    for row in 0..outer {
        for (values, chunk) in parts {
            let start = row * chunk;
            out.extend_from_slice(&values[start..start + chunk]);
        }
    }
    out
}
