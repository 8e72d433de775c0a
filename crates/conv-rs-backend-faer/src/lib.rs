//! Reference convolution kernels with matrix products delegated to faer.

use conv_rs::error::{ConvError, ConvResult};
use conv_rs_backend_ref_cpu::{CpuKernelInterceptor, CpuOp, GenericCpuKernels};
use faer::linalg::matmul::matmul;
use faer::mat::{MatMut, MatRef};
use faer::{Accum, Par};

fn faer_parallelism() -> Par {
    let par = faer::get_global_parallelism();
    if par.degree() == 1 {
        Par::Seq
    } else {
        par
    }
}

#[derive(Debug, Default, Clone)]
pub struct FaerCpuInterceptor;

impl FaerCpuInterceptor {
    pub fn new() -> Self {
        Self
    }
}

impl CpuKernelInterceptor for FaerCpuInterceptor {
    fn try_execute(&self, op: &CpuOp<'_>) -> Option<ConvResult<Vec<f32>>> {
        match *op {
            CpuOp::Matmul { lhs, rhs, m, k, n } => Some(matmul_2d(lhs, rhs, m, k, n)),
        }
    }

    fn kernels_name(&self) -> &'static str {
        "faer"
    }
}

/// Reference kernels whose im2col and transposed-convolution products run through faer.
pub type FaerConvKernels = GenericCpuKernels<FaerCpuInterceptor>;

pub fn faer_conv_kernels() -> FaerConvKernels {
    GenericCpuKernels::with_interceptor(FaerCpuInterceptor::new())
}

fn matmul_2d(lhs: &[f32], rhs: &[f32], m: usize, k: usize, n: usize) -> ConvResult<Vec<f32>> {
    if lhs.len() != m * k || rhs.len() != k * n {
        return Err(ConvError::kernel("faer_matmul", "operand size mismatch"));
    }
    if m == 0 || n == 0 || k == 0 {
        return Ok(vec![0.0f32; m * n]);
    }

    tracing::trace!(m, k, n, "faer matmul");
    let lhs_view = MatRef::from_row_major_slice(lhs, m, k);
    let rhs_view = MatRef::from_row_major_slice(rhs, k, n);

    // Compute C^T = B^T * A^T into a column-major (n x m) buffer, which is C in row-major order.
    let a_t = lhs_view.transpose();
    let b_t = rhs_view.transpose();
    let mut row_major = vec![0.0f32; m * n];
    let mut out_view = MatMut::from_column_major_slice_mut(row_major.as_mut_slice(), n, m);
    matmul(&mut out_view, Accum::Replace, b_t, a_t, 1.0f32, faer_parallelism());
    Ok(row_major)
}

/// Register the faer kernels with the global kernel registry under "faer".
///
/// Called automatically via a static initializer; calling it again is harmless.
pub fn register_faer_kernels() {
    conv_rs::registry::register_kernels("faer", faer_conv_kernels);
}

#[cfg(not(target_family = "wasm"))]
#[used]
#[link_section = ".init_array"]
static REGISTER_FAER_KERNELS: extern "C" fn() = {
    extern "C" fn register() {
        register_faer_kernels();
    }
    register
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_reference_matmul() {
        let lhs: Vec<f32> = (0..12).map(|v| v as f32 * 0.5 - 2.0).collect();
        let rhs: Vec<f32> = (0..20).map(|v| (v % 7) as f32 - 3.0).collect();
        let fast = matmul_2d(&lhs, &rhs, 3, 4, 5).unwrap();
        let reference = conv_rs_backend_ref_cpu::gemm::matmul_f32(&lhs, &rhs, 3, 4, 5);
        for (a, b) in fast.iter().zip(&reference) {
            assert!((a - b).abs() <= 1e-4, "{a} vs {b}");
        }
    }

    #[test]
    fn empty_inner_dimension_yields_zeros() {
        assert_eq!(matmul_2d(&[], &[], 2, 0, 2).unwrap(), vec![0.0; 4]);
    }
}
