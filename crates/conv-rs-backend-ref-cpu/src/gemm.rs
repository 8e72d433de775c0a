/// Row-major `[m, k] x [k, n]` product using an `i-k-j` loop order.
pub fn matmul_f32(lhs: &[f32], rhs: &[f32], m: usize, k: usize, n: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; m * n];
    for (row, out_row) in out.chunks_exact_mut(n.max(1)).take(m).enumerate() {
        let lhs_row = &lhs[row * k..(row + 1) * k];
        for (p, &a) in lhs_row.iter().enumerate() {
            if a == 0.0 {
                continue;
            }
            let rhs_row = &rhs[p * n..(p + 1) * n];
            for (dst, &b) in out_row.iter_mut().zip(rhs_row) {
                *dst += a * b;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn small_product() {
        // [[1, 2, 3], [4, 5, 6]] x [[7, 8], [9, 10], [11, 12]]
        let out = matmul_f32(
            &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
            &[7.0, 8.0, 9.0, 10.0, 11.0, 12.0],
            2,
            3,
            2,
        );
        assert_eq!(out, vec![58.0, 64.0, 139.0, 154.0]);
    }

    #[test]
    fn empty_inner_dimension_yields_zeros() {
        assert_eq!(matmul_f32(&[], &[], 2, 0, 3), vec![0.0; 6]);
    }

    #[test]
    fn matches_dot_products() {
        let mut rng = StdRng::seed_from_u64(3);
        let (m, k, n) = (5, 7, 4);
        let lhs: Vec<f32> = (0..m * k).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let rhs: Vec<f32> = (0..k * n).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let out = matmul_f32(&lhs, &rhs, m, k, n);
        for i in 0..m {
            for j in 0..n {
                let dot: f32 = (0..k).map(|p| lhs[i * k + p] * rhs[p * n + j]).sum();
                assert!((out[i * n + j] - dot).abs() < 1e-5);
            }
        }
    }
}
