//! Kernel-set checks shared by every implementation of [`ConvKernels`].
//!
//! Each check forces a backend through an explicit ISA capability, asserts the planner picked the
//! expected variant, and compares the kernel output with a direct-loop reference.

use anyhow::{ensure, Result};
use conv_rs::execute::{execute_nogroup, NogroupOperands};
use conv_rs::group::convolution_grouped;
use conv_rs::tensor::{Shape, Tensor};
use conv_rs::{
    ConvBackend, ConvErrorKind, ConvKernels, ConvOperands, ConvOptions, ConvParams, ConvPlanner,
    IsaCapability,
};

use crate::fixtures::{
    assert_close, int8_as_f32, positive_scales, random_i8, random_tensor, reference_conv2d,
    reference_conv_transpose2d, seeded_rng, ReferenceGeometry, TOLERANCE,
};

pub type SuiteResult = Result<()>;

#[derive(Debug, Clone, Copy)]
struct Case {
    input: [usize; 4],
    weight: [usize; 4],
    geometry: ReferenceGeometry,
    transposed: bool,
    bias: bool,
}

impl Case {
    fn forward(input: [usize; 4], weight: [usize; 4], geometry: ReferenceGeometry) -> Self {
        Self {
            input,
            weight,
            geometry,
            transposed: false,
            bias: true,
        }
    }

    fn transposed(input: [usize; 4], weight: [usize; 4], geometry: ReferenceGeometry) -> Self {
        Self {
            transposed: true,
            ..Self::forward(input, weight, geometry)
        }
    }

    fn without_bias(mut self) -> Self {
        self.bias = false;
        self
    }

    fn out_channels(&self) -> usize {
        if self.transposed {
            self.weight[1] * self.geometry.groups
        } else {
            self.weight[0]
        }
    }
}

/// Plans with `isa`, checks the chosen backend, then runs and checks the output shape.
fn planned_run(
    kernels: &dyn ConvKernels,
    isa: IsaCapability,
    operands: &ConvOperands<'_>,
    options: &ConvOptions,
    expected: ConvBackend,
) -> Result<Tensor> {
    let planner = ConvPlanner::with_isa(isa);
    let plan = planner.plan(operands, options)?;
    ensure!(
        plan.backend == expected,
        "planned {} instead of {expected}",
        plan.backend
    );
    let output = planner.run(kernels, operands, options)?;
    ensure!(
        output.sizes() == plan.output_sizes.as_slice(),
        "{} produced {:?}, plan promised {:?}",
        kernels.kernels_name(),
        output.sizes(),
        plan.output_sizes
    );
    Ok(output)
}

fn check_case(
    kernels: &dyn ConvKernels,
    isa: IsaCapability,
    case: Case,
    expected: ConvBackend,
    seed: u64,
) -> Result<()> {
    let mut rng = seeded_rng(seed);
    let input = random_tensor(&case.input, &mut rng);
    let weight = random_tensor(&case.weight, &mut rng);
    let bias = case
        .bias
        .then(|| random_tensor(&[case.out_channels()], &mut rng));
    let mut operands = ConvOperands::new(&input, &weight);
    if let Some(bias) = &bias {
        operands = operands.with_bias(bias);
    }
    let actual = planned_run(
        kernels,
        isa,
        &operands,
        &case.geometry.options(case.transposed),
        expected,
    )?;
    let reference = if case.transposed {
        reference_conv_transpose2d(&input, &weight, bias.as_ref(), &case.geometry)?
    } else {
        reference_conv2d(&input, &weight, bias.as_ref(), &case.geometry)?
    };
    assert_close(&actual, &reference, TOLERANCE);
    Ok(())
}

pub fn slow_conv2d_matches_reference(kernels: &dyn ConvKernels) -> SuiteResult {
    let geometry = ReferenceGeometry::default().stride([2, 1]).padding([1, 0]);
    check_case(
        kernels,
        IsaCapability::NONE,
        Case::forward([2, 3, 7, 6], [4, 3, 3, 2], geometry),
        ConvBackend::Slow2d,
        11,
    )?;
    check_case(
        kernels,
        IsaCapability::NONE,
        Case::forward([1, 2, 5, 5], [3, 2, 5, 5], ReferenceGeometry::default()).without_bias(),
        ConvBackend::Slow2d,
        12,
    )
}

pub fn dilated_conv2d_matches_reference(kernels: &dyn ConvKernels) -> SuiteResult {
    let geometry = ReferenceGeometry::default().dilation([2, 1]).padding([2, 1]);
    check_case(
        kernels,
        IsaCapability::NEON,
        Case::forward([1, 3, 9, 9], [4, 3, 3, 3], geometry),
        ConvBackend::SlowDilated2d,
        21,
    )?;
    let grouped = ReferenceGeometry::default()
        .dilation([2, 2])
        .padding([2, 2])
        .groups(2);
    check_case(
        kernels,
        IsaCapability::X86,
        Case::forward([2, 4, 9, 8], [6, 2, 3, 3], grouped),
        ConvBackend::SlowDilated2d,
        22,
    )
}

pub fn transposed_conv2d_matches_reference(kernels: &dyn ConvKernels) -> SuiteResult {
    let geometry = ReferenceGeometry::default()
        .stride([2, 2])
        .padding([1, 1])
        .output_padding([1, 1])
        .groups(2);
    check_case(
        kernels,
        IsaCapability::NONE,
        Case::transposed([1, 4, 5, 5], [4, 3, 3, 3], geometry),
        ConvBackend::SlowTranspose2d,
        31,
    )?;
    let dilated = ReferenceGeometry::default().dilation([2, 2]);
    check_case(
        kernels,
        IsaCapability::NEON,
        Case::transposed([2, 2, 4, 4], [2, 3, 3, 3], dilated),
        ConvBackend::SlowTranspose2d,
        32,
    )
}

pub fn deconv_4x4s2_matches_reference(kernels: &dyn ConvKernels) -> SuiteResult {
    let geometry = ReferenceGeometry::default().stride([2, 2]).padding([1, 1]);
    check_case(
        kernels,
        IsaCapability::NEON,
        Case::transposed([1, 3, 5, 5], [3, 2, 4, 4], geometry),
        ConvBackend::Transpose2dNeonK4S2,
        41,
    )
}

pub fn slide_window_variants_match_reference(kernels: &dyn ConvKernels) -> SuiteResult {
    let padded = ReferenceGeometry::default().padding([1, 1]);
    check_case(
        kernels,
        IsaCapability::NEON,
        Case::forward([1, 3, 9, 9], [4, 3, 3, 3], padded),
        ConvBackend::SlideWin2dNeonK3S1,
        51,
    )?;
    check_case(
        kernels,
        IsaCapability::NEON,
        Case::forward([2, 3, 5, 5], [4, 3, 1, 1], ReferenceGeometry::default()),
        ConvBackend::SlideWin2dNeonK1S1,
        52,
    )?;
    check_case(
        kernels,
        IsaCapability::NEON,
        Case::forward([1, 2, 9, 9], [1, 2, 5, 5], ReferenceGeometry::default().padding([2, 2])),
        ConvBackend::SlideWin2d,
        53,
    )
}

pub fn sgemm_variants_match_reference(kernels: &dyn ConvKernels) -> SuiteResult {
    check_case(
        kernels,
        IsaCapability::NEON,
        Case::forward([1, 3, 7, 7], [5, 3, 1, 1], ReferenceGeometry::default().stride([2, 2])),
        ConvBackend::Sgemm2dNeonK1S2,
        61,
    )?;
    check_case(
        kernels,
        IsaCapability::NEON,
        Case::forward([1, 3, 8, 8], [3, 3, 2, 2], ReferenceGeometry::default()),
        ConvBackend::Sgemm2dNeon,
        62,
    )?;
    check_case(
        kernels,
        IsaCapability::X86,
        Case::forward([2, 3, 8, 8], [4, 3, 5, 5], ReferenceGeometry::default().padding([2, 2])),
        ConvBackend::Sgemm2dX86,
        63,
    )?;
    check_case(
        kernels,
        IsaCapability::NEON,
        Case::forward([1, 64, 4, 4], [64, 64, 1, 1], ReferenceGeometry::default()),
        ConvBackend::Sgemm2dNeonK1S1,
        64,
    )
}

/// A packed weight holding the canonical values in `[O, C*kh*kw]` order yields the same result.
pub fn sgemm_reads_packed_weight(kernels: &dyn ConvKernels) -> SuiteResult {
    let mut rng = seeded_rng(65);
    let input = random_tensor(&[1, 3, 7, 7], &mut rng);
    let weight = random_tensor(&[5, 3, 1, 1], &mut rng);
    let packed = Tensor::from_vec(Shape::new([5, 3]), weight.to_vec_f32()?)?;
    let options = ConvOptions::new().stride([2, 2]);
    let operands = ConvOperands::new(&input, &weight).with_packed_weight(&packed);
    let actual = planned_run(
        kernels,
        IsaCapability::NEON,
        &operands,
        &options,
        ConvBackend::Sgemm2dNeonK1S2,
    )?;
    let geometry = ReferenceGeometry::default().stride([2, 2]);
    let reference = reference_conv2d(&input, &weight, None, &geometry)?;
    assert_close(&actual, &reference, TOLERANCE);
    Ok(())
}

pub fn winograd_variants_match_reference(kernels: &dyn ConvKernels) -> SuiteResult {
    let padded = ReferenceGeometry::default().padding([1, 1]);
    check_case(
        kernels,
        IsaCapability::NEON,
        Case::forward([1, 16, 10, 10], [16, 16, 3, 3], padded),
        ConvBackend::WinogradNeonK3S1,
        71,
    )?;
    check_case(
        kernels,
        IsaCapability::X86,
        Case::forward([1, 16, 7, 9], [16, 16, 3, 3], padded),
        ConvBackend::WinogradX86K3S1,
        72,
    )
}

pub fn packed_3x3s2_matches_reference(kernels: &dyn ConvKernels) -> SuiteResult {
    let geometry = ReferenceGeometry::default().stride([2, 2]).padding([1, 1]);
    check_case(
        kernels,
        IsaCapability::NEON,
        Case::forward([1, 3, 17, 17], [4, 3, 3, 3], geometry),
        ConvBackend::Packed2dNeonK3S2,
        81,
    )?;
    // Output below the packed-kernel minimum falls back to the general matmul.
    check_case(
        kernels,
        IsaCapability::NEON,
        Case::forward([1, 3, 9, 9], [4, 3, 3, 3], geometry),
        ConvBackend::Sgemm2dNeon,
        82,
    )
}

pub fn depthwise_variants_match_reference(kernels: &dyn ConvKernels) -> SuiteResult {
    let cases = [
        (IsaCapability::NEON, 3, 1, ConvBackend::DepthwiseNeonK3S1),
        (IsaCapability::NEON, 3, 2, ConvBackend::DepthwiseNeonK3S2),
        (IsaCapability::NEON, 5, 1, ConvBackend::DepthwiseNeonK5S1),
        (IsaCapability::NEON, 5, 2, ConvBackend::DepthwiseNeonK5S2),
        (IsaCapability::X86, 3, 1, ConvBackend::DepthwiseX86K3S1),
        (IsaCapability::X86, 3, 2, ConvBackend::DepthwiseX86K3S2),
    ];
    for (seed, (isa, kernel, stride, expected)) in (91..).zip(cases) {
        let geometry = ReferenceGeometry::default()
            .stride([stride, stride])
            .padding([kernel / 2, kernel / 2])
            .groups(8);
        check_case(
            kernels,
            isa,
            Case::forward([2, 8, 12, 12], [8, 1, kernel, kernel], geometry),
            expected,
            seed,
        )?;
    }
    Ok(())
}

/// Depthwise geometry without a specialized kernel goes through the per-group path.
pub fn unspecialized_depthwise_runs_per_group(kernels: &dyn ConvKernels) -> SuiteResult {
    let geometry = ReferenceGeometry::default().padding([3, 3]).groups(8);
    check_case(
        kernels,
        IsaCapability::NEON,
        Case::forward([1, 8, 10, 10], [8, 1, 7, 7], geometry),
        ConvBackend::Sgemm2dNeon,
        97,
    )?;
    check_case(
        kernels,
        IsaCapability::NONE,
        Case::forward([1, 8, 10, 10], [8, 1, 3, 3], geometry.padding([1, 1])),
        ConvBackend::Slow2d,
        98,
    )
}

pub fn grouped_conv2d_matches_reference(kernels: &dyn ConvKernels) -> SuiteResult {
    let geometry = ReferenceGeometry::default().padding([1, 1]).groups(3);
    check_case(
        kernels,
        IsaCapability::NEON,
        Case::forward([2, 6, 8, 8], [9, 2, 3, 3], geometry),
        ConvBackend::SlideWin2dNeonK3S1,
        101,
    )?;
    check_case(
        kernels,
        IsaCapability::X86,
        Case::forward([1, 4, 6, 6], [4, 2, 2, 2], ReferenceGeometry::default().groups(2)),
        ConvBackend::Sgemm2dX86,
        102,
    )
}

/// A grouped call equals running each group alone and concatenating, bit for bit.
pub fn grouped_equals_concatenated_groups(kernels: &dyn ConvKernels) -> SuiteResult {
    let mut rng = seeded_rng(111);
    let groups = 3;
    let input = random_tensor(&[1, 6, 7, 7], &mut rng);
    let weight = random_tensor(&[6, 2, 3, 3], &mut rng);
    let bias = random_tensor(&[6], &mut rng);
    let planner = ConvPlanner::with_isa(IsaCapability::NONE);

    let grouped = planner.run(
        kernels,
        &ConvOperands::new(&input, &weight).with_bias(&bias),
        &ConvOptions::new().padding([1, 1]).groups(groups),
    )?;

    let mut parts = Vec::new();
    for g in 0..groups as usize {
        let input_g = input.narrow(1, 2 * g, 2)?.contiguous();
        let weight_g = weight.narrow(0, 2 * g, 2)?.contiguous();
        let bias_g = bias.narrow(0, 2 * g, 2)?;
        parts.push(planner.run(
            kernels,
            &ConvOperands::new(&input_g, &weight_g).with_bias(&bias_g),
            &ConvOptions::new().padding([1, 1]),
        )?);
    }
    let concatenated = Tensor::cat(&parts, 1)?;
    assert_eq!(grouped.sizes(), concatenated.sizes());
    assert_eq!(grouped.to_vec_f32()?, concatenated.to_vec_f32()?);
    Ok(())
}

/// With one group the group path and the direct nogroup path agree bit for bit.
pub fn single_group_path_matches_nogroup(kernels: &dyn ConvKernels) -> SuiteResult {
    let mut rng = seeded_rng(115);
    let input = random_tensor(&[2, 4, 9, 8], &mut rng);
    let weight = random_tensor(&[5, 4, 3, 3], &mut rng);
    let bias = random_tensor(&[5], &mut rng);
    let options = ConvOptions::new().stride([2, 1]).padding([1]);
    let params = ConvParams::normalize(4, &options)?;
    let operands = NogroupOperands {
        input: &input,
        weight: &weight,
        packed_weight: None,
        bias: Some(&bias),
        scales: None,
    };
    for backend in [
        ConvBackend::Slow2d,
        ConvBackend::SlideWin2d,
        ConvBackend::Sgemm2dX86,
    ] {
        let grouped = convolution_grouped(kernels, backend, &operands, &params)?;
        let direct = execute_nogroup(kernels, backend, &operands, &params)?;
        assert_eq!(grouped.sizes(), direct.sizes(), "{backend}");
        assert_eq!(grouped.to_vec_f32()?, direct.to_vec_f32()?, "{backend}");
    }
    Ok(())
}

/// Strided views are compacted before they reach the kernel.
pub fn strided_input_matches_dense_input(kernels: &dyn ConvKernels) -> SuiteResult {
    let mut rng = seeded_rng(121);
    let base = random_tensor(&[2, 6, 8, 8], &mut rng);
    let weight = random_tensor(&[4, 3, 3, 3], &mut rng);
    let view = base.narrow(1, 1, 3)?;
    ensure!(!view.is_contiguous(), "narrowed channels should be strided");
    let dense = view.contiguous();
    let planner = ConvPlanner::with_isa(IsaCapability::NONE);
    let options = ConvOptions::new().stride([2, 2]);
    let from_view = planner.run(kernels, &ConvOperands::new(&view, &weight), &options)?;
    let from_dense = planner.run(kernels, &ConvOperands::new(&dense, &weight), &options)?;
    assert_eq!(from_view.to_vec_f32()?, from_dense.to_vec_f32()?);
    Ok(())
}

pub fn conv1d_is_lifted_to_2d(kernels: &dyn ConvKernels) -> SuiteResult {
    let mut rng = seeded_rng(131);
    let input = random_tensor(&[2, 3, 11], &mut rng);
    let weight = Tensor::randn(Shape::new([4, 3, 3]), 1.0, &mut rng);
    let bias = random_tensor(&[4], &mut rng);
    let operands = ConvOperands::new(&input, &weight).with_bias(&bias);
    let options = ConvOptions::new().stride([2]).padding([1]);

    let planner = ConvPlanner::with_isa(IsaCapability::NONE);
    let plan = planner.plan(&operands, &options)?;
    ensure!(plan.lifted_1d, "rank-3 weight should be lifted");
    assert_eq!(plan.backend, ConvBackend::Slow2d);
    assert_eq!(plan.params.stride.as_slice(), &[1, 2]);
    assert_eq!(plan.params.padding.as_slice(), &[0, 1]);
    assert_eq!(plan.output_sizes, vec![2, 4, 6]);

    let output = planner.run(kernels, &operands, &options)?;
    assert_eq!(output.sizes(), &[2, 4, 6]);

    let geometry = ReferenceGeometry::default().stride([1, 2]).padding([0, 1]);
    let lifted = reference_conv2d(
        &input.unsqueeze(2)?,
        &weight.unsqueeze(2)?,
        Some(&bias),
        &geometry,
    )?;
    let reference = Tensor::from_vec(Shape::new([2, 4, 6]), lifted.to_vec_f32()?)?;
    assert_close(&output, &reference, TOLERANCE);
    Ok(())
}

pub fn transposed_conv1d_is_lifted_to_2d(kernels: &dyn ConvKernels) -> SuiteResult {
    let mut rng = seeded_rng(132);
    let input = random_tensor(&[1, 2, 5], &mut rng);
    let weight = Tensor::randn(Shape::new([2, 3, 3]), 1.0, &mut rng);
    let operands = ConvOperands::new(&input, &weight);
    let options = ConvOptions::new().stride([2]).transposed(true);

    let planner = ConvPlanner::with_isa(IsaCapability::NONE);
    let output = planner.run(kernels, &operands, &options)?;
    assert_eq!(output.sizes(), &[1, 3, 11]);

    let geometry = ReferenceGeometry::default().stride([1, 2]);
    let lifted = reference_conv_transpose2d(
        &input.unsqueeze(2)?,
        &weight.unsqueeze(2)?,
        None,
        &geometry,
    )?;
    let reference = Tensor::from_vec(Shape::new([1, 3, 11]), lifted.to_vec_f32()?)?;
    assert_close(&output, &reference, TOLERANCE);
    Ok(())
}

/// Int8 output is `acc / (input_scale * weight_scale[oc]) + bias[oc]`, per group.
pub fn int8_conv2d_dequantizes_per_channel(kernels: &dyn ConvKernels) -> SuiteResult {
    let mut rng = seeded_rng(141);
    let groups = 2usize;
    let input = random_i8(&[1, 4, 6, 6], &mut rng)?;
    let weight = random_i8(&[4, 2, 3, 3], &mut rng)?;
    let bias = random_tensor(&[4], &mut rng);
    let input_scales = positive_scales(groups, &mut rng)?;
    let weight_scales = positive_scales(4, &mut rng)?;
    let operands = ConvOperands::new(&input, &weight)
        .with_bias(&bias)
        .with_int8_scales(&input_scales, &weight_scales);
    let geometry = ReferenceGeometry::default().padding([1, 1]).groups(groups);

    let actual = planned_run(
        kernels,
        IsaCapability::NEON,
        &operands,
        &geometry.options(false),
        ConvBackend::SlideWin2dInt8,
    )?;

    let acc = reference_conv2d(&int8_as_f32(&input)?, &int8_as_f32(&weight)?, None, &geometry)?;
    let plane = 6 * 6;
    let in_scales = input_scales.to_vec_f32()?;
    let w_scales = weight_scales.to_vec_f32()?;
    let bias_values = bias.to_vec_f32()?;
    let expected: Vec<f32> = acc
        .to_vec_f32()?
        .iter()
        .enumerate()
        .map(|(index, &a)| {
            let oc = index / plane;
            let group = oc / 2;
            a * (1.0 / (in_scales[group] * w_scales[oc])) + bias_values[oc]
        })
        .collect();
    let expected = Tensor::from_vec(acc.shape().clone(), expected)?;
    assert_close(&actual, &expected, TOLERANCE);
    Ok(())
}

pub fn int8_without_scales_is_rejected(kernels: &dyn ConvKernels) -> SuiteResult {
    let mut rng = seeded_rng(142);
    let input = random_i8(&[1, 3, 5, 5], &mut rng)?;
    let weight = random_i8(&[2, 3, 3, 3], &mut rng)?;
    let err = ConvPlanner::with_isa(IsaCapability::NONE)
        .run(kernels, &ConvOperands::new(&input, &weight), &ConvOptions::new())
        .expect_err("int8 convolution without scales");
    assert_eq!(err.kind(), ConvErrorKind::InvalidParameter);
    Ok(())
}
