use conv_rs::error::ConvErrorKind;
use conv_rs::tensor::{Shape, Tensor};
use conv_rs::{ConvBackend, ConvOperands, ConvOptions, ConvPlanner, IsaCapability};
use conv_rs_backend_ref_cpu::CpuConvKernels;
use conv_rs_backend_tests::fixtures::{
    assert_close, random_tensor, reference_conv2d, seeded_rng, ReferenceGeometry, TOLERANCE,
};

#[test]
fn rgb_stem_picks_the_neon_3x3_sliding_window() -> anyhow::Result<()> {
    let mut rng = seeded_rng(224);
    let input = random_tensor(&[1, 3, 224, 224], &mut rng);
    let weight = random_tensor(&[16, 3, 3, 3], &mut rng);
    let options = ConvOptions::new().padding([1]);
    let operands = ConvOperands::new(&input, &weight);

    let planner = ConvPlanner::with_isa(IsaCapability::NEON);
    let plan = planner.plan(&operands, &options)?;
    assert_eq!(plan.backend, ConvBackend::SlideWin2dNeonK3S1);
    assert_eq!(plan.output_sizes, vec![1, 16, 224, 224]);

    let output = planner.run(&CpuConvKernels::new(), &operands, &options)?;
    assert_eq!(output.sizes(), &[1, 16, 224, 224]);
    Ok(())
}

#[test]
fn mobile_depthwise_stride_2_halves_the_feature_map() -> anyhow::Result<()> {
    let mut rng = seeded_rng(56);
    let input = random_tensor(&[1, 8, 56, 56], &mut rng);
    let weight = random_tensor(&[8, 1, 3, 3], &mut rng);
    let bias = random_tensor(&[8], &mut rng);
    let options = ConvOptions::new().stride([2]).padding([1]).groups(8);
    let operands = ConvOperands::new(&input, &weight).with_bias(&bias);

    let planner = ConvPlanner::with_isa(IsaCapability::NEON);
    assert_eq!(
        planner.plan(&operands, &options)?.backend,
        ConvBackend::DepthwiseNeonK3S2
    );
    let output = planner.run(&CpuConvKernels::new(), &operands, &options)?;
    assert_eq!(output.sizes(), &[1, 8, 28, 28]);

    let geometry = ReferenceGeometry::default()
        .stride([2, 2])
        .padding([1, 1])
        .groups(8);
    let reference = reference_conv2d(&input, &weight, Some(&bias), &geometry)?;
    assert_close(&output, &reference, TOLERANCE);
    Ok(())
}

#[test]
fn channel_mismatch_fails_before_any_kernel_runs() {
    let input = Tensor::zeros(Shape::new([1, 3, 32, 32]));
    let weight = Tensor::zeros(Shape::new([16, 4, 3, 3]));
    let err = ConvPlanner::with_isa(IsaCapability::NEON)
        .run(
            &CpuConvKernels::new(),
            &ConvOperands::new(&input, &weight),
            &ConvOptions::new(),
        )
        .expect_err("3-channel input against a 4-channel weight");
    assert_eq!(err.kind(), ConvErrorKind::ShapeMismatch);
}

#[test]
fn every_isa_computes_the_same_convolution() -> anyhow::Result<()> {
    let mut rng = seeded_rng(5);
    let input = random_tensor(&[2, 16, 12, 12], &mut rng);
    let weight = random_tensor(&[16, 16, 3, 3], &mut rng);
    let options = ConvOptions::new().padding([1]);
    let operands = ConvOperands::new(&input, &weight);
    let kernels = CpuConvKernels::new();

    let reference = reference_conv2d(
        &input,
        &weight,
        None,
        &ReferenceGeometry::default().padding([1, 1]),
    )?;
    for (isa, backend) in [
        (IsaCapability::NEON, ConvBackend::WinogradNeonK3S1),
        (IsaCapability::X86, ConvBackend::WinogradX86K3S1),
        (IsaCapability::NONE, ConvBackend::Slow2d),
    ] {
        let planner = ConvPlanner::with_isa(isa);
        assert_eq!(planner.plan(&operands, &options)?.backend, backend);
        let output = planner.run(&kernels, &operands, &options)?;
        assert_close(&output, &reference, TOLERANCE);
    }
    Ok(())
}

#[test]
fn free_function_uses_the_detected_capability() -> anyhow::Result<()> {
    let mut rng = seeded_rng(9);
    let input = random_tensor(&[1, 4, 10, 10], &mut rng);
    let weight = random_tensor(&[6, 2, 3, 3], &mut rng);
    let options = ConvOptions::new().stride([2]).groups(2);
    let output = conv_rs::convolution(
        &CpuConvKernels::new(),
        &ConvOperands::new(&input, &weight),
        &options,
    )?;
    let reference = reference_conv2d(
        &input,
        &weight,
        None,
        &ReferenceGeometry::default().stride([2, 2]).groups(2),
    )?;
    assert_close(&output, &reference, TOLERANCE);
    Ok(())
}
