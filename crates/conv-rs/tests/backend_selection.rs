use conv_rs::backend::tuning::SlideWindowRule;
use conv_rs::error::{ConvErrorKind, ConvResult};
use conv_rs::params::{ConvOptions, ConvParams};
use conv_rs::tensor::{Device, Shape, Tensor};
use conv_rs::{
    select_conv_backend, ConvBackend, ConvThresholds, ConvTuning, DefaultConvTuning,
    IsaCapability,
};

fn zeros(dims: &[usize]) -> Tensor {
    Tensor::zeros(Shape::new(dims.to_vec()))
}

fn int8(dims: &[usize]) -> Tensor {
    let shape = Shape::new(dims.to_vec());
    let len = shape.num_elements();
    Tensor::from_i8(shape, vec![0; len]).unwrap()
}

fn select_with(
    input: &Tensor,
    weight: &Tensor,
    options: &ConvOptions,
    isa: IsaCapability,
    tuning: &dyn ConvTuning,
) -> ConvResult<ConvBackend> {
    let params = ConvParams::normalize(weight.rank(), options)?;
    select_conv_backend(input, weight, &params, isa, tuning)
}

fn select(
    input: &[usize],
    weight: &[usize],
    options: &ConvOptions,
    isa: IsaCapability,
) -> ConvBackend {
    select_with(
        &zeros(input),
        &zeros(weight),
        options,
        isa,
        &DefaultConvTuning::new(),
    )
    .unwrap_or_else(|err| panic!("unexpected error: {err}"))
}

fn stride(s: i64) -> ConvOptions {
    ConvOptions::new().stride([s])
}

#[test]
fn non_cpu_tensors_are_overridden_before_anything_else() {
    let input = zeros(&[1, 3, 8, 8]).with_device(Device::External("gpu".to_string()));
    let weight = int8(&[4, 3, 3, 3]);
    let backend = select_with(
        &input,
        &weight,
        &ConvOptions::new().transposed(true).dilation([2]),
        IsaCapability::NEON,
        &DefaultConvTuning::new(),
    )
    .unwrap();
    assert_eq!(backend, ConvBackend::Overrideable);
}

#[test]
fn int8_operands_bypass_geometry() {
    for options in [
        ConvOptions::new(),
        ConvOptions::new().dilation([2]),
        ConvOptions::new().groups(3),
    ] {
        for isa in [IsaCapability::NEON, IsaCapability::X86, IsaCapability::NONE] {
            let backend = select_with(
                &int8(&[1, 3, 9, 9]),
                &int8(&[3, 1, 3, 3]),
                &options,
                isa,
                &DefaultConvTuning::new(),
            )
            .unwrap();
            assert_eq!(backend, ConvBackend::SlideWin2dInt8);
        }
    }
}

#[test]
fn mixed_dtypes_are_unsupported() {
    let err = select_with(
        &zeros(&[1, 3, 8, 8]),
        &int8(&[4, 3, 3, 3]),
        &ConvOptions::new(),
        IsaCapability::NEON,
        &DefaultConvTuning::new(),
    )
    .expect_err("f32 input with i8 weight");
    assert_eq!(err.kind(), ConvErrorKind::UnsupportedConfiguration);
}

#[test]
fn transposed_branches() {
    let dilated = ConvOptions::new().transposed(true).dilation([2]);
    assert_eq!(
        select(&[1, 3, 8, 8], &[3, 4, 4, 4], &dilated, IsaCapability::NEON),
        ConvBackend::SlowTranspose2d
    );
    let deconv = ConvOptions::new().transposed(true).stride([2]);
    assert_eq!(
        select(&[1, 3, 8, 8], &[3, 4, 4, 4], &deconv, IsaCapability::NEON),
        ConvBackend::Transpose2dNeonK4S2
    );
    assert_eq!(
        select(&[1, 3, 8, 8], &[3, 4, 4, 4], &deconv, IsaCapability::X86),
        ConvBackend::SlowTranspose2d
    );
    let other = ConvOptions::new().transposed(true).stride([2]);
    assert_eq!(
        select(&[1, 3, 8, 8], &[3, 4, 3, 3], &other, IsaCapability::NEON),
        ConvBackend::SlowTranspose2d
    );
}

#[test]
fn volumetric_transposed_needs_dilation_to_find_a_backend() {
    let dilated = ConvOptions::new().transposed(true).dilation([2]);
    assert_eq!(
        select(&[1, 2, 4, 4, 4], &[2, 2, 3, 3, 3], &dilated, IsaCapability::NEON),
        ConvBackend::SlowTranspose2d
    );
    let err = select_with(
        &zeros(&[1, 2, 4, 4, 4]),
        &zeros(&[2, 2, 3, 3, 3]),
        &ConvOptions::new().transposed(true),
        IsaCapability::NEON,
        &DefaultConvTuning::new(),
    )
    .expect_err("undilated 3-D transposed convolution");
    assert_eq!(err.kind(), ConvErrorKind::UnsupportedConfiguration);
}

#[test]
fn dilation_selects_the_dilated_path_for_any_rank() {
    let dilated = ConvOptions::new().dilation([1, 2]);
    for isa in [IsaCapability::NEON, IsaCapability::X86, IsaCapability::NONE] {
        assert_eq!(
            select(&[1, 3, 9, 9], &[4, 3, 3, 3], &dilated, isa),
            ConvBackend::SlowDilated2d
        );
    }
    assert_eq!(
        select(
            &[1, 2, 6, 6, 6],
            &[2, 2, 3, 3, 3],
            &ConvOptions::new().dilation([2]),
            IsaCapability::NONE
        ),
        ConvBackend::SlowDilated2d
    );
}

#[test]
fn volumetric_forward_without_dilation_is_unsupported() {
    let err = select_with(
        &zeros(&[1, 2, 6, 6, 6]),
        &zeros(&[2, 2, 3, 3, 3]),
        &ConvOptions::new(),
        IsaCapability::X86,
        &DefaultConvTuning::new(),
    )
    .expect_err("3-D forward convolution");
    assert_eq!(err.kind(), ConvErrorKind::UnsupportedConfiguration);
}

#[test]
fn neon_depthwise_windows() {
    let cases = [
        (3, 1, ConvBackend::DepthwiseNeonK3S1),
        (3, 2, ConvBackend::DepthwiseNeonK3S2),
        (5, 1, ConvBackend::DepthwiseNeonK5S1),
        (5, 2, ConvBackend::DepthwiseNeonK5S2),
    ];
    for (kernel, s, expected) in cases {
        let options = stride(s).groups(8).padding([kernel as i64 / 2]);
        assert_eq!(
            select(&[1, 8, 56, 56], &[8, 1, kernel, kernel], &options, IsaCapability::NEON),
            expected
        );
    }
}

#[test]
fn depthwise_without_a_specialized_window_uses_the_general_tree() {
    let options = ConvOptions::new().groups(8);
    assert_eq!(
        select(&[1, 8, 16, 16], &[8, 1, 7, 7], &options, IsaCapability::NEON),
        ConvBackend::Sgemm2dNeon
    );
    assert_eq!(
        select(&[1, 8, 16, 16], &[8, 1, 5, 5], &options, IsaCapability::X86),
        ConvBackend::Sgemm2dX86
    );
}

#[test]
fn neon_pointwise_windows() {
    assert_eq!(
        select(&[1, 64, 8, 8], &[64, 64, 1, 1], &ConvOptions::new(), IsaCapability::NEON),
        ConvBackend::Sgemm2dNeonK1S1
    );
    assert_eq!(
        select(&[1, 63, 8, 8], &[64, 63, 1, 1], &ConvOptions::new(), IsaCapability::NEON),
        ConvBackend::SlideWin2dNeonK1S1
    );
    assert_eq!(
        select(&[1, 3, 8, 8], &[4, 3, 1, 1], &stride(2), IsaCapability::NEON),
        ConvBackend::Sgemm2dNeonK1S2
    );
}

#[test]
fn neon_3x3_stride_1_prefers_winograd_for_wide_small_images() {
    let padded = ConvOptions::new().padding([1]);
    assert_eq!(
        select(&[1, 16, 120, 120], &[16, 16, 3, 3], &padded, IsaCapability::NEON),
        ConvBackend::WinogradNeonK3S1
    );
    assert_eq!(
        select(&[1, 16, 121, 120], &[16, 16, 3, 3], &padded, IsaCapability::NEON),
        ConvBackend::SlideWin2dNeonK3S1
    );
    assert_eq!(
        select(&[1, 15, 32, 32], &[16, 15, 3, 3], &padded, IsaCapability::NEON),
        ConvBackend::SlideWin2dNeonK3S1
    );
}

#[test]
fn neon_3x3_stride_2_depends_on_output_extent() {
    let options = stride(2).padding([1]);
    // (15 + 2 - 3) / 2 + 1 = 8
    assert_eq!(
        select(&[1, 3, 15, 15], &[4, 3, 3, 3], &options, IsaCapability::NEON),
        ConvBackend::Packed2dNeonK3S2
    );
    // (13 + 2 - 3) / 2 + 1 = 7
    assert_eq!(
        select(&[1, 3, 13, 15], &[4, 3, 3, 3], &options, IsaCapability::NEON),
        ConvBackend::Sgemm2dNeon
    );
}

#[test]
fn neon_fallback_follows_the_slide_window_table() {
    let none = ConvOptions::new();
    assert_eq!(
        select(&[1, 64, 16, 16], &[1, 64, 2, 3], &none, IsaCapability::NEON),
        ConvBackend::SlideWin2d
    );
    assert_eq!(
        select(&[1, 3, 16, 16], &[1, 3, 4, 4], &none, IsaCapability::NEON),
        ConvBackend::SlideWin2d
    );
    assert_eq!(
        select(&[1, 2, 16, 16], &[1, 2, 4, 4], &none, IsaCapability::NEON),
        ConvBackend::Sgemm2dNeon
    );
    assert_eq!(
        select(&[1, 16, 16, 16], &[2, 16, 7, 7], &none, IsaCapability::NEON),
        ConvBackend::SlideWin2d
    );
    assert_eq!(
        select(&[1, 16, 16, 16], &[3, 16, 7, 7], &none, IsaCapability::NEON),
        ConvBackend::Sgemm2dNeon
    );
}

#[test]
fn x86_branches() {
    let padded = ConvOptions::new().padding([1]);
    assert_eq!(
        select(&[1, 8, 16, 16], &[8, 1, 3, 3], &padded.clone().groups(8), IsaCapability::X86),
        ConvBackend::DepthwiseX86K3S1
    );
    assert_eq!(
        select(
            &[1, 8, 16, 16],
            &[8, 1, 3, 3],
            &padded.clone().groups(8).stride([2]),
            IsaCapability::X86
        ),
        ConvBackend::DepthwiseX86K3S2
    );
    assert_eq!(
        select(&[1, 16, 200, 200], &[16, 16, 3, 3], &padded, IsaCapability::X86),
        ConvBackend::WinogradX86K3S1
    );
    assert_eq!(
        select(&[1, 8, 16, 16], &[16, 8, 3, 3], &padded, IsaCapability::X86),
        ConvBackend::Sgemm2dX86
    );
    assert_eq!(
        select(&[1, 16, 16, 16], &[16, 16, 3, 3], &stride(2), IsaCapability::X86),
        ConvBackend::Sgemm2dX86
    );
}

#[test]
fn no_vector_unit_uses_the_portable_path() {
    assert_eq!(
        select(&[1, 8, 16, 16], &[8, 1, 3, 3], &ConvOptions::new().groups(8), IsaCapability::NONE),
        ConvBackend::Slow2d
    );
    assert_eq!(
        select(&[1, 64, 8, 8], &[64, 64, 1, 1], &ConvOptions::new(), IsaCapability::NONE),
        ConvBackend::Slow2d
    );
}

#[test]
fn neon_takes_precedence_over_x86() {
    let both = IsaCapability {
        neon: true,
        x86: true,
    };
    assert_eq!(
        select(&[1, 3, 8, 8], &[4, 3, 1, 1], &stride(2), both),
        ConvBackend::Sgemm2dNeonK1S2
    );
}

#[test]
fn selection_is_pure() {
    let input = zeros(&[1, 16, 32, 32]);
    let weight = zeros(&[16, 16, 3, 3]);
    let options = ConvOptions::new().padding([1]);
    let tuning = DefaultConvTuning::new();
    let first = select_with(&input, &weight, &options, IsaCapability::NEON, &tuning).unwrap();
    for _ in 0..4 {
        let again = select_with(&input, &weight, &options, IsaCapability::NEON, &tuning).unwrap();
        assert_eq!(again, first);
    }
}

#[test]
fn thresholds_are_injectable() {
    let thresholds = ConvThresholds {
        neon_sgemm_1x1s1_min_channels: 4,
        neon_winograd_min_channels: 1024,
        slide_window_rules: vec![SlideWindowRule::new(3, 2..=2, 0)],
        ..ConvThresholds::default()
    };
    let tuning = DefaultConvTuning::with_thresholds(thresholds);
    let run = |input: Vec<usize>, weight: Vec<usize>, options: &ConvOptions| {
        select_with(&zeros(&input), &zeros(&weight), options, IsaCapability::NEON, &tuning).unwrap()
    };
    assert_eq!(
        run(vec![1, 4, 8, 8], vec![4, 4, 1, 1], &ConvOptions::new()),
        ConvBackend::Sgemm2dNeonK1S1
    );
    assert_eq!(
        run(vec![1, 16, 8, 8], vec![16, 16, 3, 3], &ConvOptions::new()),
        ConvBackend::SlideWin2dNeonK3S1
    );
    assert_eq!(
        run(vec![1, 3, 8, 8], vec![3, 3, 2, 2], &ConvOptions::new()),
        ConvBackend::SlideWin2d
    );
}

struct AlwaysSgemm;

impl ConvTuning for AlwaysSgemm {
    fn neon_sgemm_1x1s1(&self, _in_channels: usize, _out_channels: usize) -> bool {
        true
    }

    fn neon_winograd_3x3s1(&self, _: usize, _: usize, _: usize, _: usize) -> bool {
        false
    }

    fn neon_packed_3x3s2(&self, _output_height: usize, _output_width: usize) -> bool {
        false
    }

    fn neon_prefer_sgemm(&self, _: usize, _: usize, _: usize) -> bool {
        true
    }

    fn x86_winograd_3x3s1(&self, _in_channels: usize, _out_channels: usize) -> bool {
        false
    }
}

#[test]
fn custom_tuning_policies_plug_in() {
    let cases = [
        ([1, 1, 8, 8], [1, 1, 1, 1], 1, ConvBackend::Sgemm2dNeonK1S1),
        ([1, 64, 8, 8], [64, 64, 3, 3], 1, ConvBackend::SlideWin2dNeonK3S1),
        ([1, 3, 64, 64], [4, 3, 3, 3], 2, ConvBackend::Sgemm2dNeon),
        ([1, 64, 16, 16], [1, 64, 9, 9], 1, ConvBackend::Sgemm2dNeon),
    ];
    for (input, weight, s, expected) in cases {
        let backend = select_with(
            &zeros(&input),
            &zeros(&weight),
            &stride(s),
            IsaCapability::NEON,
            &AlwaysSgemm,
        )
        .unwrap();
        assert_eq!(backend, expected);
    }
    let x86 = select_with(
        &zeros(&[1, 64, 8, 8]),
        &zeros(&[64, 64, 3, 3]),
        &ConvOptions::new(),
        IsaCapability::X86,
        &AlwaysSgemm,
    )
    .unwrap();
    assert_eq!(x86, ConvBackend::Sgemm2dX86);
}
