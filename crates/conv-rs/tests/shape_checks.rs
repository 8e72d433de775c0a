use conv_rs::error::{ConvError, ConvErrorKind, ConvResult};
use conv_rs::params::{ConvOptions, ConvParams};
use conv_rs::tensor::{Shape, Tensor};
use conv_rs::validate::check_shape_forward;
use conv_rs::{ConvOperands, ConvPlanner, IsaCapability};
use smallvec::smallvec;

fn input(dims: &[usize]) -> Tensor {
    Tensor::zeros(Shape::new(dims.to_vec()))
}

fn check(input_dims: &[usize], weight: &[usize], options: &ConvOptions) -> ConvResult<()> {
    let params = ConvParams::normalize(weight.len(), options)?;
    check_shape_forward(&input(input_dims), weight, None, &params)
}

fn kind_of(result: ConvResult<()>) -> ConvErrorKind {
    result.expect_err("shape check should fail").kind()
}

#[test]
fn accepts_a_well_formed_convolution() {
    let options = ConvOptions::new().stride([2]).padding([1]);
    check(&[1, 3, 8, 8], &[4, 3, 3, 3], &options).unwrap();
}

#[test]
fn negative_padding_is_rejected() {
    let options = ConvOptions::new().padding([-1]);
    assert_eq!(
        kind_of(check(&[1, 3, 8, 8], &[4, 3, 3, 3], &options)),
        ConvErrorKind::InvalidParameter
    );
}

#[test]
fn negative_output_padding_is_rejected() {
    let options = ConvOptions::new().transposed(true).output_padding([0, -1]);
    assert_eq!(
        kind_of(check(&[1, 3, 8, 8], &[3, 4, 3, 3], &options)),
        ConvErrorKind::InvalidParameter
    );
}

#[test]
fn non_positive_stride_is_rejected() {
    for stride in [0, -2] {
        let options = ConvOptions::new().stride([1, stride]);
        assert_eq!(
            kind_of(check(&[1, 3, 8, 8], &[4, 3, 3, 3], &options)),
            ConvErrorKind::InvalidParameter
        );
    }
}

#[test]
fn non_positive_dilation_is_rejected() {
    let options = ConvOptions::new().dilation([0]);
    assert_eq!(
        kind_of(check(&[1, 3, 8, 8], &[4, 3, 3, 3], &options)),
        ConvErrorKind::InvalidParameter
    );
}

#[test]
fn non_positive_groups_are_rejected() {
    let options = ConvOptions::new().groups(0);
    assert_eq!(
        kind_of(check(&[1, 3, 8, 8], &[4, 3, 3, 3], &options)),
        ConvErrorKind::InvalidParameter
    );
}

#[test]
fn rank_mismatch_reports_both_shapes() {
    let err = check(&[3, 8, 8], &[4, 3, 3, 3], &ConvOptions::new()).expect_err("rank mismatch");
    assert_eq!(err.kind(), ConvErrorKind::ShapeMismatch);
    let message = err.to_string();
    assert!(message.contains("[4, 3, 3, 3]"), "{message}");
    assert!(message.contains("[3, 8, 8]"), "{message}");
}

#[test]
fn parameter_rank_must_match_weight_rank() {
    let params = ConvParams {
        stride: smallvec![1],
        padding: smallvec![0],
        dilation: smallvec![1],
        output_padding: smallvec![0],
        transposed: false,
        groups: 1,
    };
    let err = check_shape_forward(&input(&[1, 3, 8, 8]), &[4, 3, 3, 3], None, &params)
        .expect_err("one spatial axis against a 2-D weight");
    assert_eq!(err.kind(), ConvErrorKind::Shape);
}

#[test]
fn groups_must_divide_output_channels() {
    let too_many = ConvOptions::new().groups(8);
    assert_eq!(
        kind_of(check(&[1, 8, 8, 8], &[4, 1, 3, 3], &too_many)),
        ConvErrorKind::InvalidParameter
    );
    let uneven = ConvOptions::new().groups(3);
    assert_eq!(
        kind_of(check(&[1, 6, 8, 8], &[4, 2, 3, 3], &uneven)),
        ConvErrorKind::InvalidParameter
    );
}

#[test]
fn input_channels_must_match_weight_times_groups() {
    let err = check(&[1, 3, 32, 32], &[16, 4, 3, 3], &ConvOptions::new())
        .expect_err("channel mismatch");
    assert_eq!(err.kind(), ConvErrorKind::ShapeMismatch);
    assert!(err.to_string().contains("4 channels"), "{err}");
}

#[test]
fn bias_must_have_one_entry_per_output_channel() {
    let params = ConvParams::normalize(4, &ConvOptions::new()).unwrap();
    let bias = Tensor::zeros(Shape::new([5]));
    let err = check_shape_forward(&input(&[1, 3, 8, 8]), &[4, 3, 3, 3], Some(&bias), &params)
        .expect_err("bias length");
    assert_eq!(err.kind(), ConvErrorKind::ShapeMismatch);

    let matrix_bias = Tensor::zeros(Shape::new([4, 1]));
    let err = check_shape_forward(
        &input(&[1, 3, 8, 8]),
        &[4, 3, 3, 3],
        Some(&matrix_bias),
        &params,
    )
    .expect_err("bias rank");
    assert_eq!(err.kind(), ConvErrorKind::ShapeMismatch);
}

#[test]
fn oversized_dilated_kernel_reports_padded_and_effective_extents() {
    let options = ConvOptions::new().dilation([2]).padding([0, 1]);
    let err = check(&[1, 3, 4, 4], &[4, 3, 3, 3], &options).expect_err("kernel too large");
    assert_eq!(
        err,
        ConvError::KernelTooLarge {
            padded: "(4 x 6)".to_string(),
            effective: "(5 x 5)".to_string(),
        }
    );
}

#[test]
fn transposed_layout_checks_input_channels_against_dim_zero() {
    let options = ConvOptions::new().transposed(true).groups(2);
    check(&[1, 4, 5, 5], &[4, 3, 3, 3], &options).unwrap();
    assert_eq!(
        kind_of(check(&[1, 6, 5, 5], &[4, 3, 3, 3], &options)),
        ConvErrorKind::ShapeMismatch
    );
}

#[test]
fn transposed_bias_covers_every_group() {
    let params = ConvParams::normalize(4, &ConvOptions::new().transposed(true).groups(2)).unwrap();
    let good = Tensor::zeros(Shape::new([6]));
    check_shape_forward(&input(&[1, 4, 5, 5]), &[4, 3, 3, 3], Some(&good), &params).unwrap();
    let short = Tensor::zeros(Shape::new([3]));
    let err = check_shape_forward(&input(&[1, 4, 5, 5]), &[4, 3, 3, 3], Some(&short), &params)
        .expect_err("bias for a single group");
    assert_eq!(err.kind(), ConvErrorKind::ShapeMismatch);
}

#[test]
fn transposed_layout_skips_the_kernel_fit_check() {
    let options = ConvOptions::new().transposed(true);
    check(&[1, 2, 1, 1], &[2, 3, 4, 4], &options).unwrap();
}

#[test]
fn overflowing_padding_or_dilation_is_rejected_without_panicking() {
    let huge = i64::MAX / 2 + 1;
    for options in [
        ConvOptions::new().padding([huge]),
        ConvOptions::new().dilation([huge]),
    ] {
        assert_eq!(
            kind_of(check(&[1, 2, 4, 4], &[2, 2, 3, 3], &options)),
            ConvErrorKind::InvalidParameter,
            "{options:?}"
        );
    }
}

#[test]
fn overflowing_transposed_extent_fails_planning() {
    let input = input(&[1, 2, 4, 4]);
    let weight = Tensor::zeros(Shape::new([2, 2, 3, 3]));
    let planner = ConvPlanner::with_isa(IsaCapability::NONE);
    for options in [
        ConvOptions::new().transposed(true).stride([i64::MAX]),
        ConvOptions::new().transposed(true).dilation([i64::MAX]),
    ] {
        let err = planner
            .plan(&ConvOperands::new(&input, &weight), &options)
            .expect_err("transposed extent overflows");
        assert_eq!(err.kind(), ConvErrorKind::InvalidParameter, "{options:?}");
    }
}
