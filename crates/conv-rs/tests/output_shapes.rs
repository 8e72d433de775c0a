use conv_rs::error::{ConvError, ConvErrorKind};
use conv_rs::params::{conv_output_size, conv_transpose_output_size, ConvOptions, ConvParams};
use conv_rs::tensor::{Shape, Tensor};
use conv_rs::{ConvOperands, ConvPlanner, IsaCapability};

#[test]
fn forward_extent_follows_the_standard_formula() {
    let cases = [
        // (extent, kernel, stride, padding, dilation, expected)
        (224, 3, 1, 1, 1, 224),
        (56, 3, 2, 1, 1, 28),
        (7, 7, 1, 0, 1, 1),
        (10, 3, 3, 0, 1, 3),
        (9, 3, 1, 0, 4, 1),
        (5, 1, 2, 0, 1, 3),
    ];
    for (extent, kernel, stride, padding, dilation, expected) in cases {
        let out = conv_output_size(
            &[1, 2, extent],
            &[4, 2, kernel],
            &[stride],
            &[padding],
            &[dilation],
        )
        .unwrap();
        assert_eq!(out, vec![1, 4, expected], "extent {extent} kernel {kernel}");
    }
}

#[test]
fn forward_extent_rejects_windows_wider_than_the_padded_input() {
    let err = conv_output_size(&[1, 1, 4, 4], &[1, 1, 3, 3], &[1, 1], &[0, 0], &[2, 2])
        .expect_err("5-wide window over a 4-wide input");
    assert_eq!(
        err,
        ConvError::KernelTooLarge {
            padded: "4".to_string(),
            effective: "5".to_string(),
        }
    );
}

#[test]
fn transposed_extent_inverts_the_forward_extent() {
    for (extent, kernel, stride, padding) in [(8, 3, 2, 1), (5, 4, 2, 1), (7, 5, 3, 2)] {
        let forward = conv_output_size(
            &[1, 1, extent],
            &[1, 1, kernel],
            &[stride],
            &[padding],
            &[1],
        )
        .unwrap()[2];
        let remainder = (extent + 2 * padding - kernel) % stride;
        let back = conv_transpose_output_size(
            &[1, 1, forward],
            &[1, 1, kernel],
            1,
            &[stride],
            &[padding],
            &[1],
            &[remainder],
        )
        .unwrap()[2];
        assert_eq!(back, extent, "extent {extent} kernel {kernel} stride {stride}");
    }
}

#[test]
fn transposed_channels_scale_with_groups() {
    let out = conv_transpose_output_size(
        &[2, 6, 4, 4],
        &[6, 5, 2, 2],
        3,
        &[2, 2],
        &[0, 0],
        &[1, 1],
        &[0, 0],
    )
    .unwrap();
    assert_eq!(out, vec![2, 15, 8, 8]);
}

#[test]
fn normalization_expands_short_lists() {
    let options = ConvOptions::new().stride([2]).padding([1, 0]);
    let params = ConvParams::normalize(4, &options).unwrap();
    assert_eq!(params.stride.as_slice(), &[2, 2]);
    assert_eq!(params.padding.as_slice(), &[1, 0]);
    assert_eq!(params.dilation.as_slice(), &[1, 1]);
    assert_eq!(params.output_padding.as_slice(), &[0, 0]);
    assert_eq!(params.groups, 1);
    assert!(!params.transposed);

    let volumetric = ConvParams::normalize(5, &options.clone().padding([1])).unwrap();
    assert_eq!(volumetric.stride.as_slice(), &[2, 2, 2]);
}

#[test]
fn normalization_rejects_bad_lengths_and_ranks() {
    let err = ConvParams::normalize(4, &ConvOptions::new().stride([1, 2, 3])).unwrap_err();
    assert_eq!(err.kind(), ConvErrorKind::Shape);
    assert!(err.to_string().contains("stride"), "{err}");

    let err = ConvParams::normalize(2, &ConvOptions::new()).unwrap_err();
    assert_eq!(err.kind(), ConvErrorKind::Shape);
}

#[test]
fn planned_shape_matches_the_formula_for_both_layouts() {
    let input = Tensor::zeros(Shape::new([2, 4, 9, 7]));
    let forward_weight = Tensor::zeros(Shape::new([6, 2, 3, 2]));
    let planner = ConvPlanner::with_isa(IsaCapability::NONE);
    let plan = planner
        .plan(
            &ConvOperands::new(&input, &forward_weight),
            &ConvOptions::new().stride([2, 1]).padding([1]).groups(2),
        )
        .unwrap();
    assert_eq!(plan.output_sizes, vec![2, 6, 5, 8]);

    let transposed_weight = Tensor::zeros(Shape::new([4, 3, 3, 3]));
    let plan = planner
        .plan(
            &ConvOperands::new(&input, &transposed_weight),
            &ConvOptions::new()
                .transposed(true)
                .stride([2])
                .padding([1])
                .output_padding([1, 0])
                .groups(2),
        )
        .unwrap();
    assert_eq!(plan.output_sizes, vec![2, 6, 18, 13]);
}
