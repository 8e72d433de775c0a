pub mod fixtures;
pub mod recording;
pub mod suite;

pub use recording::{RecordedCall, RecordingKernels};

#[macro_export]
macro_rules! define_kernel_tests {
    ($module:ident, $kernels_ctor:expr) => {
        #[cfg(test)]
        mod $module {
            #[allow(unused_imports)]
            use super::*;
            use $crate::suite;

            macro_rules! kernel_test {
                ($name:ident) => {
                    #[test]
                    fn $name() -> $crate::suite::SuiteResult {
                        let kernels = ($kernels_ctor)();
                        suite::$name(&kernels)
                    }
                };
            }

            kernel_test!(slow_conv2d_matches_reference);
            kernel_test!(dilated_conv2d_matches_reference);
            kernel_test!(transposed_conv2d_matches_reference);
            kernel_test!(deconv_4x4s2_matches_reference);
            kernel_test!(slide_window_variants_match_reference);
            kernel_test!(sgemm_variants_match_reference);
            kernel_test!(sgemm_reads_packed_weight);
            kernel_test!(winograd_variants_match_reference);
            kernel_test!(packed_3x3s2_matches_reference);
            kernel_test!(depthwise_variants_match_reference);
            kernel_test!(unspecialized_depthwise_runs_per_group);
            kernel_test!(grouped_conv2d_matches_reference);
            kernel_test!(grouped_equals_concatenated_groups);
            kernel_test!(single_group_path_matches_nogroup);
            kernel_test!(strided_input_matches_dense_input);
            kernel_test!(conv1d_is_lifted_to_2d);
            kernel_test!(transposed_conv1d_is_lifted_to_2d);
            kernel_test!(int8_conv2d_dequantizes_per_channel);
            kernel_test!(int8_without_scales_is_rejected);
        }
    };
}
