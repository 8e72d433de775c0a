//! Calibrated thresholds used by the backend selector.
//!
//! The selector's control flow is fixed; every numeric cut-off it consults lives behind
//! [`ConvTuning`] so a target can be recalibrated without touching the decision tree.

use std::ops::RangeInclusive;

/// Threshold policy consulted by [`select_conv_backend`](super::select_conv_backend).
pub trait ConvTuning: Send + Sync {
    /// Neon 1x1 stride-1: batched matmul instead of the direct sliding window.
    fn neon_sgemm_1x1s1(&self, in_channels: usize, out_channels: usize) -> bool;

    /// Neon 3x3 stride-1: Winograd instead of the direct sliding window.
    fn neon_winograd_3x3s1(
        &self,
        in_channels: usize,
        out_channels: usize,
        height: usize,
        width: usize,
    ) -> bool;

    /// Neon 3x3 stride-2: packed kernel instead of the general batched matmul.
    fn neon_packed_3x3s2(&self, output_height: usize, output_width: usize) -> bool;

    /// Neon fallback for other geometries: batched matmul (`true`) or direct sliding window.
    fn neon_prefer_sgemm(&self, in_channels: usize, out_channels: usize, kernel_w: usize) -> bool;

    /// x86 3x3 stride-1 non-depthwise: Winograd instead of the batched matmul.
    fn x86_winograd_3x3s1(&self, in_channels: usize, out_channels: usize) -> bool;
}

/// One row of the "prefer the sliding window" table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlideWindowRule {
    pub out_channels: usize,
    pub kernel_w: RangeInclusive<usize>,
    pub min_in_channels: usize,
}

impl SlideWindowRule {
    pub fn new(
        out_channels: usize,
        kernel_w: RangeInclusive<usize>,
        min_in_channels: usize,
    ) -> Self {
        Self {
            out_channels,
            kernel_w,
            min_in_channels,
        }
    }

    fn matches(&self, in_channels: usize, out_channels: usize, kernel_w: usize) -> bool {
        out_channels == self.out_channels
            && self.kernel_w.contains(&kernel_w)
            && in_channels >= self.min_in_channels
    }
}

/// Numeric cut-offs behind [`DefaultConvTuning`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvThresholds {
    pub neon_sgemm_1x1s1_min_channels: usize,
    pub neon_winograd_min_channels: usize,
    pub neon_winograd_max_extent: usize,
    pub neon_packed_3x3s2_min_output: usize,
    pub x86_winograd_min_channels: usize,
    /// Geometries for which the sliding window beats the batched matmul.
    pub slide_window_rules: Vec<SlideWindowRule>,
}

impl Default for ConvThresholds {
    fn default() -> Self {
        Self {
            neon_sgemm_1x1s1_min_channels: 64,
            neon_winograd_min_channels: 16,
            neon_winograd_max_extent: 120,
            neon_packed_3x3s2_min_output: 8,
            x86_winograd_min_channels: 16,
            slide_window_rules: vec![
                SlideWindowRule::new(1, 3..=3, 64),
                SlideWindowRule::new(1, 4..=4, 3),
                SlideWindowRule::new(1, 5..=usize::MAX, 0),
                SlideWindowRule::new(2, 5..=5, 64),
                SlideWindowRule::new(2, 6..=6, 32),
                SlideWindowRule::new(2, 7..=9, 16),
                SlideWindowRule::new(2, 10..=usize::MAX, 8),
            ],
        }
    }
}

/// Threshold table calibrated for common mobile and desktop cores.
#[derive(Debug, Clone, Default)]
pub struct DefaultConvTuning {
    thresholds: ConvThresholds,
}

impl DefaultConvTuning {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_thresholds(thresholds: ConvThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &ConvThresholds {
        &self.thresholds
    }
}

impl ConvTuning for DefaultConvTuning {
    fn neon_sgemm_1x1s1(&self, in_channels: usize, out_channels: usize) -> bool {
        let min = self.thresholds.neon_sgemm_1x1s1_min_channels;
        in_channels >= min && out_channels >= min
    }

    fn neon_winograd_3x3s1(
        &self,
        in_channels: usize,
        out_channels: usize,
        height: usize,
        width: usize,
    ) -> bool {
        let t = &self.thresholds;
        in_channels >= t.neon_winograd_min_channels
            && out_channels >= t.neon_winograd_min_channels
            && width <= t.neon_winograd_max_extent
            && height <= t.neon_winograd_max_extent
    }

    fn neon_packed_3x3s2(&self, output_height: usize, output_width: usize) -> bool {
        let min = self.thresholds.neon_packed_3x3s2_min_output;
        output_height >= min && output_width >= min
    }

    fn neon_prefer_sgemm(&self, in_channels: usize, out_channels: usize, kernel_w: usize) -> bool {
        !self
            .thresholds
            .slide_window_rules
            .iter()
            .any(|rule| rule.matches(in_channels, out_channels, kernel_w))
    }

    fn x86_winograd_3x3s1(&self, in_channels: usize, out_channels: usize) -> bool {
        let min = self.thresholds.x86_winograd_min_channels;
        in_channels >= min && out_channels >= min
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_output_channel_table() {
        let tuning = DefaultConvTuning::new();
        assert!(tuning.neon_prefer_sgemm(63, 1, 3));
        assert!(!tuning.neon_prefer_sgemm(64, 1, 3));
        assert!(tuning.neon_prefer_sgemm(2, 1, 4));
        assert!(!tuning.neon_prefer_sgemm(3, 1, 4));
        assert!(!tuning.neon_prefer_sgemm(1, 1, 5));
        assert!(!tuning.neon_prefer_sgemm(1, 1, 11));
        assert!(tuning.neon_prefer_sgemm(512, 1, 2));
    }

    #[test]
    fn two_output_channel_table() {
        let tuning = DefaultConvTuning::new();
        assert!(!tuning.neon_prefer_sgemm(64, 2, 5));
        assert!(tuning.neon_prefer_sgemm(63, 2, 5));
        assert!(!tuning.neon_prefer_sgemm(32, 2, 6));
        assert!(!tuning.neon_prefer_sgemm(16, 2, 9));
        assert!(tuning.neon_prefer_sgemm(15, 2, 7));
        assert!(!tuning.neon_prefer_sgemm(8, 2, 10));
        assert!(tuning.neon_prefer_sgemm(7, 2, 12));
        assert!(tuning.neon_prefer_sgemm(1024, 2, 4));
    }

    #[test]
    fn wider_outputs_always_prefer_sgemm() {
        let tuning = DefaultConvTuning::new();
        for kernel_w in 1..16 {
            assert!(tuning.neon_prefer_sgemm(1024, 3, kernel_w));
        }
    }

    #[test]
    fn thresholds_are_recalibratable() {
        let tuning = DefaultConvTuning::with_thresholds(ConvThresholds {
            neon_winograd_max_extent: 240,
            ..ConvThresholds::default()
        });
        assert!(tuning.neon_winograd_3x3s1(16, 16, 200, 200));
        assert!(!DefaultConvTuning::new().neon_winograd_3x3s1(16, 16, 200, 200));
    }
}
