use std::fmt;

/// Closed set of convolution algorithms the planner can dispatch to.
///
/// Suffixes read `K{kernel}S{stride}`, so `DepthwiseNeonK3S2` is the Neon depthwise kernel for
/// 3x3 windows with stride 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConvBackend {
    /// Non-CPU tensors: the kernel set's device override handles everything.
    Overrideable,
    SlideWin2dInt8,
    SlowTranspose2d,
    Transpose2dNeonK4S2,
    SlowDilated2d,
    DepthwiseNeonK3S1,
    DepthwiseNeonK3S2,
    DepthwiseNeonK5S1,
    DepthwiseNeonK5S2,
    Sgemm2dNeonK1S1,
    SlideWin2dNeonK1S1,
    Sgemm2dNeonK1S2,
    WinogradNeonK3S1,
    SlideWin2dNeonK3S1,
    Packed2dNeonK3S2,
    Sgemm2dNeon,
    SlideWin2d,
    DepthwiseX86K3S1,
    DepthwiseX86K3S2,
    WinogradX86K3S1,
    Sgemm2dX86,
    Slow2d,
}

impl ConvBackend {
    pub const ALL: [ConvBackend; 22] = [
        ConvBackend::Overrideable,
        ConvBackend::SlideWin2dInt8,
        ConvBackend::SlowTranspose2d,
        ConvBackend::Transpose2dNeonK4S2,
        ConvBackend::SlowDilated2d,
        ConvBackend::DepthwiseNeonK3S1,
        ConvBackend::DepthwiseNeonK3S2,
        ConvBackend::DepthwiseNeonK5S1,
        ConvBackend::DepthwiseNeonK5S2,
        ConvBackend::Sgemm2dNeonK1S1,
        ConvBackend::SlideWin2dNeonK1S1,
        ConvBackend::Sgemm2dNeonK1S2,
        ConvBackend::WinogradNeonK3S1,
        ConvBackend::SlideWin2dNeonK3S1,
        ConvBackend::Packed2dNeonK3S2,
        ConvBackend::Sgemm2dNeon,
        ConvBackend::SlideWin2d,
        ConvBackend::DepthwiseX86K3S1,
        ConvBackend::DepthwiseX86K3S2,
        ConvBackend::WinogradX86K3S1,
        ConvBackend::Sgemm2dX86,
        ConvBackend::Slow2d,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ConvBackend::Overrideable => "overrideable",
            ConvBackend::SlideWin2dInt8 => "slide_win_2d_int8",
            ConvBackend::SlowTranspose2d => "slow_transpose_2d",
            ConvBackend::Transpose2dNeonK4S2 => "transpose_2d_neon_4x4s2",
            ConvBackend::SlowDilated2d => "slow_dilated_2d",
            ConvBackend::DepthwiseNeonK3S1 => "depthwise_neon_3x3s1",
            ConvBackend::DepthwiseNeonK3S2 => "depthwise_neon_3x3s2",
            ConvBackend::DepthwiseNeonK5S1 => "depthwise_neon_5x5s1",
            ConvBackend::DepthwiseNeonK5S2 => "depthwise_neon_5x5s2",
            ConvBackend::Sgemm2dNeonK1S1 => "sgemm_2d_neon_1x1s1",
            ConvBackend::SlideWin2dNeonK1S1 => "slide_win_2d_neon_1x1s1",
            ConvBackend::Sgemm2dNeonK1S2 => "sgemm_2d_neon_1x1s2",
            ConvBackend::WinogradNeonK3S1 => "winograd_neon_3x3s1",
            ConvBackend::SlideWin2dNeonK3S1 => "slide_win_2d_neon_3x3s1",
            ConvBackend::Packed2dNeonK3S2 => "packed_2d_neon_3x3s2",
            ConvBackend::Sgemm2dNeon => "sgemm_2d_neon",
            ConvBackend::SlideWin2d => "slide_win_2d",
            ConvBackend::DepthwiseX86K3S1 => "depthwise_x86_3x3s1",
            ConvBackend::DepthwiseX86K3S2 => "depthwise_x86_3x3s2",
            ConvBackend::WinogradX86K3S1 => "winograd_x86_3x3s1",
            ConvBackend::Sgemm2dX86 => "sgemm_2d_x86",
            ConvBackend::Slow2d => "slow_2d",
        }
    }

    /// Variants whose kernels consume the whole grouped tensor in one call instead of being
    /// split per group.
    pub fn handles_groups(self) -> bool {
        matches!(
            self,
            ConvBackend::Overrideable
                | ConvBackend::DepthwiseNeonK3S1
                | ConvBackend::DepthwiseNeonK3S2
                | ConvBackend::DepthwiseNeonK5S1
                | ConvBackend::DepthwiseNeonK5S2
                | ConvBackend::DepthwiseX86K3S1
                | ConvBackend::DepthwiseX86K3S2
        )
    }

    pub fn is_transposed(self) -> bool {
        matches!(
            self,
            ConvBackend::SlowTranspose2d | ConvBackend::Transpose2dNeonK4S2
        )
    }
}

impl fmt::Display for ConvBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn names_are_unique() {
        let names: HashSet<_> = ConvBackend::ALL.iter().map(|b| b.name()).collect();
        assert_eq!(names.len(), ConvBackend::ALL.len());
    }
}
