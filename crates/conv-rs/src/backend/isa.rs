//! Vector instruction-set capability consulted by the backend selector.

use std::sync::OnceLock;

/// Process-wide description of the vector instruction classes the kernels may use.
///
/// The selector consults `neon` before `x86`; when neither is set it falls back to the portable
/// direct path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct IsaCapability {
    pub neon: bool,
    pub x86: bool,
}

impl IsaCapability {
    pub const NONE: IsaCapability = IsaCapability {
        neon: false,
        x86: false,
    };
    pub const NEON: IsaCapability = IsaCapability {
        neon: true,
        x86: false,
    };
    pub const X86: IsaCapability = IsaCapability {
        neon: false,
        x86: true,
    };

    pub fn supports_neon(self) -> bool {
        self.neon
    }

    pub fn supports_x86(self) -> bool {
        self.x86
    }

    /// Capability of the running process, resolved once.
    ///
    /// `CONVRS_ISA` (`neon`, `x86`, `none`, `auto`) overrides detection.
    pub fn detect() -> IsaCapability {
        static DETECTED: OnceLock<IsaCapability> = OnceLock::new();
        *DETECTED.get_or_init(|| {
            let isa = crate::env::isa_override().unwrap_or_else(Self::from_target);
            tracing::debug!(neon = isa.neon, x86 = isa.x86, "resolved ISA capability");
            isa
        })
    }

    fn from_target() -> IsaCapability {
        #[cfg(target_arch = "aarch64")]
        {
            IsaCapability {
                neon: std::arch::is_aarch64_feature_detected!("neon"),
                x86: false,
            }
        }
        #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
        {
            IsaCapability {
                neon: false,
                x86: std::arch::is_x86_feature_detected!("sse2"),
            }
        }
        #[cfg(not(any(target_arch = "aarch64", target_arch = "x86", target_arch = "x86_64")))]
        {
            IsaCapability::NONE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detection_is_stable() {
        assert_eq!(IsaCapability::detect(), IsaCapability::detect());
    }
}
