use std::env;
use std::sync::OnceLock;

use crate::backend::isa::IsaCapability;

static CONVRS_ISA: OnceLock<Option<IsaCapability>> = OnceLock::new();

/// Parses a `CONVRS_ISA` value. `auto` and the empty string defer to detection.
pub(crate) fn parse_isa(value: &str) -> Result<Option<IsaCapability>, String> {
    let normalized = value.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "" | "auto" => Ok(None),
        "neon" | "arm" | "aarch64" => Ok(Some(IsaCapability::NEON)),
        "x86" | "sse" | "x86_64" => Ok(Some(IsaCapability::X86)),
        "none" | "off" | "portable" => Ok(Some(IsaCapability::NONE)),
        other => Err(format!("unrecognised CONVRS_ISA value {other:?}")),
    }
}

/// Capability forced through `CONVRS_ISA`, read once per process.
pub(crate) fn isa_override() -> Option<IsaCapability> {
    *CONVRS_ISA.get_or_init(|| match env::var("CONVRS_ISA") {
        Ok(value) => match parse_isa(&value) {
            Ok(isa) => isa,
            Err(message) => {
                tracing::warn!(%message, "ignoring ISA override");
                None
            }
        },
        Err(_) => None,
    })
}
