//! Scalar element types understood by the planner.

use std::fmt;

/// Element type of a tensor payload.
///
/// Quantized tensors store raw `I8` values; their scales travel as separate `F32` tensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    F32,
    I8,
}

impl DType {
    /// Returns the size of a single element in bytes.
    pub fn size_in_bytes(self) -> usize {
        match self {
            DType::F32 => 4,
            DType::I8 => 1,
        }
    }

    /// Whether values of this type are quantized integers.
    pub fn is_quantized(self) -> bool {
        matches!(self, DType::I8)
    }

    pub fn tag(self) -> &'static str {
        match self {
            DType::F32 => "f32",
            DType::I8 => "i8",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "f32" => Some(DType::F32),
            "i8" => Some(DType::I8),
            _ => None,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Where a tensor's payload logically lives.
///
/// Only `Cpu` tensors are planned by this crate; anything else is routed to the
/// kernel set's device override untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Device {
    #[default]
    Cpu,
    External(String),
}

impl Device {
    pub fn is_cpu(&self) -> bool {
        matches!(self, Device::Cpu)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => f.write_str("cpu"),
            Device::External(name) => f.write_str(name),
        }
    }
}
