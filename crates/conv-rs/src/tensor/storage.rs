//! Defines the scalar element trait used by the generic column transform.

use std::ops::{Add, Mul};

/// Numeric behaviour required by the element-generic routines in this crate.
pub trait StorageElement:
    Copy + Default + Send + Sync + PartialEq + Add<Output = Self> + Mul<Output = Self>
{
    /// Returns the additive identity for the element type.
    fn zero() -> Self;
    /// Converts the element into a 32-bit float for interoperability.
    fn to_f32(self) -> f32;
}

impl StorageElement for f32 {
    fn zero() -> Self {
        0.0
    }

    fn to_f32(self) -> f32 {
        self
    }
}

impl StorageElement for f64 {
    fn zero() -> Self {
        0.0
    }

    fn to_f32(self) -> f32 {
        self as f32
    }
}

impl StorageElement for i32 {
    fn zero() -> Self {
        0
    }

    fn to_f32(self) -> f32 {
        self as f32
    }
}

impl StorageElement for i8 {
    fn zero() -> Self {
        0
    }

    fn to_f32(self) -> f32 {
        f32::from(self)
    }
}
