//! Backend variants and the selection heuristics that choose between them.

pub mod isa;
mod select;
pub mod tuning;
mod variant;

pub use isa::IsaCapability;
pub use select::select_conv_backend;
pub use tuning::{ConvThresholds, ConvTuning, DefaultConvTuning, SlideWindowRule};
pub use variant::ConvBackend;
