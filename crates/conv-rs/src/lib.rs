//! Convolution execution planner.
//!
//! Given an input, a weight, and convolution options, the planner normalizes the parameters,
//! validates shapes, picks an algorithm variant for the target ISA, splits grouped work, and
//! dispatches each piece to a [`ConvKernels`] implementation.
//!
//! ```ignore
//! let kernels = conv_rs::registry::create_kernels("cpu").expect("cpu kernels registered");
//! let options = ConvOptions::new().stride([2]).padding([1]);
//! let output = conv_rs::convolution(&*kernels, &ConvOperands::new(&input, &weight), &options)?;
//! ```

pub mod backend;
mod env;
pub mod error;
pub mod execute;
pub mod group;
pub mod im2col;
pub mod kernels;
pub mod params;
pub mod planner;
pub mod profiling;
pub mod registry;
pub mod tensor;
pub mod validate;

pub use backend::{
    select_conv_backend, ConvBackend, ConvThresholds, ConvTuning, DefaultConvTuning,
    IsaCapability,
};
pub use error::{ConvError, ConvErrorKind, ConvResult};
pub use kernels::{
    Conv2dArgs, ConvKernels, DepthwiseVariant, QuantScales, SgemmVariant, SlideWinVariant,
    WinogradVariant,
};
pub use params::{ConvOptions, ConvParams};
pub use planner::{convolution, ConvOperands, ConvPlan, ConvPlanner};
pub use tensor::{DType, Device, Shape, Tensor};
