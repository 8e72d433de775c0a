//! Tensor container used at the planner's boundaries.

pub mod dtype;
pub mod host_tensor;
pub mod shape;
pub mod storage;

pub use dtype::{DType, Device};
pub use host_tensor::{Tensor, TensorData};
pub use shape::Shape;
pub use storage::StorageElement;
