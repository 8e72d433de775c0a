//! Error types shared by the planner, the kernel contract, and the tensor container.

use thiserror::Error;

/// Stable discriminant of a [`ConvError`], convenient for matching in callers and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConvErrorKind {
    InvalidParameter,
    Shape,
    ShapeMismatch,
    KernelTooLarge,
    UnsupportedConfiguration,
    Kernel,
}

impl ConvErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ConvErrorKind::InvalidParameter => "invalid_parameter",
            ConvErrorKind::Shape => "shape",
            ConvErrorKind::ShapeMismatch => "shape_mismatch",
            ConvErrorKind::KernelTooLarge => "kernel_too_large",
            ConvErrorKind::UnsupportedConfiguration => "unsupported_configuration",
            ConvErrorKind::Kernel => "kernel",
        }
    }
}

/// Failure raised while planning or executing a convolution.
///
/// Every variant is raised synchronously at the point of detection and is never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConvError {
    /// Malformed stride, padding, output padding, dilation, or group count.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    /// A short-form parameter list or weight rank that cannot be expanded.
    #[error("shape error: {0}")]
    Shape(String),
    /// Rank, channel, bias, or buffer-length mismatch between operands.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),
    /// The dilated kernel does not fit inside the padded input along some spatial axis.
    #[error(
        "calculated padded input size per channel ({padded}) is smaller than kernel size ({effective})"
    )]
    KernelTooLarge { padded: String, effective: String },
    /// Device, dtype, or geometry combination with no backend to serve it.
    #[error("unsupported configuration: {0}")]
    UnsupportedConfiguration(String),
    /// A leaf kernel rejected its arguments or failed while computing.
    #[error("kernel {kernel} failed: {message}")]
    Kernel {
        kernel: &'static str,
        message: String,
    },
}

impl ConvError {
    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        ConvError::InvalidParameter(message.into())
    }

    pub fn shape(message: impl Into<String>) -> Self {
        ConvError::Shape(message.into())
    }

    pub fn shape_mismatch(message: impl Into<String>) -> Self {
        ConvError::ShapeMismatch(message.into())
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        ConvError::UnsupportedConfiguration(message.into())
    }

    pub fn kernel(kernel: &'static str, message: impl Into<String>) -> Self {
        ConvError::Kernel {
            kernel,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ConvErrorKind {
        match self {
            ConvError::InvalidParameter(_) => ConvErrorKind::InvalidParameter,
            ConvError::Shape(_) => ConvErrorKind::Shape,
            ConvError::ShapeMismatch(_) => ConvErrorKind::ShapeMismatch,
            ConvError::KernelTooLarge { .. } => ConvErrorKind::KernelTooLarge,
            ConvError::UnsupportedConfiguration(_) => ConvErrorKind::UnsupportedConfiguration,
            ConvError::Kernel { .. } => ConvErrorKind::Kernel,
        }
    }
}

pub type ConvResult<T> = Result<T, ConvError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_too_large_message_lists_both_extents() {
        let err = ConvError::KernelTooLarge {
            padded: "(2 x 2)".to_string(),
            effective: "(3 x 3)".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("(2 x 2)"));
        assert!(text.contains("(3 x 3)"));
        assert_eq!(err.kind(), ConvErrorKind::KernelTooLarge);
    }

    #[test]
    fn kind_labels_are_distinct() {
        let kinds = [
            ConvErrorKind::InvalidParameter,
            ConvErrorKind::Shape,
            ConvErrorKind::ShapeMismatch,
            ConvErrorKind::KernelTooLarge,
            ConvErrorKind::UnsupportedConfiguration,
            ConvErrorKind::Kernel,
        ];
        let mut labels: Vec<_> = kinds.iter().map(|k| k.as_str()).collect();
        labels.sort_unstable();
        labels.dedup();
        assert_eq!(labels.len(), kinds.len());
    }
}
