use thiserror::Error;

/// The error type for Swin Transformer construction and forward passes.
///
/// Configuration problems are reported by `init`; shape problems are reported by the
/// first forward call that sees concrete spatial dimensions. Neither is ever
/// corrected by implicit padding or truncation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SwinError {
    /// An input tensor violates a divisibility or size invariant.
    #[error("Invalid tensor shape: expected {expected}, got {actual}")]
    Shape {
        /// What the operation required.
        expected: String,
        /// What it received.
        actual: String,
    },

    /// The model configuration is logically inconsistent.
    #[error("Invalid model configuration: {reason}")]
    Configuration {
        /// Why the configuration was rejected.
        reason: String,
    },
}

impl SwinError {
    pub(crate) fn shape(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::Shape {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub(crate) fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }
}

/// A specialized `Result` type for Swin Transformer operations.
pub type SwinResult<T> = Result<T, SwinError>;
