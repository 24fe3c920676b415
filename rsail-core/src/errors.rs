use thiserror::Error;

/// Error type for invalid operations.
#[derive(Error, Debug)]
pub enum RSAILError {
    #[error("{0}")]
    Error(String),
    #[error("Unknown parameter name: {0}")]
    UnknownParameter(String),
    #[error("Shape mismatch in {context}. Expected {expected}, got {actual}")]
    ShapeMismatch {
        context: String,
        expected: String,
        actual: String,
    },
    #[error("Geometry {angle} has {len} values but the batch has {n_samples} samples. Use a scalar or one value per sample.")]
    GeometryMismatch {
        angle: String,
        len: usize,
        n_samples: usize,
    },
    #[error("Canopy simulator failed: {0}")]
    Simulator(String),
    #[error("Surrogate prediction failed: {0}")]
    Surrogate(String),
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl RSAILError {
    pub(crate) fn shape(
        context: &str,
        expected: impl std::fmt::Display,
        actual: impl std::fmt::Display,
    ) -> Self {
        RSAILError::ShapeMismatch {
            context: context.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

/// Convenience type for `Result<T, RSAILError>`.
pub type RSAILResult<T> = Result<T, RSAILError>;
