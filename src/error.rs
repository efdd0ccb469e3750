use std::error::Error;
use std::fmt;

#[derive(Debug)]
pub enum NNError {
    // Configuration errors, raised before any computation starts
    InvalidConfiguration(String),

    // A storage-kind or loss/activation pairing without a kernel
    NotImplemented(String),

    // NaN predictions, infinite biases
    NumericalInstability(String),

    // Shape related errors
    LayerShapeMismatch(String),
    InvalidInputShape(String),
    InvalidTarget(String),

    // Configuration files
    IoError(std::io::Error),
    SerializationError(serde_json::Error),
}

impl fmt::Display for NNError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            NNError::InvalidConfiguration(msg) => write!(f, "Invalid configuration: {}", msg),
            NNError::NotImplemented(msg) => write!(f, "Not implemented: {}", msg),
            NNError::NumericalInstability(msg) => write!(f, "Numerical instability: {}", msg),
            NNError::LayerShapeMismatch(msg) => write!(f, "Layer shape mismatch: {}", msg),
            NNError::InvalidInputShape(msg) => write!(f, "Invalid input shape: {}", msg),
            NNError::InvalidTarget(msg) => write!(f, "Invalid target: {}", msg),
            NNError::IoError(err) => write!(f, "I/O error: {}", err),
            NNError::SerializationError(err) => write!(f, "Serialization error: {}", err),
        }
    }
}

impl From<std::io::Error> for NNError {
    fn from(err: std::io::Error) -> NNError {
        NNError::IoError(err)
    }
}

impl From<serde_json::Error> for NNError {
    fn from(err: serde_json::Error) -> NNError {
        NNError::SerializationError(err)
    }
}

impl Error for NNError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            NNError::IoError(err) => Some(err),
            NNError::SerializationError(err) => Some(err),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, NNError>;

/// Shorthand for the "no kernel for this combination" failure.
pub(crate) fn unimplemented_combination(what: &str, lhs: &str, rhs: &str) -> NNError {
    NNError::NotImplemented(format!("{} for {} and {} not yet implemented", what, lhs, rhs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_mentions_combination() {
        let err = unimplemented_combination("gemv", "SparseRowMatrix", "DenseVector");
        assert_eq!(
            err.to_string(),
            "Not implemented: gemv for SparseRowMatrix and DenseVector not yet implemented"
        );
    }

    #[test]
    fn test_json_error_converts() {
        let parse: std::result::Result<u32, _> = serde_json::from_str("{");
        let err: NNError = parse.unwrap_err().into();
        assert!(matches!(err, NNError::SerializationError(_)));
        assert!(err.source().is_some());
    }
}
