//! Error types for the docship system.

use thiserror::Error;

/// Unified error type for shared docship operations.
#[derive(Debug, Error)]
pub enum DocshipError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid input error
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DocshipError::Config("bad url".to_string());
        assert_eq!(err.to_string(), "Configuration error: bad url");

        let err = DocshipError::InvalidInput("fields must be an object".to_string());
        assert_eq!(err.to_string(), "Invalid input: fields must be an object");
    }

    #[test]
    fn test_from_serde_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: DocshipError = json_err.into();
        assert!(matches!(err, DocshipError::Serialization(_)));
    }
}
