//! Error types for gatekeeper core operations.
//!
//! This module defines the error types used throughout the `gatekeeper-core` crate.

use thiserror::Error;

/// Result type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in gatekeeper core operations.
#[derive(Error, Debug)]
pub enum Error {
    /// An image reference could not be parsed.
    #[error(transparent)]
    InvalidReference(#[from] ReferenceError),

    /// A namespace pattern is not a valid regular expression.
    #[error("Invalid namespace pattern '{pattern}': {source}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// Underlying regex compilation error.
        #[source]
        source: regex::Error,
    },

    /// Configuration document is structurally invalid.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Reason the configuration is invalid.
        reason: String,
    },

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Errors produced by the image reference parser.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReferenceError {
    /// The image string was empty.
    #[error("image reference is empty")]
    Empty,

    /// The image string carried both a tag and a digest.
    #[error("image reference '{reference}' has both a tag and a digest")]
    TagAndDigest {
        /// The full image string.
        reference: String,
    },

    /// The tag does not match the reference grammar.
    #[error("image reference '{reference}' has an invalid tag '{tag}'")]
    InvalidTag {
        /// The full image string.
        reference: String,
        /// The offending tag.
        tag: String,
    },

    /// The digest does not match the reference grammar.
    #[error("image reference '{reference}' has an invalid digest '{digest}'")]
    InvalidDigest {
        /// The full image string.
        reference: String,
        /// The offending digest.
        digest: String,
    },

    /// The registry host is malformed.
    #[error("image reference '{reference}' has an invalid registry host '{registry}'")]
    InvalidRegistry {
        /// The full image string.
        reference: String,
        /// The offending host.
        registry: String,
    },

    /// The repository path is malformed.
    #[error("image reference '{reference}' has an invalid repository '{repository}'")]
    InvalidRepository {
        /// The full image string.
        reference: String,
        /// The offending repository path.
        repository: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_invalid_config() {
        let err = Error::InvalidConfig {
            reason: "port out of range".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid configuration: port out of range");
    }

    #[test]
    fn test_reference_error_is_transparent() {
        let err: Error = ReferenceError::Empty.into();
        assert_eq!(err.to_string(), "image reference is empty");
    }

    #[test]
    fn test_reference_error_display_tag_and_digest() {
        let err = ReferenceError::TagAndDigest {
            reference: "nginx:1.21@sha256:abc".to_string(),
        };
        assert!(err.to_string().contains("both a tag and a digest"));
    }
}
