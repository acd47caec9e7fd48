//! Error types for registry operations.

use std::fmt;

use thiserror::Error;

/// Coarse classification of a size lookup failure.
///
/// Admission messages and metrics report this kind rather than the detailed
/// error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolveErrorKind {
    /// The manifest does not exist.
    NotFound,
    /// The registry refused the (possibly absent) credentials.
    Unauthorized,
    /// The registry answered with something that does not follow the protocol.
    ProtocolError,
    /// The registry could not be reached in time.
    Transport,
}

impl ResolveErrorKind {
    /// Returns the snake-case label used for metrics.
    #[must_use]
    pub const fn as_label(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Unauthorized => "unauthorized",
            Self::ProtocolError => "protocol_error",
            Self::Transport => "transport",
        }
    }
}

impl fmt::Display for ResolveErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotFound => "NotFound",
            Self::Unauthorized => "Unauthorized",
            Self::ProtocolError => "ProtocolError",
            Self::Transport => "Transport",
        };
        f.write_str(name)
    }
}

/// Errors that can occur while resolving an image size.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Manifest not found in registry.
    #[error("Manifest not found: {image}")]
    NotFound {
        /// Image reference that was looked up.
        image: String,
    },

    /// Registry rejected the request.
    #[error("Unauthorized by {registry}: {message}")]
    Unauthorized {
        /// Registry host.
        registry: String,
        /// Error message.
        message: String,
    },

    /// `Www-Authenticate` header is missing or malformed.
    #[error("Invalid authentication challenge: {message}")]
    InvalidChallenge {
        /// Error message.
        message: String,
    },

    /// Token endpoint answered without a usable token.
    #[error("Token endpoint {realm} returned no token")]
    MissingToken {
        /// Token endpoint URL.
        realm: String,
    },

    /// Manifest body could not be interpreted.
    #[error("Invalid manifest for {image}: {message}")]
    InvalidManifest {
        /// Image reference that was looked up.
        image: String,
        /// Error message.
        message: String,
    },

    /// Unexpected HTTP status from registry.
    #[error("HTTP error from registry: {status} - {message}")]
    HttpError {
        /// HTTP status code.
        status: u16,
        /// Error message.
        message: String,
    },

    /// Failed to connect to registry.
    #[error("Failed to connect to registry at {url}: {source}")]
    ConnectionFailed {
        /// Registry URL.
        url: String,
        /// Underlying error.
        #[source]
        source: reqwest::Error,
    },

    /// Request did not complete within its deadline.
    #[error("Request to {target} timed out")]
    Timeout {
        /// URL or command that timed out.
        target: String,
    },

    /// JSON deserialization error.
    #[error("JSON error: {source}")]
    JsonError {
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// Invalid URL.
    #[error("Invalid URL: {url}")]
    InvalidUrl {
        /// URL string.
        url: String,
    },

    /// HTTP client could not be built.
    #[error("Failed to build HTTP client: {source}")]
    ClientBuild {
        /// Underlying error.
        #[source]
        source: reqwest::Error,
    },

    /// External tool could not be started.
    #[error("Failed to run {program}: {source}")]
    ToolSpawn {
        /// Program name.
        program: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// External tool exited unsuccessfully.
    #[error("{program} failed: {message}")]
    ToolFailed {
        /// Program name.
        program: String,
        /// Error output.
        message: String,
    },
}

impl RegistryError {
    /// Classifies the error for admission messages and metrics.
    #[must_use]
    pub const fn kind(&self) -> ResolveErrorKind {
        match self {
            Self::NotFound { .. } => ResolveErrorKind::NotFound,
            Self::Unauthorized { .. } => ResolveErrorKind::Unauthorized,
            Self::InvalidChallenge { .. }
            | Self::MissingToken { .. }
            | Self::InvalidManifest { .. }
            | Self::HttpError { .. }
            | Self::JsonError { .. }
            | Self::InvalidUrl { .. }
            | Self::ToolFailed { .. } => ResolveErrorKind::ProtocolError,
            Self::ConnectionFailed { .. }
            | Self::Timeout { .. }
            | Self::ClientBuild { .. }
            | Self::ToolSpawn { .. } => ResolveErrorKind::Transport,
        }
    }
}

impl From<reqwest::Error> for RegistryError {
    fn from(err: reqwest::Error) -> Self {
        let url = err
            .url()
            .map_or_else(|| "unknown".to_string(), ToString::to_string);
        if err.is_timeout() {
            Self::Timeout { target: url }
        } else if err.is_decode() {
            Self::HttpError {
                status: 0,
                message: err.to_string(),
            }
        } else if err.is_status() {
            let status = err.status().map_or(0, |s| s.as_u16());
            Self::HttpError {
                status,
                message: err.to_string(),
            }
        } else {
            Self::ConnectionFailed { url, source: err }
        }
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonError { source: err }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_not_found() {
        let err = RegistryError::NotFound {
            image: "docker.io/library/nginx:1.21".to_string(),
        };
        assert_eq!(err.to_string(), "Manifest not found: docker.io/library/nginx:1.21");
        assert_eq!(err.kind(), ResolveErrorKind::NotFound);
    }

    #[test]
    fn test_kind_classification() {
        let unauthorized = RegistryError::Unauthorized {
            registry: "ghcr.io".to_string(),
            message: "403 Forbidden".to_string(),
        };
        assert_eq!(unauthorized.kind(), ResolveErrorKind::Unauthorized);

        let status = RegistryError::HttpError {
            status: 500,
            message: "boom".to_string(),
        };
        assert_eq!(status.kind(), ResolveErrorKind::ProtocolError);

        let timeout = RegistryError::Timeout {
            target: "https://ghcr.io/v2/".to_string(),
        };
        assert_eq!(timeout.kind(), ResolveErrorKind::Transport);
    }

    #[test]
    fn test_json_error_is_protocol() {
        let err: RegistryError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert_eq!(err.kind(), ResolveErrorKind::ProtocolError);
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(ResolveErrorKind::NotFound.to_string(), "NotFound");
        assert_eq!(ResolveErrorKind::ProtocolError.as_label(), "protocol_error");
        assert_eq!(ResolveErrorKind::Transport.as_label(), "transport");
    }
}
