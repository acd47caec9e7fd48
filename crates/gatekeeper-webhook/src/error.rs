//! Error types for the webhook crate.
//!
//! Admission evaluation itself never fails: policy and registry problems
//! become deny verdicts. These errors cover loading configuration, talking to
//! the Kubernetes API and running the server.

use thiserror::Error;

/// Result type alias for webhook operations.
pub type Result<T> = std::result::Result<T, WebhookError>;

/// Errors that can occur while loading configuration or serving admissions.
#[derive(Error, Debug)]
pub enum WebhookError {
    /// The configuration file could not be read.
    #[error("cannot read config file '{path}': {source}")]
    ConfigRead {
        /// Path of the configuration file.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The configuration file could not be parsed.
    #[error("cannot parse config file '{path}': {reason}")]
    ConfigParse {
        /// Path of the configuration file.
        path: String,
        /// Parser message.
        reason: String,
    },

    /// The configuration parsed but is not usable.
    #[error(transparent)]
    Config(#[from] gatekeeper_core::Error),

    /// A file in the secrets directory is malformed.
    #[error("invalid secret file '{path}': {reason}")]
    SecretFile {
        /// Path of the offending file.
        path: String,
        /// Reason for invalidity.
        reason: String,
    },

    /// The size resolver could not be built.
    #[error("cannot build size resolver: {0}")]
    Resolver(#[from] gatekeeper_registry::RegistryError),

    /// A Kubernetes Secret could not be fetched.
    #[error("cannot fetch secret '{namespace}/{name}': {reason}")]
    SecretFetch {
        /// Namespace of the Secret.
        namespace: String,
        /// Name of the Secret.
        name: String,
        /// Failure reason.
        reason: String,
    },

    /// TLS material could not be loaded.
    #[error("cannot load TLS certificate '{cert}' and key '{key}': {reason}")]
    Tls {
        /// Certificate path.
        cert: String,
        /// Private key path.
        key: String,
        /// Failure reason.
        reason: String,
    },

    /// The server failed to bind or stopped with an error.
    #[error("server error on {addr}: {source}")]
    Server {
        /// Listen address.
        addr: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Metrics could not be registered or encoded.
    #[error("metrics error: {reason}")]
    Metrics {
        /// Failure reason.
        reason: String,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<prometheus::Error> for WebhookError {
    fn from(err: prometheus::Error) -> Self {
        Self::Metrics {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = WebhookError::SecretFetch {
            namespace: "prod".to_string(),
            name: "pull-creds".to_string(),
            reason: "forbidden".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "cannot fetch secret 'prod/pull-creds': forbidden"
        );
    }

    #[test]
    fn test_config_error_is_transparent() {
        let err = WebhookError::from(gatekeeper_core::Error::InvalidConfig {
            reason: "port must be set".to_string(),
        });
        assert!(err.to_string().contains("port must be set"));
    }
}
