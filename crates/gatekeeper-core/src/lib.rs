//! # Gatekeeper Core
//!
//! Core types for the image size admission gatekeeper.
//!
//! This crate holds everything the admission path needs that does not perform
//! I/O:
//!
//! - [`ImageRef`] - Canonical image reference parsed from a Pod spec string
//! - [`PolicySet`] - Namespace to size-limit lookup (exact before regex)
//! - [`CredentialStore`] - Static registry credentials with suffix matching
//! - [`RegistryRewrites`] - Mirror to upstream host rewrites
//! - [`ConfigSnapshot`] - Immutable structures compiled from [`GatekeeperConfig`]
//! - [`AdmissionVerdict`] - Outcome of evaluating one admission request
//!
//! ## Example
//!
//! ```rust
//! use gatekeeper_core::{ConfigSnapshot, GatekeeperConfig, ImageRef};
//!
//! let config = GatekeeperConfig::from_json(
//!     r#"{"namespaceRestrictions": {"prod": {"maxSizeMB": 500}}}"#,
//! ).unwrap();
//! let snapshot = ConfigSnapshot::compile(&config);
//!
//! let image: ImageRef = "nginx:1.21".parse().unwrap();
//! assert_eq!(image.to_string(), "docker.io/library/nginx:1.21");
//! assert!(snapshot.policies.limit_for("prod").is_some());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod credentials;
pub mod decision;
pub mod error;
pub mod policy;
pub mod reference;
pub mod rewrite;
pub mod size;


pub use config::{ConfigSnapshot, GatekeeperConfig, NamespaceRestriction, SizeResolverKind};
pub use credentials::{BasicAuth, Credential, CredentialStore};
pub use decision::AdmissionVerdict;
pub use error::{Error, ReferenceError, Result};
pub use policy::{NamespaceMatcher, NamespacePolicy, PolicySet};
pub use reference::{ImageRef, Reference, DEFAULT_REGISTRY, DEFAULT_TAG};
pub use rewrite::{RegistryRewrite, RegistryRewrites, DOCKER_HUB_ENDPOINT};
pub use size::{format_mb, ImageSize};
