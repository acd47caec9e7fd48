//! Image Size Gatekeeper Webhook
//!
//! A Kubernetes validating admission webhook that rejects Pods whose images
//! are larger than the limit configured for their namespace.
//!
//! # Overview
//!
//! The webhook handles:
//! - **Admission**: Decodes AdmissionReviews and decides Pods image by image
//! - **Credentials**: Reads registry auth from a Pod-named Secret or static config
//! - **Configuration**: Loads JSON/YAML config plus a mounted secrets directory,
//!   and swaps in a new snapshot when either changes
//! - **Serving**: axum router over TLS with a cap on in-flight admissions
//! - **Metrics**: Prometheus counters for decisions, lookups and reloads
//!
//! # Architecture
//!
//! ```text
//!   API server ──POST /validate──▶ ┌──────────────────────┐
//!                                  │  AdmissionHandler    │
//!                                  │  limit_for(ns)       │
//!                                  └──────────┬───────────┘
//!                      ┌──────────────────────┼──────────────────────┐
//!                      ▼                      ▼                      ▼
//!              ┌──────────────┐     ┌──────────────────┐    ┌────────────────┐
//!              │  ImageRef    │     │ CredentialResolver│    │  SizeResolver  │
//!              │  parse       │     │ Secret / static   │    │  registry v2   │
//!              └──────────────┘     └──────────────────┘    └────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use gatekeeper_webhook::{
//!     router, serve, shutdown_signal, AdmissionHandler, ConfigSource, CredentialResolver,
//!     ServerOptions, Snapshot, SnapshotHandle,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConfigSource::new("/etc/webhook/config/config.json").load()?;
//!     let state = Arc::new(SnapshotHandle::new(Snapshot::build(&config)?));
//!     let handler = AdmissionHandler::new(state, CredentialResolver::static_only());
//!
//!     let options = ServerOptions {
//!         addr: ([0, 0, 0, 0], config.port).into(),
//!         tls: Some((config.tls_cert_file.clone(), config.tls_key_file.clone())),
//!     };
//!     serve(router(handler, config.max_concurrent_requests), options, shutdown_signal()).await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
// Allow some pedantic lints that are too noisy for this crate
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::unused_async)]

pub mod admission;
pub mod credentials;
pub mod error;
pub mod loader;
pub mod metrics;
pub mod server;
pub mod state;

pub use admission::{
    into_review, pod_images, AdmissionHandler, DecodedRequest, CREDENTIALS_SECRET_ANNOTATION,
    ORIGINAL_REGISTRY_ANNOTATION,
};
pub use credentials::{
    CredentialResolver, KubeSecretStore, RequestCredentials, SecretStore, StaticSecretStore,
    AUTH_JSON_KEY,
};
pub use error::{Result, WebhookError};
pub use loader::{
    apply_secrets_dir, load_config_file, ConfigOverrides, ConfigSource, ConfigWatcher,
    DEFAULT_CONFIG_PATH, DEFAULT_SECRETS_DIR, DEFAULT_WATCH_INTERVAL,
};
pub use server::{router, serve, shutdown_signal, ServerOptions};
pub use state::{Snapshot, SnapshotHandle};
