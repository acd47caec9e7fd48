//! # Gatekeeper Registry
//!
//! Image size resolution against OCI / Docker registry v2 APIs.
//!
//! This crate answers one question for the admission path: how large is the
//! image a Pod refers to? Two [`SizeResolver`] implementations are provided:
//!
//! - [`RegistryClient`] speaks the registry HTTP API directly: manifest fetch,
//!   bearer-token or basic challenge handshake, manifest list resolution.
//! - [`SkopeoResolver`] runs `skopeo inspect` and reads its layer data.
//!
//! Every failure is an [`RegistryError`] whose [`RegistryError::kind`] maps
//! onto the four-way [`ResolveErrorKind`] used in admission messages.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gatekeeper_core::ImageRef;
//! use gatekeeper_registry::{RegistryClient, RegistryClientConfig, SizeResolver};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = RegistryClient::new(RegistryClientConfig::new())?;
//!     let image: ImageRef = "nginx:1.21".parse()?;
//!
//!     let size = client.size_of(&image, None).await?;
//!     println!("{} bytes", size.size_bytes);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   dyn SizeResolver                          │
//! │  ┌──────────────────────────┐  ┌─────────────────────────┐  │
//! │  │     RegistryClient       │  │     SkopeoResolver      │  │
//! │  │ (manifest + challenge)   │  │  (skopeo inspect)       │  │
//! │  └──────────────────────────┘  └─────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Image Registry                             │
//! │     (Docker Hub, GHCR, Harbor, ECR, GCR, etc.)              │
//! └─────────────────────────────────────────────────────────────┘
//! ```

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod auth;
mod client;
mod config;
mod error;
mod oci;
mod resolver;
mod skopeo;

pub use auth::{basic_authorization, Challenge, TokenResponse};
pub use client::RegistryClient;
pub use config::RegistryClientConfig;
pub use error::{RegistryError, ResolveErrorKind};
pub use oci::{Descriptor, ImageIndex, Manifest, ManifestDocument, MediaType, Platform};
pub use resolver::{build_resolver, SizeResolver};
pub use skopeo::SkopeoResolver;
