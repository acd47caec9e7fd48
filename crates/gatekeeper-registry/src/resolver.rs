//! Pluggable size resolution.

use std::sync::Arc;

use async_trait::async_trait;
use gatekeeper_core::{ConfigSnapshot, Credential, ImageRef, ImageSize, SizeResolverKind};

use crate::client::RegistryClient;
use crate::config::RegistryClientConfig;
use crate::error::RegistryError;
use crate::skopeo::SkopeoResolver;

/// Resolves the size of an image.
#[async_trait]
pub trait SizeResolver: Send + Sync {
    /// Looks up the size of `image`, authenticating with `credential` if given.
    async fn size_of(
        &self,
        image: &ImageRef,
        credential: Option<&Credential>,
    ) -> Result<ImageSize, RegistryError>;

    /// Short name of the implementation, for logs.
    fn name(&self) -> &'static str;

    /// Returns where lookups for `registry` are sent.
    fn endpoint(&self, registry: &str) -> String {
        registry.to_string()
    }
}

/// Builds the resolver selected by a snapshot.
///
/// # Errors
///
/// Returns an error if the HTTP client cannot be built.
pub fn build_resolver(snapshot: &ConfigSnapshot) -> Result<Arc<dyn SizeResolver>, RegistryError> {
    let config = RegistryClientConfig::from_snapshot(snapshot);
    Ok(match snapshot.size_resolver {
        SizeResolverKind::Direct => Arc::new(RegistryClient::new(config)?),
        SizeResolverKind::Skopeo => Arc::new(SkopeoResolver::new(config)),
    })
}
