//! Registry host rewrites.
//!
//! Operators often pull through a mirror whose host differs from the one
//! written in Pod specs. A rewrite redirects HTTP traffic for a user-facing
//! host to the registry that actually serves it.

use serde::{Deserialize, Serialize};

use crate::reference::DEFAULT_REGISTRY;

/// API endpoint for the default registry.
pub const DOCKER_HUB_ENDPOINT: &str = "registry-1.docker.io";

/// One host rewrite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryRewrite {
    /// Host as written in image references.
    pub user_registry: String,
    /// Host queried instead.
    pub actual_registry: String,
}

impl RegistryRewrite {
    /// Creates a rewrite.
    #[must_use]
    pub fn new(user_registry: impl Into<String>, actual_registry: impl Into<String>) -> Self {
        Self {
            user_registry: user_registry.into(),
            actual_registry: actual_registry.into(),
        }
    }
}

/// The configured rewrites, first declared entry wins.
#[derive(Debug, Clone, Default)]
pub struct RegistryRewrites {
    entries: Vec<RegistryRewrite>,
}

impl RegistryRewrites {
    /// Creates the rewrite table.
    #[must_use]
    pub fn new(entries: impl IntoIterator<Item = RegistryRewrite>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    /// Returns the rewritten host, or `None` if no rewrite applies.
    #[must_use]
    pub fn rewrite(&self, registry: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| entry.user_registry == registry)
            .map(|entry| entry.actual_registry.as_str())
    }

    /// Returns the host to send HTTP requests to.
    ///
    /// Without a rewrite, `docker.io` resolves to its API endpoint and every
    /// other host is used as-is.
    ///
    /// # Examples
    ///
    /// ```
    /// use gatekeeper_core::{RegistryRewrite, RegistryRewrites};
    ///
    /// let rewrites = RegistryRewrites::new(vec![RegistryRewrite::new("mirror.local", "ghcr.io")]);
    /// assert_eq!(rewrites.resolve("mirror.local"), "ghcr.io");
    /// assert_eq!(rewrites.resolve("docker.io"), "registry-1.docker.io");
    /// assert_eq!(rewrites.resolve("quay.io"), "quay.io");
    /// ```
    #[must_use]
    pub fn resolve<'a>(&'a self, registry: &'a str) -> &'a str {
        match self.rewrite(registry) {
            Some(actual) if actual == DEFAULT_REGISTRY => DOCKER_HUB_ENDPOINT,
            Some(actual) => actual,
            None if registry == DEFAULT_REGISTRY => DOCKER_HUB_ENDPOINT,
            None => registry,
        }
    }

    /// Iterates rewrites in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &RegistryRewrite> {
        self.entries.iter()
    }

    /// Returns true if no rewrites are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
