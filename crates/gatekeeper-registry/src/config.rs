//! Configuration types for the registry client.

use std::time::Duration;

use gatekeeper_core::{ConfigSnapshot, RegistryRewrites};

use crate::oci::Platform;

/// Configuration for the registry client.
#[derive(Debug, Clone)]
pub struct RegistryClientConfig {
    /// Deadline for each HTTP request.
    pub timeout: Duration,

    /// User agent string.
    pub user_agent: String,

    /// Proxy URL for all registry traffic.
    pub proxy_url: Option<String>,

    /// Hosts queried over `http://`.
    pub plain_http_registries: Vec<String>,

    /// Host rewrites applied before each lookup.
    pub rewrites: RegistryRewrites,

    /// Platform picked from manifest lists.
    pub platform: Platform,
}

impl Default for RegistryClientConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryClientConfig {
    /// Creates a configuration with a 30 second timeout and no proxy.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use gatekeeper_registry::RegistryClientConfig;
    ///
    /// let config = RegistryClientConfig::new();
    /// assert_eq!(config.timeout, Duration::from_secs(30));
    /// assert!(config.proxy_url.is_none());
    /// ```
    #[must_use]
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: format!("image-size-gatekeeper/{}", env!("CARGO_PKG_VERSION")),
            proxy_url: None,
            plain_http_registries: Vec::new(),
            rewrites: RegistryRewrites::default(),
            platform: Platform::linux_amd64(),
        }
    }

    /// Derives the client configuration from a compiled snapshot.
    #[must_use]
    pub fn from_snapshot(snapshot: &ConfigSnapshot) -> Self {
        Self::new()
            .with_timeout(snapshot.registry_timeout)
            .with_rewrites(snapshot.rewrites.clone())
            .with_plain_http_registries(snapshot.plain_http_registries.clone())
            .with_proxy(snapshot.proxy_url.clone())
    }

    /// Sets the request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the proxy URL.
    #[must_use]
    pub fn with_proxy(mut self, proxy_url: Option<String>) -> Self {
        self.proxy_url = proxy_url;
        self
    }

    /// Sets the hosts queried over plain HTTP.
    #[must_use]
    pub fn with_plain_http_registries(mut self, hosts: Vec<String>) -> Self {
        self.plain_http_registries = hosts;
        self
    }

    /// Sets the host rewrites.
    #[must_use]
    pub fn with_rewrites(mut self, rewrites: RegistryRewrites) -> Self {
        self.rewrites = rewrites;
        self
    }

    /// Sets the platform picked from manifest lists.
    #[must_use]
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Returns the URL scheme for a host.
    #[must_use]
    pub fn scheme_for(&self, host: &str) -> &'static str {
        if self.plain_http_registries.iter().any(|entry| entry == host) {
            "http"
        } else {
            "https"
        }
    }
}
