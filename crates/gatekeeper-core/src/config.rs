//! Configuration document and compiled snapshots.
//!
//! [`GatekeeperConfig`] mirrors the on-disk document (camelCase keys, every
//! field optional). [`ConfigSnapshot::compile`] turns it into the immutable
//! lookup structures the admission path reads: compiled namespace policies,
//! registry rewrites, static credentials and outbound settings.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::credentials::{BasicAuth, Credential, CredentialStore};
use crate::error::{Error, Result};
use crate::policy::{NamespacePolicy, PolicySet};
use crate::rewrite::{RegistryRewrite, RegistryRewrites};
use crate::size::mb_to_bytes;

/// Default HTTPS listen port.
pub const DEFAULT_PORT: u16 = 8443;

/// Default registry request deadline in seconds.
pub const DEFAULT_REGISTRY_TIMEOUT_SECS: u64 = 30;

/// Default admission evaluation deadline in seconds.
pub const DEFAULT_ADMISSION_TIMEOUT_SECS: u64 = 10;

/// Default cap on in-flight admission requests.
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 64;

/// Which size resolver implementation to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeResolverKind {
    /// Speak the registry v2 API directly.
    #[default]
    Direct,
    /// Shell out to `skopeo inspect`.
    Skopeo,
}

impl std::fmt::Display for SizeResolverKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Skopeo => write!(f, "skopeo"),
        }
    }
}

/// One `namespaceRestrictions` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceRestriction {
    /// Disabled entries are kept but never matched.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Limit in megabytes (1 MB = 1024 × 1024 bytes).
    #[serde(rename = "maxSizeMB")]
    pub max_size_mb: f64,

    /// Pods must carry the original-registry annotation.
    #[serde(default)]
    pub require_original_registry: bool,

    /// Treat the key as a regular expression rather than a namespace name.
    #[serde(default)]
    pub is_regex: bool,
}

impl NamespaceRestriction {
    /// Creates an enabled exact-name restriction.
    #[must_use]
    pub fn new(max_size_mb: f64) -> Self {
        Self {
            enabled: true,
            max_size_mb,
            require_original_registry: false,
            is_regex: false,
        }
    }
}

const fn default_true() -> bool {
    true
}

/// The configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatekeeperConfig {
    /// Listen port.
    pub port: u16,

    /// PEM certificate served by the listener.
    pub tls_cert_file: PathBuf,

    /// PEM private key served by the listener.
    pub tls_key_file: PathBuf,

    /// Log filter applied when `RUST_LOG` is unset.
    pub log_level: String,

    /// Route registry traffic through `proxy_url`.
    pub proxy_enabled: bool,

    /// Proxy URL (`http://`, `https://` or `socks5://`).
    #[serde(rename = "proxyURL", alias = "proxyUrl", skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,

    /// Static credentials keyed by registry host.
    pub registry_auth: BTreeMap<String, BasicAuth>,

    /// Registry host rewrites.
    pub registry_mappings: Vec<RegistryRewrite>,

    /// Per-namespace limits in document order.
    #[serde(with = "ordered_map")]
    pub namespace_restrictions: Vec<(String, NamespaceRestriction)>,

    /// Size resolver implementation.
    pub size_resolver: SizeResolverKind,

    /// Deadline for each registry request.
    pub registry_timeout_seconds: u64,

    /// Deadline for one admission evaluation.
    pub admission_timeout_seconds: u64,

    /// Registries queried over plain HTTP.
    pub plain_http_registries: Vec<String>,

    /// Cap on in-flight admission requests.
    pub max_concurrent_requests: usize,
}

impl Default for GatekeeperConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            tls_cert_file: PathBuf::from("/etc/webhook/certs/tls.crt"),
            tls_key_file: PathBuf::from("/etc/webhook/certs/tls.key"),
            log_level: "info".to_string(),
            proxy_enabled: false,
            proxy_url: None,
            registry_auth: BTreeMap::new(),
            registry_mappings: Vec::new(),
            namespace_restrictions: Vec::new(),
            size_resolver: SizeResolverKind::default(),
            registry_timeout_seconds: DEFAULT_REGISTRY_TIMEOUT_SECS,
            admission_timeout_seconds: DEFAULT_ADMISSION_TIMEOUT_SECS,
            plain_http_registries: Vec::new(),
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
        }
    }
}

impl GatekeeperConfig {
    /// Parses a JSON configuration document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid JSON or fails
    /// [`GatekeeperConfig::validate`].
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values serde cannot reject on its own.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.registry_timeout_seconds == 0 {
            return Err(invalid("registryTimeoutSeconds must be greater than zero"));
        }
        if self.admission_timeout_seconds == 0 {
            return Err(invalid("admissionTimeoutSeconds must be greater than zero"));
        }
        if self.max_concurrent_requests == 0 {
            return Err(invalid("maxConcurrentRequests must be greater than zero"));
        }
        for (pattern, restriction) in &self.namespace_restrictions {
            if !restriction.max_size_mb.is_finite() || restriction.max_size_mb < 0.0 {
                return Err(invalid(format!(
                    "namespaceRestrictions['{pattern}'].maxSizeMB must be a non-negative number"
                )));
            }
        }
        Ok(())
    }

    /// Adds or replaces static credentials for a registry host.
    pub fn set_registry_auth(&mut self, registry: impl Into<String>, auth: BasicAuth) {
        self.registry_auth.insert(registry.into(), auth);
    }

    /// Returns the proxy URL when the proxy is enabled and non-empty.
    #[must_use]
    pub fn effective_proxy_url(&self) -> Option<&str> {
        self.proxy_url
            .as_deref()
            .map(str::trim)
            .filter(|url| self.proxy_enabled && !url.is_empty())
    }
}

fn invalid(reason: impl Into<String>) -> Error {
    Error::InvalidConfig {
        reason: reason.into(),
    }
}

/// Immutable lookup structures compiled from a [`GatekeeperConfig`].
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    /// Namespace policies.
    pub policies: PolicySet,

    /// Registry host rewrites.
    pub rewrites: RegistryRewrites,

    /// Static credentials.
    pub credentials: CredentialStore,

    /// Proxy for outbound registry traffic.
    pub proxy_url: Option<String>,

    /// Size resolver implementation.
    pub size_resolver: SizeResolverKind,

    /// Deadline for each registry request.
    pub registry_timeout: Duration,

    /// Deadline for one admission evaluation.
    pub admission_timeout: Duration,

    /// Registries queried over plain HTTP.
    pub plain_http_registries: Vec<String>,

    /// Regex patterns that failed to compile and were left out.
    pub dropped_patterns: Vec<String>,
}

impl ConfigSnapshot {
    /// Compiles a configuration document.
    ///
    /// Regex patterns that fail to compile are dropped with a warning and
    /// listed in [`ConfigSnapshot::dropped_patterns`].
    #[must_use]
    pub fn compile(config: &GatekeeperConfig) -> Self {
        let mut dropped_patterns = Vec::new();
        let mut policies = Vec::with_capacity(config.namespace_restrictions.len());

        for (pattern, restriction) in &config.namespace_restrictions {
            let max_size_bytes = mb_to_bytes(restriction.max_size_mb);
            let policy = if restriction.is_regex {
                match NamespacePolicy::regex(pattern, max_size_bytes) {
                    Ok(policy) => policy,
                    Err(error) => {
                        warn!(pattern = %pattern, error = %error, "Dropping namespace restriction with invalid regex");
                        dropped_patterns.push(pattern.clone());
                        continue;
                    }
                }
            } else {
                NamespacePolicy::exact(pattern.clone(), max_size_bytes)
            };
            policies.push(
                policy
                    .with_enabled(restriction.enabled)
                    .with_require_original_registry(restriction.require_original_registry),
            );
        }

        let credentials = CredentialStore::new(
            config
                .registry_auth
                .iter()
                .map(|(host, auth)| Credential::from_basic(host.clone(), auth.clone())),
        );

        Self {
            policies: PolicySet::new(policies),
            rewrites: RegistryRewrites::new(config.registry_mappings.iter().cloned()),
            credentials,
            proxy_url: config.effective_proxy_url().map(ToString::to_string),
            size_resolver: config.size_resolver,
            registry_timeout: Duration::from_secs(config.registry_timeout_seconds),
            admission_timeout: Duration::from_secs(config.admission_timeout_seconds),
            plain_http_registries: config.plain_http_registries.clone(),
            dropped_patterns,
        }
    }

    /// Returns true if the host is queried over plain HTTP.
    #[must_use]
    pub fn is_plain_http(&self, host: &str) -> bool {
        self.plain_http_registries.iter().any(|entry| entry == host)
    }
}

impl Default for ConfigSnapshot {
    fn default() -> Self {
        Self::compile(&GatekeeperConfig::default())
    }
}

/// Serializes a `Vec<(String, V)>` as a map, keeping document order.
///
/// A key listed twice keeps its first position and its last value.
mod ordered_map {
    use std::fmt;
    use std::marker::PhantomData;

    use serde::de::{MapAccess, Visitor};
    use serde::ser::SerializeMap;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S, V>(entries: &[(String, V)], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        V: Serialize,
    {
        let mut map = serializer.serialize_map(Some(entries.len()))?;
        for (key, value) in entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D, V>(deserializer: D) -> Result<Vec<(String, V)>, D::Error>
    where
        D: Deserializer<'de>,
        V: Deserialize<'de>,
    {
        deserializer.deserialize_map(OrderedMapVisitor(PhantomData))
    }

    struct OrderedMapVisitor<V>(PhantomData<V>);

    impl<'de, V: Deserialize<'de>> Visitor<'de> for OrderedMapVisitor<V> {
        type Value = Vec<(String, V)>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map of namespace patterns")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
            let mut entries: Vec<(String, V)> = Vec::with_capacity(access.size_hint().unwrap_or(0));
            while let Some((key, value)) = access.next_entry::<String, V>()? {
                if let Some(slot) = entries.iter_mut().find(|(existing, _)| *existing == key) {
                    slot.1 = value;
                } else {
                    entries.push((key, value));
                }
            }
            Ok(entries)
        }

        fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }
    }
}
