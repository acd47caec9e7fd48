//! Registry credential resolution for admission requests.
//!
//! A Pod may name a Secret in its namespace holding registry auth. That
//! Secret is consulted first; static credentials from the configuration
//! snapshot are the fallback. Secret trouble never fails the request.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use gatekeeper_core::{BasicAuth, ConfigSnapshot, Credential};
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{Result, WebhookError};

/// Secret key holding a multi-registry auth document.
pub const AUTH_JSON_KEY: &str = "auth.json";

/// Source of Secret payloads.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Returns the data of a Secret, or `None` if it does not exist.
    async fn secret_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, Vec<u8>>>>;
}

/// Reads Secrets through the Kubernetes API.
#[derive(Clone)]
pub struct KubeSecretStore {
    client: Client,
}

impl KubeSecretStore {
    /// Creates a store backed by a cluster client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    async fn secret_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, Vec<u8>>>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = api
            .get_opt(name)
            .await
            .map_err(|e| WebhookError::SecretFetch {
                namespace: namespace.to_string(),
                name: name.to_string(),
                reason: e.to_string(),
            })?;

        Ok(secret.map(|secret| {
            secret
                .data
                .unwrap_or_default()
                .into_iter()
                .map(|(key, value)| (key, value.0))
                .collect()
        }))
    }
}

/// Secrets held in memory, keyed by `(namespace, name)`.
#[derive(Debug, Default, Clone)]
pub struct StaticSecretStore {
    secrets: HashMap<(String, String), BTreeMap<String, Vec<u8>>>,
}

impl StaticSecretStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a Secret.
    #[must_use]
    pub fn with_secret(
        mut self,
        namespace: impl Into<String>,
        name: impl Into<String>,
        data: impl IntoIterator<Item = (String, Vec<u8>)>,
    ) -> Self {
        self.secrets
            .insert((namespace.into(), name.into()), data.into_iter().collect());
        self
    }
}

#[async_trait]
impl SecretStore for StaticSecretStore {
    async fn secret_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, Vec<u8>>>> {
        Ok(self
            .secrets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }
}

#[derive(Debug, Deserialize)]
struct AuthDocument {
    #[serde(default)]
    registries: BTreeMap<String, BasicAuth>,
}

/// What a Secret says about one registry host.
#[derive(Debug, PartialEq, Eq)]
enum SecretEntry {
    Found(BasicAuth),
    Missing,
    Malformed(String),
}

/// Finds the entry for `registry` in Secret data.
///
/// `auth.json` is consulted first, then a key named after the host. An
/// `auth.json` that does not parse is skipped; it only makes the result
/// `Malformed` when the host key yields nothing usable either.
fn find_entry(data: &BTreeMap<String, Vec<u8>>, registry: &str) -> SecretEntry {
    let mut auth_json_error = None;
    if let Some(raw) = data.get(AUTH_JSON_KEY) {
        match serde_json::from_slice::<AuthDocument>(raw) {
            Ok(mut document) => {
                if let Some(auth) = document.registries.remove(registry) {
                    return SecretEntry::Found(auth);
                }
            }
            Err(e) => {
                warn!(registry, error = %e, "Ignoring unparseable {AUTH_JSON_KEY} in credentials secret");
                auth_json_error = Some(format!("{AUTH_JSON_KEY}: {e}"));
            }
        }
    }

    match data.get(registry) {
        Some(raw) => serde_json::from_slice::<BasicAuth>(raw)
            .map_or_else(|e| SecretEntry::Malformed(format!("{registry}: {e}")), SecretEntry::Found),
        None => auth_json_error.map_or(SecretEntry::Missing, SecretEntry::Malformed),
    }
}

/// Credentials available to one admission request.
///
/// The Pod's Secret is fetched once, when the scope is built, and shared by
/// every image of the request.
pub struct RequestCredentials<'a> {
    snapshot: &'a ConfigSnapshot,
    namespace: &'a str,
    secret: Option<(&'a str, BTreeMap<String, Vec<u8>>)>,
}

impl RequestCredentials<'_> {
    /// Returns the credential for `registry`.
    ///
    /// An entry in the Pod's Secret wins. A Secret without an entry for the
    /// host falls back to static credentials. A malformed entry yields no
    /// credential at all.
    pub fn for_registry(&self, registry: &str) -> Option<Credential> {
        if let Some((name, data)) = &self.secret {
            match find_entry(data, registry) {
                SecretEntry::Found(auth) => {
                    debug!(registry, namespace = self.namespace, secret = name, "Using credentials from secret");
                    return Some(Credential::from_basic(registry, auth));
                }
                SecretEntry::Malformed(reason) => {
                    warn!(registry, namespace = self.namespace, secret = name, error = %reason, "Malformed registry credentials in secret");
                    return None;
                }
                SecretEntry::Missing => {}
            }
        }

        let credential = self.snapshot.credentials.lookup(registry).cloned();
        if credential.is_some() {
            debug!(registry, "Using static credentials");
        }
        credential
    }
}

/// Resolves the credential to use for one registry lookup.
#[derive(Clone, Default)]
pub struct CredentialResolver {
    secrets: Option<Arc<dyn SecretStore>>,
}

impl CredentialResolver {
    /// Creates a resolver. Without a store, only static credentials apply.
    pub fn new(secrets: Option<Arc<dyn SecretStore>>) -> Self {
        Self { secrets }
    }

    /// Creates a resolver that never reads Secrets.
    pub fn static_only() -> Self {
        Self::default()
    }

    /// Returns true if Secret lookups are available.
    pub fn has_secret_store(&self) -> bool {
        self.secrets.is_some()
    }

    /// Builds the credential scope of one request.
    ///
    /// With a `secret` hint the named Secret in `namespace` is fetched. A
    /// fetch failure or an absent Secret leaves only static credentials.
    pub async fn scope<'a>(
        &self,
        snapshot: &'a ConfigSnapshot,
        namespace: &'a str,
        secret: Option<&'a str>,
    ) -> RequestCredentials<'a> {
        let secret = match secret {
            Some(name) => self.fetch(namespace, name).await.map(|data| (name, data)),
            None => None,
        };
        RequestCredentials {
            snapshot,
            namespace,
            secret,
        }
    }

    /// Returns the credential for a single `registry` lookup.
    pub async fn resolve(
        &self,
        snapshot: &ConfigSnapshot,
        registry: &str,
        namespace: &str,
        secret: Option<&str>,
    ) -> Option<Credential> {
        self.scope(snapshot, namespace, secret)
            .await
            .for_registry(registry)
    }

    async fn fetch(&self, namespace: &str, name: &str) -> Option<BTreeMap<String, Vec<u8>>> {
        let Some(store) = &self.secrets else {
            debug!(secret = name, "No Kubernetes client; skipping secret lookup");
            return None;
        };

        match store.secret_data(namespace, name).await {
            Ok(Some(data)) => Some(data),
            Ok(None) => {
                warn!(namespace, secret = name, "Credentials secret not found");
                None
            }
            Err(error) => {
                warn!(namespace, secret = name, error = %error, "Credentials secret lookup failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatekeeper_core::GatekeeperConfig;

    struct FailingStore;

    #[async_trait]
    impl SecretStore for FailingStore {
        async fn secret_data(
            &self,
            namespace: &str,
            name: &str,
        ) -> Result<Option<BTreeMap<String, Vec<u8>>>> {
            Err(WebhookError::SecretFetch {
                namespace: namespace.to_string(),
                name: name.to_string(),
                reason: "forbidden".to_string(),
            })
        }
    }

    #[derive(Default)]
    struct CountingStore {
        inner: StaticSecretStore,
        fetches: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl SecretStore for CountingStore {
        async fn secret_data(
            &self,
            namespace: &str,
            name: &str,
        ) -> Result<Option<BTreeMap<String, Vec<u8>>>> {
            self.fetches.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.inner.secret_data(namespace, name).await
        }
    }

    fn snapshot() -> ConfigSnapshot {
        let mut config = GatekeeperConfig::default();
        config.set_registry_auth("ghcr.io", BasicAuth::new("static", "s3cret"));
        ConfigSnapshot::compile(&config)
    }

    fn store(entries: &[(&str, &str)]) -> Arc<dyn SecretStore> {
        Arc::new(StaticSecretStore::new().with_secret(
            "prod",
            "pull",
            entries
                .iter()
                .map(|(k, v)| ((*k).to_string(), v.as_bytes().to_vec())),
        ))
    }

    #[tokio::test]
    async fn test_auth_json_wins_over_static() {
        let resolver = CredentialResolver::new(Some(store(&[(
            AUTH_JSON_KEY,
            r#"{"registries":{"ghcr.io":{"username":"bot","password":"tok"}}}"#,
        )])));
        let cred = resolver
            .resolve(&snapshot(), "ghcr.io", "prod", Some("pull"))
            .await
            .unwrap();
        assert_eq!(cred.username, "bot");
        assert_eq!(cred.registry, "ghcr.io");
    }

    #[tokio::test]
    async fn test_host_key() {
        let resolver = CredentialResolver::new(Some(store(&[(
            "quay.io",
            r#"{"username":"robot","password":"pw"}"#,
        )])));
        let cred = resolver
            .resolve(&snapshot(), "quay.io", "prod", Some("pull"))
            .await
            .unwrap();
        assert_eq!(cred.username, "robot");
    }

    #[tokio::test]
    async fn test_secret_without_entry_falls_back() {
        let resolver = CredentialResolver::new(Some(store(&[(
            "quay.io",
            r#"{"username":"robot","password":"pw"}"#,
        )])));
        let cred = resolver
            .resolve(&snapshot(), "ghcr.io", "prod", Some("pull"))
            .await
            .unwrap();
        assert_eq!(cred.username, "static");
    }

    #[tokio::test]
    async fn test_absent_secret_falls_back() {
        let resolver = CredentialResolver::new(Some(store(&[])));
        let cred = resolver
            .resolve(&snapshot(), "ghcr.io", "prod", Some("other"))
            .await
            .unwrap();
        assert_eq!(cred.username, "static");
    }

    #[tokio::test]
    async fn test_fetch_failure_falls_back() {
        let resolver = CredentialResolver::new(Some(Arc::new(FailingStore)));
        let cred = resolver
            .resolve(&snapshot(), "ghcr.io", "prod", Some("pull"))
            .await
            .unwrap();
        assert_eq!(cred.username, "static");
    }

    #[tokio::test]
    async fn test_no_client_falls_back() {
        let resolver = CredentialResolver::static_only();
        assert!(!resolver.has_secret_store());
        let cred = resolver
            .resolve(&snapshot(), "ghcr.io", "prod", Some("pull"))
            .await
            .unwrap();
        assert_eq!(cred.username, "static");
    }

    #[tokio::test]
    async fn test_malformed_secret_yields_none() {
        let resolver = CredentialResolver::new(Some(store(&[(AUTH_JSON_KEY, "{not json")])));
        assert!(resolver
            .resolve(&snapshot(), "ghcr.io", "prod", Some("pull"))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_related_host_from_static() {
        let resolver = CredentialResolver::static_only();
        let cred = resolver
            .resolve(&snapshot(), "eu.ghcr.io", "prod", None)
            .await
            .unwrap();
        assert_eq!(cred.username, "static");
        assert!(resolver
            .resolve(&snapshot(), "docker.io", "prod", None)
            .await
            .is_none());
    }

    #[test]
    fn test_find_entry_prefers_auth_json() {
        let data: BTreeMap<String, Vec<u8>> = [
            (
                AUTH_JSON_KEY.to_string(),
                br#"{"registries":{"ghcr.io":{"username":"a","password":"1"}}}"#.to_vec(),
            ),
            (
                "ghcr.io".to_string(),
                br#"{"username":"b","password":"2"}"#.to_vec(),
            ),
        ]
        .into_iter()
        .collect();
        assert_eq!(
            find_entry(&data, "ghcr.io"),
            SecretEntry::Found(BasicAuth::new("a", "1"))
        );
        assert_eq!(find_entry(&data, "quay.io"), SecretEntry::Missing);
    }

    #[test]
    fn test_find_entry_skips_unparseable_auth_json() {
        let data: BTreeMap<String, Vec<u8>> = [
            (AUTH_JSON_KEY.to_string(), b"{not json".to_vec()),
            (
                "quay.io".to_string(),
                br#"{"username":"robot","password":"pw"}"#.to_vec(),
            ),
        ]
        .into_iter()
        .collect();

        assert_eq!(
            find_entry(&data, "quay.io"),
            SecretEntry::Found(BasicAuth::new("robot", "pw"))
        );
        assert!(matches!(
            find_entry(&data, "ghcr.io"),
            SecretEntry::Malformed(reason) if reason.starts_with(AUTH_JSON_KEY)
        ));
    }

    #[tokio::test]
    async fn test_host_key_used_when_auth_json_unparseable() {
        let resolver = CredentialResolver::new(Some(store(&[
            (AUTH_JSON_KEY, "{not json"),
            ("quay.io", r#"{"username":"robot","password":"pw"}"#),
        ])));
        let cred = resolver
            .resolve(&snapshot(), "quay.io", "prod", Some("pull"))
            .await
            .unwrap();
        assert_eq!(cred.username, "robot");
    }

    #[tokio::test]
    async fn test_scope_fetches_secret_once() {
        let store = Arc::new(CountingStore {
            inner: StaticSecretStore::new().with_secret(
                "prod",
                "pull",
                [(
                    "quay.io".to_string(),
                    br#"{"username":"robot","password":"pw"}"#.to_vec(),
                )],
            ),
            ..CountingStore::default()
        });
        let resolver = CredentialResolver::new(Some(store.clone()));
        let snapshot = snapshot();

        let scope = resolver.scope(&snapshot, "prod", Some("pull")).await;
        assert_eq!(scope.for_registry("quay.io").unwrap().username, "robot");
        assert_eq!(scope.for_registry("ghcr.io").unwrap().username, "static");
        assert!(scope.for_registry("docker.io").is_none());
        assert_eq!(store.fetches.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_scope_without_hint_never_fetches() {
        let store = Arc::new(CountingStore::default());
        let resolver = CredentialResolver::new(Some(store.clone()));
        let snapshot = snapshot();

        let scope = resolver.scope(&snapshot, "prod", None).await;
        assert_eq!(scope.for_registry("ghcr.io").unwrap().username, "static");
        assert_eq!(store.fetches.load(std::sync::atomic::Ordering::SeqCst), 0);
    }
}
