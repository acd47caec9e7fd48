//! Static registry credentials.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Username/password pair for a registry.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicAuth {
    /// Username.
    pub username: String,
    /// Password or token.
    pub password: String,
}

impl BasicAuth {
    /// Creates a username/password pair.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Parses the `username:password` form, splitting at the first colon.
    ///
    /// # Examples
    ///
    /// ```
    /// use gatekeeper_core::BasicAuth;
    ///
    /// let auth = BasicAuth::from_colon_pair("robot:pa:ss").unwrap();
    /// assert_eq!(auth.username, "robot");
    /// assert_eq!(auth.password, "pa:ss");
    /// assert!(BasicAuth::from_colon_pair("no-separator").is_none());
    /// ```
    #[must_use]
    pub fn from_colon_pair(pair: &str) -> Option<Self> {
        let (username, password) = pair.trim().split_once(':')?;
        (!username.is_empty()).then(|| Self::new(username, password))
    }
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Credentials bound to a registry host.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    /// Registry host the credentials belong to.
    pub registry: String,
    /// Username.
    pub username: String,
    /// Password or token.
    pub password: String,
}

impl Credential {
    /// Creates a credential.
    #[must_use]
    pub fn new(
        registry: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            registry: registry.into(),
            username: username.into(),
            password: password.into(),
        }
    }

    /// Binds a username/password pair to a registry host.
    #[must_use]
    pub fn from_basic(registry: impl Into<String>, auth: BasicAuth) -> Self {
        Self {
            registry: registry.into(),
            username: auth.username,
            password: auth.password,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("registry", &self.registry)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Credentials configured by the operator, keyed by registry host.
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    // Sorted by host; lookups rely on this for a stable suffix-match order.
    entries: Vec<Credential>,
}

impl CredentialStore {
    /// Creates a store. A host listed twice keeps its last entry.
    #[must_use]
    pub fn new(entries: impl IntoIterator<Item = Credential>) -> Self {
        let mut entries: Vec<Credential> = entries.into_iter().collect();
        entries.reverse();
        entries.sort_by(|a, b| a.registry.cmp(&b.registry));
        entries.dedup_by(|later, earlier| later.registry == earlier.registry);
        Self { entries }
    }

    /// Finds credentials for a registry host.
    ///
    /// An exact host match wins. Otherwise an entry for host `H` matches a
    /// registry `sub.H` or `H.sub`; the first such entry in host order is used.
    ///
    /// # Examples
    ///
    /// ```
    /// use gatekeeper_core::{Credential, CredentialStore};
    ///
    /// let store = CredentialStore::new(vec![Credential::new("example.com", "u", "p")]);
    /// assert!(store.lookup("example.com").is_some());
    /// assert!(store.lookup("mirror.example.com").is_some());
    /// assert!(store.lookup("notexample.com").is_none());
    /// ```
    #[must_use]
    pub fn lookup(&self, registry: &str) -> Option<&Credential> {
        self.entries
            .iter()
            .find(|entry| entry.registry == registry)
            .or_else(|| {
                self.entries
                    .iter()
                    .find(|entry| is_related_host(&entry.registry, registry))
            })
    }

    /// Iterates configured credentials in host order.
    pub fn iter(&self) -> impl Iterator<Item = &Credential> {
        self.entries.iter()
    }

    /// Returns the number of configured hosts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no credentials are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn is_related_host(entry: &str, registry: &str) -> bool {
    registry
        .strip_suffix(entry)
        .is_some_and(|prefix| prefix.len() > 1 && prefix.ends_with('.'))
        || registry
            .strip_prefix(entry)
            .is_some_and(|suffix| suffix.len() > 1 && suffix.starts_with('.'))
}
