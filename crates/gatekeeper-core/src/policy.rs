//! Namespace size policies.
//!
//! A [`PolicySet`] maps a namespace name to the [`NamespacePolicy`] that
//! governs it. Exact-name entries always take precedence over regex entries;
//! within each group the first declared match wins.

use regex::Regex;

use crate::error::{Error, Result};
use crate::size::bytes_to_mb;

/// How a policy selects namespaces.
#[derive(Debug, Clone)]
pub enum NamespaceMatcher {
    /// Matches one namespace by name.
    Exact(String),
    /// Matches any namespace the (unanchored) expression finds a match in.
    Regex(Regex),
}

impl NamespaceMatcher {
    /// Returns true if this matcher selects the namespace.
    #[must_use]
    pub fn matches(&self, namespace: &str) -> bool {
        match self {
            Self::Exact(name) => name == namespace,
            Self::Regex(regex) => regex.is_match(namespace),
        }
    }

    /// Returns the pattern as written in configuration.
    #[must_use]
    pub fn pattern(&self) -> &str {
        match self {
            Self::Exact(name) => name,
            Self::Regex(regex) => regex.as_str(),
        }
    }

    /// Returns true for regex matchers.
    #[must_use]
    pub const fn is_regex(&self) -> bool {
        matches!(self, Self::Regex(_))
    }
}

/// Size policy for the namespaces selected by its matcher.
#[derive(Debug, Clone)]
pub struct NamespacePolicy {
    /// Namespace selector.
    pub matcher: NamespaceMatcher,

    /// Disabled policies are ignored during lookup.
    pub enabled: bool,

    /// Largest permitted image size in bytes (inclusive).
    pub max_size_bytes: u64,

    /// Pods must carry the original-registry annotation.
    pub require_original_registry: bool,
}

impl NamespacePolicy {
    /// Creates an enabled policy for one namespace name.
    ///
    /// # Examples
    ///
    /// ```
    /// use gatekeeper_core::NamespacePolicy;
    ///
    /// let policy = NamespacePolicy::exact("prod", 1024);
    /// assert!(policy.matcher.matches("prod"));
    /// assert!(!policy.matcher.matches("prod-eu"));
    /// ```
    #[must_use]
    pub fn exact(namespace: impl Into<String>, max_size_bytes: u64) -> Self {
        Self {
            matcher: NamespaceMatcher::Exact(namespace.into()),
            enabled: true,
            max_size_bytes,
            require_original_registry: false,
        }
    }

    /// Creates an enabled policy for namespaces matching a regular expression.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPattern`] if the expression does not compile.
    pub fn regex(pattern: &str, max_size_bytes: u64) -> Result<Self> {
        let regex = Regex::new(pattern).map_err(|source| Error::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self {
            matcher: NamespaceMatcher::Regex(regex),
            enabled: true,
            max_size_bytes,
            require_original_registry: false,
        })
    }

    /// Sets whether the policy participates in lookups.
    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets whether Pods must declare their original registry.
    #[must_use]
    pub const fn with_require_original_registry(mut self, required: bool) -> Self {
        self.require_original_registry = required;
        self
    }

    /// Returns the pattern as written in configuration.
    #[must_use]
    pub fn pattern(&self) -> &str {
        self.matcher.pattern()
    }

    /// Returns the limit in megabytes.
    #[must_use]
    pub fn max_size_mb(&self) -> f64 {
        bytes_to_mb(self.max_size_bytes)
    }
}

/// Ordered collection of namespace policies.
#[derive(Debug, Clone, Default)]
pub struct PolicySet {
    exact: Vec<NamespacePolicy>,
    regex: Vec<NamespacePolicy>,
}

impl PolicySet {
    /// Creates a policy set, keeping declaration order within each group.
    #[must_use]
    pub fn new(policies: impl IntoIterator<Item = NamespacePolicy>) -> Self {
        let (regex, exact) = policies
            .into_iter()
            .partition(|policy| policy.matcher.is_regex());
        Self { exact, regex }
    }

    /// Returns the policy governing a namespace, if any.
    ///
    /// Exact entries are consulted before regex entries regardless of the
    /// order they were declared in.
    ///
    /// # Examples
    ///
    /// ```
    /// use gatekeeper_core::{NamespacePolicy, PolicySet};
    ///
    /// let policies = PolicySet::new(vec![
    ///     NamespacePolicy::regex("^team-", 100).unwrap(),
    ///     NamespacePolicy::exact("team-core", 500),
    /// ]);
    /// assert_eq!(policies.limit_for("team-core").unwrap().max_size_bytes, 500);
    /// assert_eq!(policies.limit_for("team-web").unwrap().max_size_bytes, 100);
    /// assert!(policies.limit_for("default").is_none());
    /// ```
    #[must_use]
    pub fn limit_for(&self, namespace: &str) -> Option<&NamespacePolicy> {
        self.exact
            .iter()
            .chain(&self.regex)
            .filter(|policy| policy.enabled)
            .find(|policy| policy.matcher.matches(namespace))
    }

    /// Iterates policies in lookup order.
    pub fn iter(&self) -> impl Iterator<Item = &NamespacePolicy> {
        self.exact.iter().chain(&self.regex)
    }

    /// Returns the number of policies, enabled or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.exact.len() + self.regex.len()
    }

    /// Returns true if no policies are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
