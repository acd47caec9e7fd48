//! Shared configuration snapshot.
//!
//! The only state shared between admission requests. Readers clone the
//! current `Arc<Snapshot>` and keep it for the whole request; the loader
//! publishes a replacement by swapping the `Arc` under a short write lock.

use std::fmt;
use std::sync::Arc;

use gatekeeper_core::{ConfigSnapshot, GatekeeperConfig};
use gatekeeper_registry::{build_resolver, SizeResolver};
use parking_lot::RwLock;

use crate::error::Result;

/// Compiled configuration plus the size resolver built from it.
pub struct Snapshot {
    /// Compiled policies, rewrites, credentials and deadlines.
    pub config: ConfigSnapshot,

    /// Resolver used for every image in requests that see this snapshot.
    pub resolver: Arc<dyn SizeResolver>,
}

impl Snapshot {
    /// Compiles a configuration and builds its resolver.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client of the resolver cannot be built.
    pub fn build(config: &GatekeeperConfig) -> Result<Self> {
        let config = ConfigSnapshot::compile(config);
        let resolver = build_resolver(&config)?;
        Ok(Self { config, resolver })
    }

    /// Pairs a compiled configuration with an explicit resolver.
    pub fn with_resolver(config: ConfigSnapshot, resolver: Arc<dyn SizeResolver>) -> Self {
        Self { config, resolver }
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("config", &self.config)
            .field("resolver", &self.resolver.name())
            .finish()
    }
}

/// Handle through which the current snapshot is read and replaced.
#[derive(Debug)]
pub struct SnapshotHandle {
    current: RwLock<Arc<Snapshot>>,
}

impl SnapshotHandle {
    /// Creates a handle publishing `snapshot`.
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// Returns the snapshot currently in effect.
    pub fn current(&self) -> Arc<Snapshot> {
        Arc::clone(&self.current.read())
    }

    /// Publishes a new snapshot. Requests already holding the old one keep it.
    pub fn replace(&self, snapshot: Snapshot) {
        *self.current.write() = Arc::new(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatekeeper_core::NamespaceRestriction;

    fn config_with_limit(mb: f64) -> GatekeeperConfig {
        GatekeeperConfig {
            namespace_restrictions: vec![("prod".to_string(), NamespaceRestriction::new(mb))],
            ..GatekeeperConfig::default()
        }
    }

    #[test]
    fn test_build_snapshot() {
        let snapshot = Snapshot::build(&config_with_limit(500.0)).unwrap();
        assert_eq!(snapshot.resolver.name(), "direct");
        assert!(snapshot.config.policies.limit_for("prod").is_some());
    }

    #[test]
    fn test_replace_keeps_old_reader_snapshot() {
        let handle = SnapshotHandle::new(Snapshot::build(&config_with_limit(500.0)).unwrap());
        let held = handle.current();

        handle.replace(Snapshot::build(&GatekeeperConfig::default()).unwrap());

        assert!(held.config.policies.limit_for("prod").is_some());
        assert!(handle.current().config.policies.limit_for("prod").is_none());
    }
}
