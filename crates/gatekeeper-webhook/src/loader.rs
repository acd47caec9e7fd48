//! Configuration loading and live reload.
//!
//! A configuration is assembled from three layers, later ones winning:
//! the config file (JSON, or YAML for `.yaml`/`.yml`), the mounted secrets
//! directory, and command-line overrides. [`ConfigWatcher`] polls the
//! sources and publishes a fresh [`Snapshot`] when they change.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use gatekeeper_core::{BasicAuth, GatekeeperConfig};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Result, WebhookError};
use crate::metrics;
use crate::state::{Snapshot, SnapshotHandle};

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/webhook/config/config.json";

/// Default location of the mounted secrets directory.
pub const DEFAULT_SECRETS_DIR: &str = "/etc/webhook/secrets";

/// Default interval between change checks.
pub const DEFAULT_WATCH_INTERVAL: Duration = Duration::from_secs(30);

/// File in the secrets directory holding the proxy URL.
pub const PROXY_URL_FILE: &str = "proxy-url";

/// Directory in the secrets directory holding one `username:password` file per registry host.
pub const REGISTRY_CREDENTIALS_DIR: &str = "registry-credentials";

/// Settings given on the command line.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Listen port.
    pub port: Option<u16>,
    /// TLS certificate path.
    pub tls_cert_file: Option<PathBuf>,
    /// TLS private key path.
    pub tls_key_file: Option<PathBuf>,
    /// Log level.
    pub log_level: Option<String>,
}

impl ConfigOverrides {
    fn apply(&self, config: &mut GatekeeperConfig) {
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(cert) = &self.tls_cert_file {
            config.tls_cert_file.clone_from(cert);
        }
        if let Some(key) = &self.tls_key_file {
            config.tls_key_file.clone_from(key);
        }
        if let Some(level) = &self.log_level {
            config.log_level.clone_from(level);
        }
    }
}

/// Where a configuration is assembled from.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    /// Configuration file.
    pub config_path: PathBuf,
    /// Secrets directory, if one is used.
    pub secrets_dir: Option<PathBuf>,
    /// Command-line overrides.
    pub overrides: ConfigOverrides,
}

impl ConfigSource {
    /// Creates a source reading only `config_path`.
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            secrets_dir: None,
            overrides: ConfigOverrides::default(),
        }
    }

    /// Sets the secrets directory.
    #[must_use]
    pub fn with_secrets_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.secrets_dir = dir;
        self
    }

    /// Sets the command-line overrides.
    #[must_use]
    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Loads and merges every layer.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be read or
    /// parsed, or if the merged configuration is invalid.
    pub fn load(&self) -> Result<GatekeeperConfig> {
        let mut config = load_config_file(&self.config_path)?;
        if let Some(dir) = &self.secrets_dir {
            apply_secrets_dir(&mut config, dir)?;
        }
        self.overrides.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Returns the newest modification time across the watched paths.
    fn fingerprint(&self) -> Option<SystemTime> {
        let mut paths = vec![self.config_path.clone()];
        if let Some(dir) = &self.secrets_dir {
            paths.push(dir.clone());
            paths.push(dir.join(PROXY_URL_FILE));
            paths.push(dir.join(REGISTRY_CREDENTIALS_DIR));
        }
        paths
            .iter()
            .filter_map(|path| fs::metadata(path).and_then(|m| m.modified()).ok())
            .max()
    }
}

/// Reads a configuration file.
///
/// A missing file yields the defaults with a warning.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_config_file(path: &Path) -> Result<GatekeeperConfig> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!(path = %path.display(), "Config file not found; using defaults");
            return Ok(GatekeeperConfig::default());
        }
        Err(source) => {
            return Err(WebhookError::ConfigRead {
                path: path.display().to_string(),
                source,
            })
        }
    };

    let parse_error = |reason: String| WebhookError::ConfigParse {
        path: path.display().to_string(),
        reason,
    };
    let config: GatekeeperConfig = if is_yaml(path) {
        serde_yaml::from_str(&contents).map_err(|e| parse_error(e.to_string()))?
    } else {
        serde_json::from_str(&contents).map_err(|e| parse_error(e.to_string()))?
    };

    debug!(
        path = %path.display(),
        restrictions = config.namespace_restrictions.len(),
        "Loaded config file"
    );
    Ok(config)
}

fn is_yaml(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
}

/// Overlays the secrets directory onto a configuration.
///
/// A missing directory is not an error. Unreadable credential files are
/// skipped with a warning.
///
/// # Errors
///
/// Returns an error if the directory exists but cannot be listed.
pub fn apply_secrets_dir(config: &mut GatekeeperConfig, dir: &Path) -> Result<()> {
    if !dir.is_dir() {
        debug!(dir = %dir.display(), "No secrets directory");
        return Ok(());
    }

    let proxy_file = dir.join(PROXY_URL_FILE);
    if proxy_file.is_file() {
        let proxy = fs::read_to_string(&proxy_file)?;
        let proxy = proxy.trim();
        if !proxy.is_empty() {
            config.proxy_enabled = true;
            config.proxy_url = Some(proxy.to_string());
            debug!("Proxy enabled from secrets directory");
        }
    }

    let credentials_dir = dir.join(REGISTRY_CREDENTIALS_DIR);
    if credentials_dir.is_dir() {
        for entry in fs::read_dir(&credentials_dir)? {
            let path = entry?.path();
            // Mounted Secrets carry `..data` links alongside the key files.
            let Some(host) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if host.starts_with('.') || !path.is_file() {
                continue;
            }
            match read_credential_file(&path) {
                Ok(auth) => {
                    debug!(registry = host, "Loaded registry credentials from secrets directory");
                    config.set_registry_auth(host, auth);
                }
                Err(error) => warn!(error = %error, "Skipping registry credentials file"),
            }
        }
    }
    Ok(())
}

fn read_credential_file(path: &Path) -> Result<BasicAuth> {
    let contents = fs::read_to_string(path)?;
    BasicAuth::from_colon_pair(&contents).ok_or_else(|| WebhookError::SecretFile {
        path: path.display().to_string(),
        reason: "expected username:password".to_string(),
    })
}

/// Polls configuration sources and swaps in new snapshots.
pub struct ConfigWatcher {
    source: ConfigSource,
    handle: Arc<SnapshotHandle>,
    interval: Duration,
    last_seen: Option<SystemTime>,
}

impl ConfigWatcher {
    /// Creates a watcher. The current state of the sources counts as seen.
    pub fn new(source: ConfigSource, handle: Arc<SnapshotHandle>, interval: Duration) -> Self {
        let last_seen = source.fingerprint();
        Self {
            source,
            handle,
            interval,
            last_seen,
        }
    }

    /// Reloads if any source changed since the last check.
    ///
    /// Returns `None` when nothing changed, otherwise whether the reload
    /// succeeded. A failed reload keeps the previous snapshot.
    pub fn check(&mut self) -> Option<bool> {
        let fingerprint = self.source.fingerprint();
        if fingerprint == self.last_seen {
            return None;
        }
        self.last_seen = fingerprint;

        let result = self.source.load().and_then(|config| Snapshot::build(&config));
        let success = match result {
            Ok(snapshot) => {
                info!(
                    path = %self.source.config_path.display(),
                    policies = snapshot.config.policies.len(),
                    resolver = snapshot.resolver.name(),
                    "Configuration reloaded"
                );
                self.handle.replace(snapshot);
                true
            }
            Err(error) => {
                warn!(
                    path = %self.source.config_path.display(),
                    error = %error,
                    "Configuration reload failed; keeping previous snapshot"
                );
                false
            }
        };
        metrics::record_reload(success);
        Some(success)
    }

    /// Runs the polling loop on the current runtime.
    pub fn spawn(mut self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.check();
            }
        })
    }
}
