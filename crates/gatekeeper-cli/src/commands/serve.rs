//! Serve command: runs the admission webhook.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use gatekeeper_webhook::{
    router, serve, shutdown_signal, AdmissionHandler, ConfigOverrides, ConfigWatcher,
    CredentialResolver, KubeSecretStore, ServerOptions, Snapshot, SnapshotHandle,
};
use tracing::{info, warn};

use super::ConfigArgs;

/// Arguments for the serve command.
#[derive(Args)]
pub struct ServeArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Listen port (overrides config)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// TLS certificate file (overrides config)
    #[arg(long)]
    pub tls_cert_file: Option<PathBuf>,

    /// TLS private key file (overrides config)
    #[arg(long)]
    pub tls_key_file: Option<PathBuf>,

    /// Log level (overrides config; RUST_LOG wins over both)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Serve plain HTTP instead of TLS
    #[arg(long)]
    pub insecure_http: bool,

    /// Seconds between config change checks (0 disables reloading)
    #[arg(long, default_value = "30")]
    pub watch_interval: u64,

    /// Do not read credentials Secrets through the Kubernetes API
    #[arg(long)]
    pub no_kube: bool,
}

impl ServeArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            port: self.port,
            tls_cert_file: self.tls_cert_file.clone(),
            tls_key_file: self.tls_key_file.clone(),
            log_level: self.log_level.clone(),
        }
    }
}

/// Runs the serve command until SIGINT or SIGTERM.
pub async fn run(args: ServeArgs) -> Result<()> {
    let source = args.config.source().with_overrides(args.overrides());
    let config = source.load().context("failed to load configuration")?;
    let snapshot = Snapshot::build(&config).context("failed to build size resolver")?;

    info!(
        config = %source.config_path.display(),
        policies = snapshot.config.policies.len(),
        resolver = snapshot.resolver.name(),
        proxy = snapshot.config.proxy_url.is_some(),
        "Configuration loaded"
    );

    let state = Arc::new(SnapshotHandle::new(snapshot));
    let credentials = credential_resolver(args.no_kube).await;

    let watcher = (args.watch_interval > 0).then(|| {
        ConfigWatcher::new(
            source,
            Arc::clone(&state),
            Duration::from_secs(args.watch_interval),
        )
        .spawn()
    });

    let app = router(
        AdmissionHandler::new(state, credentials),
        config.max_concurrent_requests,
    );
    let options = ServerOptions {
        addr: SocketAddr::from(([0, 0, 0, 0], config.port)),
        tls: (!args.insecure_http).then(|| (config.tls_cert_file.clone(), config.tls_key_file.clone())),
    };

    let result = serve(app, options, shutdown_signal()).await;
    if let Some(watcher) = watcher {
        watcher.abort();
    }
    result.context("webhook server failed")
}

/// Builds the credential resolver, with Secret lookups when a cluster client is available.
async fn credential_resolver(no_kube: bool) -> CredentialResolver {
    if no_kube {
        info!("Kubernetes Secret lookup disabled");
        return CredentialResolver::static_only();
    }
    match kube::Client::try_default().await {
        Ok(client) => {
            info!("Kubernetes client ready; Secret lookup enabled");
            CredentialResolver::new(Some(Arc::new(KubeSecretStore::new(client))))
        }
        Err(e) => {
            warn!(error = %e, "No Kubernetes client; Secret lookup disabled");
            CredentialResolver::static_only()
        }
    }
}
