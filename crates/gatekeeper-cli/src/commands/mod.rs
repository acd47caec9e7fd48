//! CLI commands and argument parsing.

pub mod inspect;
pub mod serve;
pub mod validate;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use gatekeeper_webhook::{
    load_config_file, ConfigSource, DEFAULT_CONFIG_PATH, DEFAULT_SECRETS_DIR,
};

/// Image Size Gatekeeper - admission webhook enforcing per-namespace image size limits
#[derive(Parser)]
#[command(name = "image-size-gatekeeper")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Run the admission webhook server
    Serve(serve::ServeArgs),

    /// Resolve the size of one image using the loaded configuration
    Inspect(inspect::InspectArgs),

    /// Load a configuration and print the effective policy table
    ValidateConfig(validate::ValidateArgs),

    /// Print version information
    Version,
}

impl Commands {
    /// Returns the log level to use when `RUST_LOG` is unset.
    pub fn log_level(&self) -> String {
        match self {
            Self::Serve(args) => args
                .log_level
                .clone()
                .unwrap_or_else(|| args.config.configured_log_level()),
            Self::Inspect(args) => args.config.configured_log_level(),
            Self::ValidateConfig(args) => args.config.configured_log_level(),
            Self::Version => "warn".to_string(),
        }
    }
}

/// Where the configuration is read from.
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Path to the configuration file (JSON, or YAML for .yaml/.yml)
    #[arg(short, long, env = "GATEKEEPER_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Directory with mounted secrets (proxy-url, registry-credentials/)
    #[arg(long, env = "GATEKEEPER_SECRETS_DIR", default_value = DEFAULT_SECRETS_DIR)]
    pub secrets_dir: PathBuf,

    /// Ignore the secrets directory
    #[arg(long)]
    pub no_secrets_dir: bool,
}

impl ConfigArgs {
    /// Builds the configuration source these arguments describe.
    pub fn source(&self) -> ConfigSource {
        ConfigSource::new(&self.config)
            .with_secrets_dir((!self.no_secrets_dir).then(|| self.secrets_dir.clone()))
    }

    /// Reads `logLevel` from the config file, before logging is set up.
    fn configured_log_level(&self) -> String {
        load_config_file(&self.config)
            .map(|config| config.log_level)
            .unwrap_or_else(|_| "info".to_string())
    }
}
