//! Validate-config command implementation.

use anyhow::{Context, Result};
use clap::Args;
use gatekeeper_core::{format_mb, ConfigSnapshot};
use tracing::info;

use super::ConfigArgs;

/// Arguments for the validate-config command.
#[derive(Args)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Fail if any namespace pattern had to be dropped
    #[arg(long)]
    pub strict: bool,
}

/// Runs the validate-config command.
pub fn run(args: &ValidateArgs) -> Result<()> {
    info!(path = ?args.config.config, "Validating configuration");

    let config = args
        .config
        .source()
        .load()
        .with_context(|| format!("invalid configuration {}", args.config.config.display()))?;
    let snapshot = ConfigSnapshot::compile(&config);

    println!("Image Size Gatekeeper Config");
    println!("============================");
    println!("Path: {}", args.config.config.display());
    println!();
    println!("{}", summary(&snapshot));

    if !snapshot.dropped_patterns.is_empty() {
        println!("\nDropped patterns (invalid regex):");
        for pattern in &snapshot.dropped_patterns {
            println!("✗ {pattern}");
        }
        if args.strict {
            anyhow::bail!("{} namespace patterns failed to compile", snapshot.dropped_patterns.len());
        }
    }

    println!("\n✓ Configuration is valid");
    Ok(())
}

/// Renders the effective settings and the policy table in lookup order.
fn summary(snapshot: &ConfigSnapshot) -> String {
    let mut out = vec![
        format!("Resolver:  {}", snapshot.size_resolver),
        format!(
            "Proxy:     {}",
            snapshot.proxy_url.as_deref().unwrap_or("none")
        ),
        format!(
            "Timeouts:  registry {}s, admission {}s",
            snapshot.registry_timeout.as_secs(),
            snapshot.admission_timeout.as_secs()
        ),
    ];

    let hosts: Vec<&str> = snapshot.credentials.iter().map(|c| c.registry.as_str()).collect();
    out.push(format!(
        "Credentials: {}",
        if hosts.is_empty() { "none".to_string() } else { hosts.join(", ") }
    ));

    for rewrite in snapshot.rewrites.iter() {
        out.push(format!(
            "Rewrite:   {} -> {}",
            rewrite.user_registry, rewrite.actual_registry
        ));
    }

    out.push(String::new());
    if snapshot.policies.is_empty() {
        out.push("No namespace restrictions: every Pod is allowed".to_string());
        return out.join("\n");
    }

    out.push(format!(
        "{:<4} {:<32} {:<6} {:<8} {:>12}  {}",
        "#", "PATTERN", "KIND", "ENABLED", "LIMIT", "ORIGINAL-REGISTRY"
    ));
    for (index, policy) in snapshot.policies.iter().enumerate() {
        out.push(format!(
            "{:<4} {:<32} {:<6} {:<8} {:>12}  {}",
            index + 1,
            policy.pattern(),
            if policy.matcher.is_regex() { "regex" } else { "exact" },
            policy.enabled,
            format_mb(policy.max_size_bytes),
            if policy.require_original_registry { "required" } else { "-" }
        ));
    }
    out.join("\n")
}
