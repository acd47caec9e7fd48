//! Inspect command: resolves one image the way the webhook would.

use anyhow::{Context, Result};
use clap::Args;
use gatekeeper_core::{format_mb, ImageRef, ImageSize, NamespacePolicy};
use gatekeeper_webhook::{CredentialResolver, Snapshot};
use serde::Serialize;
use tracing::info;

use super::ConfigArgs;

/// Arguments for the inspect command.
#[derive(Args)]
pub struct InspectArgs {
    /// Image reference as written in a Pod spec
    pub image: String,

    #[command(flatten)]
    pub config: ConfigArgs,

    /// Namespace whose policy the image is checked against
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Registry the image is originally pulled from
    #[arg(long)]
    pub original_registry: Option<String>,

    /// Output format: text, json
    #[arg(long, default_value = "text")]
    pub output: String,
}

/// Outcome of checking an image against a namespace policy.
#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PolicyCheck {
    namespace: String,
    limit_bytes: Option<u64>,
    allowed: bool,
}

impl PolicyCheck {
    fn evaluate(namespace: &str, policy: Option<&NamespacePolicy>, effective_bytes: u64) -> Self {
        Self {
            namespace: namespace.to_string(),
            limit_bytes: policy.map(|p| p.max_size_bytes),
            allowed: policy.map_or(true, |p| effective_bytes <= p.max_size_bytes),
        }
    }
}

/// Everything the command reports about one image.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectReport {
    image: String,
    canonical: String,
    registry: String,
    endpoint: String,
    resolver: String,
    credentials: bool,
    size_bytes: u64,
    accurate: bool,
    effective_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    policy: Option<PolicyCheck>,
}

impl InspectReport {
    fn render_text(&self) -> String {
        let mut lines = vec![
            format!("Image:       {}", self.image),
            format!("Canonical:   {}", self.canonical),
            format!("Registry:    {}", self.registry),
            format!("Endpoint:    {}", self.endpoint),
            format!("Resolver:    {}", self.resolver),
            format!("Credentials: {}", if self.credentials { "yes" } else { "none" }),
            format!("Size:        {} ({} bytes)", format_mb(self.size_bytes), self.size_bytes),
            format!(
                "Accuracy:    {}",
                if self.accurate { "exact" } else { "estimated from compressed size" }
            ),
            format!("Effective:   {}", format_mb(self.effective_bytes)),
        ];
        if let Some(check) = &self.policy {
            let verdict = match (check.limit_bytes, check.allowed) {
                (None, _) => format!("allowed (no size limit for namespace {})", check.namespace),
                (Some(limit), true) => format!("allowed (limit {} in namespace {})", format_mb(limit), check.namespace),
                (Some(limit), false) => format!("denied (limit {} in namespace {})", format_mb(limit), check.namespace),
            };
            lines.push(format!("Verdict:     {verdict}"));
        }
        lines.join("\n")
    }
}

/// Runs the inspect command.
pub async fn run(args: &InspectArgs) -> Result<()> {
    let config = args
        .config
        .source()
        .load()
        .context("failed to load configuration")?;
    let snapshot = Snapshot::build(&config).context("failed to build size resolver")?;

    let mut reference = ImageRef::parse(&args.image)
        .with_context(|| format!("invalid image reference {}", args.image))?;
    if let Some(host) = &args.original_registry {
        reference = reference.with_registry(host.clone());
    }

    let namespace = args.namespace.as_deref().unwrap_or("default");
    let credential = CredentialResolver::static_only()
        .resolve(&snapshot.config, &reference.registry, namespace, None)
        .await;

    info!(image = %reference, resolver = snapshot.resolver.name(), "Resolving image size");
    let size = snapshot
        .resolver
        .size_of(&reference, credential.as_ref())
        .await
        .with_context(|| format!("cannot resolve size of image {}", args.image))?;

    let report = build_report(args, &snapshot, &reference, credential.is_some(), size);
    if args.output == "json" {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.render_text());
    }
    Ok(())
}

fn build_report(
    args: &InspectArgs,
    snapshot: &Snapshot,
    reference: &ImageRef,
    credentials: bool,
    size: ImageSize,
) -> InspectReport {
    let effective_bytes = size.effective_bytes();
    InspectReport {
        image: args.image.clone(),
        canonical: reference.to_string(),
        registry: reference.registry.clone(),
        endpoint: snapshot.resolver.endpoint(&reference.registry),
        resolver: snapshot.resolver.name().to_string(),
        credentials,
        size_bytes: size.size_bytes,
        accurate: size.accurate,
        effective_bytes,
        policy: args.namespace.as_deref().map(|namespace| {
            PolicyCheck::evaluate(
                namespace,
                snapshot.config.policies.limit_for(namespace),
                effective_bytes,
            )
        }),
    }
}
