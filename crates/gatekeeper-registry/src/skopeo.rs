//! Size resolution through `skopeo inspect`.

use std::process::Stdio;

use async_trait::async_trait;
use gatekeeper_core::{Credential, ImageRef, ImageSize, Reference};
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use crate::config::RegistryClientConfig;
use crate::error::RegistryError;
use crate::resolver::SizeResolver;

const DEFAULT_PROGRAM: &str = "skopeo";

/// Resolves sizes by running `skopeo inspect`.
///
/// Uses the same rewrites, proxy and deadline as the direct client. When
/// every layer declares an uncompressed size the result is accurate;
/// otherwise the compressed sum is returned for the caller to estimate from.
#[derive(Debug, Clone)]
pub struct SkopeoResolver {
    config: RegistryClientConfig,
    program: String,
}

#[derive(Debug, Deserialize)]
struct InspectOutput {
    #[serde(rename = "LayersData")]
    layers_data: Option<Vec<LayerData>>,
}

#[derive(Debug, Deserialize)]
struct LayerData {
    #[serde(rename = "Size")]
    size: u64,
    #[serde(rename = "UncompressedSize", default)]
    uncompressed_size: Option<u64>,
}

impl SkopeoResolver {
    /// Creates a resolver that runs `skopeo` from `PATH`.
    #[must_use]
    pub fn new(config: RegistryClientConfig) -> Self {
        Self {
            config,
            program: DEFAULT_PROGRAM.to_string(),
        }
    }

    /// Overrides the program to run.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Returns the `docker://` transport reference for an image.
    #[must_use]
    pub fn transport_reference(&self, image: &ImageRef) -> String {
        let host = self
            .config
            .rewrites
            .rewrite(&image.registry)
            .unwrap_or(image.registry.as_str());
        let suffix = match &image.reference {
            Reference::Tag(tag) => format!(":{tag}"),
            Reference::Digest(digest) => format!("@{digest}"),
        };
        format!("docker://{host}/{}{suffix}", image.repository)
    }

    fn command(&self, image: &ImageRef, credential: Option<&Credential>) -> Command {
        let mut command = Command::new(&self.program);
        command.arg("inspect");
        if let Some(credential) = credential {
            command
                .arg("--creds")
                .arg(format!("{}:{}", credential.username, credential.password));
        }
        let host = self.config.rewrites.resolve(&image.registry);
        if self.config.scheme_for(host) == "http" {
            command.arg("--tls-verify=false");
        }
        command.arg(self.transport_reference(image));

        if let Some(proxy) = &self.config.proxy_url {
            for name in ["HTTP_PROXY", "HTTPS_PROXY", "http_proxy", "https_proxy"] {
                command.env(name, proxy);
            }
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

/// Maps tool output on failure to an error.
fn classify_failure(program: &str, image: &ImageRef, stderr: &str) -> RegistryError {
    let lowered = stderr.to_ascii_lowercase();
    if lowered.contains("unauthorized") || lowered.contains("forbidden") {
        RegistryError::Unauthorized {
            registry: image.registry.clone(),
            message: stderr.trim().to_string(),
        }
    } else if lowered.contains("manifest unknown") || lowered.contains("not found") {
        RegistryError::NotFound {
            image: image.to_string(),
        }
    } else {
        RegistryError::ToolFailed {
            program: program.to_string(),
            message: stderr.trim().to_string(),
        }
    }
}

/// Sums layer sizes from `skopeo inspect` JSON output.
fn parse_output(image: &ImageRef, stdout: &[u8]) -> Result<ImageSize, RegistryError> {
    let output: InspectOutput =
        serde_json::from_slice(stdout).map_err(|e| RegistryError::InvalidManifest {
            image: image.to_string(),
            message: format!("unparseable inspect output: {e}"),
        })?;
    let layers = output.layers_data.ok_or_else(|| RegistryError::InvalidManifest {
        image: image.to_string(),
        message: "inspect output has no LayersData".to_string(),
    })?;

    let uncompressed: Option<u64> = layers
        .iter()
        .map(|layer| layer.uncompressed_size)
        .try_fold(0u64, |total, size| size.map(|s| total.saturating_add(s)));

    match uncompressed {
        Some(total) if !layers.is_empty() => Ok(ImageSize::accurate(total)),
        _ => Ok(ImageSize::estimated(
            layers
                .iter()
                .fold(0u64, |total, layer| total.saturating_add(layer.size)),
        )),
    }
}

#[async_trait]
impl SizeResolver for SkopeoResolver {
    async fn size_of(
        &self,
        image: &ImageRef,
        credential: Option<&Credential>,
    ) -> Result<ImageSize, RegistryError> {
        let target = self.transport_reference(image);
        debug!(registry = %image.registry, target = %target, "Running skopeo inspect");

        let output = tokio::time::timeout(
            self.config.timeout,
            self.command(image, credential).output(),
        )
        .await
        .map_err(|_| RegistryError::Timeout {
            target: target.clone(),
        })?
        .map_err(|source| RegistryError::ToolSpawn {
            program: self.program.clone(),
            source,
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(&self.program, image, &stderr));
        }

        parse_output(image, &output.stdout)
    }

    fn name(&self) -> &'static str {
        "skopeo"
    }

    fn endpoint(&self, registry: &str) -> String {
        let host = self.config.rewrites.rewrite(registry).unwrap_or(registry);
        format!("docker://{host}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResolveErrorKind;
    use gatekeeper_core::{RegistryRewrite, RegistryRewrites};

    fn image(s: &str) -> ImageRef {
        ImageRef::parse(s).unwrap()
    }

    #[test]
    fn test_transport_reference() {
        let resolver = SkopeoResolver::new(RegistryClientConfig::new().with_rewrites(
            RegistryRewrites::new(vec![RegistryRewrite::new("mirror.corp", "ghcr.io")]),
        ));
        assert_eq!(
            resolver.transport_reference(&image("nginx:1.21")),
            "docker://docker.io/library/nginx:1.21"
        );
        let digest = format!("sha256:{}", "a".repeat(64));
        assert_eq!(
            resolver.transport_reference(&image(&format!("mirror.corp/team/app@{digest}"))),
            format!("docker://ghcr.io/team/app@{digest}")
        );
    }

    #[test]
    fn test_parse_uncompressed_sizes() {
        let out = br#"{"Name":"x","LayersData":[{"Size":10,"UncompressedSize":30},{"Size":5,"UncompressedSize":12}]}"#;
        let size = parse_output(&image("nginx"), out).unwrap();
        assert_eq!(size, ImageSize::accurate(42));
    }

    #[test]
    fn test_parse_compressed_sizes() {
        let out = br#"{"LayersData":[{"Size":10,"UncompressedSize":30},{"Size":5}]}"#;
        let size = parse_output(&image("nginx"), out).unwrap();
        assert_eq!(size, ImageSize::estimated(15));
    }

    #[test]
    fn test_parse_garbage() {
        let err = parse_output(&image("nginx"), b"not json").unwrap_err();
        assert_eq!(err.kind(), ResolveErrorKind::ProtocolError);
        let err = parse_output(&image("nginx"), b"{}").unwrap_err();
        assert_eq!(err.kind(), ResolveErrorKind::ProtocolError);
    }

    #[test]
    fn test_classify_failure() {
        let img = image("ghcr.io/team/app:1");
        let kind = |stderr: &str| classify_failure("skopeo", &img, stderr).kind();
        assert_eq!(kind("FATA[0001] ... unauthorized: authentication required"), ResolveErrorKind::Unauthorized);
        assert_eq!(kind("requested access to the resource is denied: Forbidden"), ResolveErrorKind::Unauthorized);
        assert_eq!(kind("manifest unknown: manifest unknown"), ResolveErrorKind::NotFound);
        assert_eq!(kind("repository not found"), ResolveErrorKind::NotFound);
        assert_eq!(kind("something else"), ResolveErrorKind::ProtocolError);
    }

    #[tokio::test]
    async fn test_missing_program_is_transport_error() {
        let resolver = SkopeoResolver::new(RegistryClientConfig::new())
            .with_program("/nonexistent/skopeo-for-tests");
        let err = resolver.size_of(&image("nginx"), None).await.unwrap_err();
        assert_eq!(err.kind(), ResolveErrorKind::Transport);
    }
}
