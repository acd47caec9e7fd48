//! Registry v2 manifest types.
//!
//! This module defines the subset of the Docker v2 and OCI image manifest
//! formats needed to compute an image's size: single-platform manifests
//! (config plus layers) and multi-platform manifest lists / image indexes.

use serde::{Deserialize, Serialize};

use crate::error::RegistryError;

/// Manifest media types understood by the client.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaType(String);

impl MediaType {
    /// Docker image manifest, schema 2.
    pub const DOCKER_MANIFEST: &'static str = "application/vnd.docker.distribution.manifest.v2+json";

    /// Docker manifest list.
    pub const DOCKER_MANIFEST_LIST: &'static str =
        "application/vnd.docker.distribution.manifest.list.v2+json";

    /// OCI image manifest media type.
    pub const OCI_MANIFEST: &'static str = "application/vnd.oci.image.manifest.v1+json";

    /// OCI image index media type.
    pub const OCI_INDEX: &'static str = "application/vnd.oci.image.index.v1+json";

    /// Creates a new media type.
    #[must_use]
    pub fn new(media_type: impl Into<String>) -> Self {
        Self(media_type.into())
    }

    /// Returns the media type string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true for manifest lists and image indexes.
    #[must_use]
    pub fn is_index(&self) -> bool {
        let essence = self.0.split(';').next().unwrap_or_default().trim();
        essence == Self::DOCKER_MANIFEST_LIST || essence == Self::OCI_INDEX
    }

    /// `Accept` header value for manifest requests, in preference order.
    ///
    /// Listing the index types keeps registries from falling back to schema 1
    /// for multi-platform tags.
    #[must_use]
    pub fn accept_header() -> String {
        [
            Self::DOCKER_MANIFEST,
            Self::DOCKER_MANIFEST_LIST,
            Self::OCI_MANIFEST,
            Self::OCI_INDEX,
        ]
        .join(", ")
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for MediaType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl Serialize for MediaType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for MediaType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Self(s))
    }
}

/// Target platform of a manifest list entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    /// CPU architecture (`amd64`, `arm64`, ...).
    pub architecture: String,

    /// Operating system (`linux`, `windows`, ...).
    pub os: String,

    /// Optional CPU variant (`v8`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl Platform {
    /// Creates a platform.
    #[must_use]
    pub fn new(os: impl Into<String>, architecture: impl Into<String>) -> Self {
        Self {
            architecture: architecture.into(),
            os: os.into(),
            variant: None,
        }
    }

    /// The platform chosen from manifest lists unless configured otherwise.
    #[must_use]
    pub fn linux_amd64() -> Self {
        Self::new("linux", "amd64")
    }

    fn matches(&self, other: &Self) -> bool {
        self.os == other.os
            && self.architecture == other.architecture
            && (self.variant.is_none() || self.variant == other.variant)
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::linux_amd64()
    }
}

/// Content descriptor.
///
/// A descriptor describes the disposition of targeted content. It includes
/// the type of the content, a content identifier (digest), and the byte-size
/// of the raw content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// Media type of the referenced content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<MediaType>,

    /// Digest of the targeted content.
    pub digest: String,

    /// Size in bytes of the content.
    pub size: u64,

    /// Platform, present on manifest list entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
}

impl Descriptor {
    /// Creates a new descriptor.
    #[must_use]
    pub fn new(media_type: &str, digest: impl Into<String>, size: u64) -> Self {
        Self {
            media_type: Some(MediaType::new(media_type)),
            digest: digest.into(),
            size,
            platform: None,
        }
    }

    /// Sets the platform.
    #[must_use]
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }
}

/// Single-platform image manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Schema version (always 2).
    pub schema_version: u32,

    /// Media type of this manifest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<MediaType>,

    /// Image configuration blob.
    pub config: Descriptor,

    /// Layers that make up the image.
    pub layers: Vec<Descriptor>,
}

impl Manifest {
    /// Creates a Docker v2 manifest.
    ///
    /// # Examples
    ///
    /// ```
    /// use gatekeeper_registry::{Descriptor, Manifest, MediaType};
    ///
    /// let config = Descriptor::new(MediaType::OCI_MANIFEST, "sha256:c", 7);
    /// let layer = Descriptor::new(MediaType::OCI_MANIFEST, "sha256:l", 20);
    /// let manifest = Manifest::new(config, vec![layer]);
    /// assert_eq!(manifest.total_size(), 27);
    /// ```
    #[must_use]
    pub fn new(config: Descriptor, layers: Vec<Descriptor>) -> Self {
        Self {
            schema_version: 2,
            media_type: Some(MediaType::new(MediaType::DOCKER_MANIFEST)),
            config,
            layers,
        }
    }

    /// Returns the config blob size plus the sum of layer sizes.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.layers
            .iter()
            .fold(self.config.size, |total, layer| total.saturating_add(layer.size))
    }
}

/// Multi-platform manifest list or image index.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageIndex {
    /// Schema version (always 2).
    pub schema_version: u32,

    /// Media type of this index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<MediaType>,

    /// Per-platform manifests.
    #[serde(default)]
    pub manifests: Vec<Descriptor>,
}

impl ImageIndex {
    /// Creates a Docker manifest list.
    #[must_use]
    pub fn new(manifests: Vec<Descriptor>) -> Self {
        Self {
            schema_version: 2,
            media_type: Some(MediaType::new(MediaType::DOCKER_MANIFEST_LIST)),
            manifests,
        }
    }

    /// Picks the entry for `platform`, falling back to the first entry.
    #[must_use]
    pub fn select(&self, platform: &Platform) -> Option<&Descriptor> {
        self.manifests
            .iter()
            .find(|entry| entry.platform.as_ref().is_some_and(|p| platform.matches(p)))
            .or_else(|| self.manifests.first())
    }
}

/// A manifest response body, classified by media type.
#[derive(Debug, Clone)]
pub enum ManifestDocument {
    /// Single-platform manifest.
    Image(Manifest),
    /// Manifest list or image index.
    Index(ImageIndex),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MediaTypeProbe {
    #[serde(default)]
    media_type: Option<MediaType>,
    #[serde(default)]
    manifests: Option<serde_json::Value>,
}

impl ManifestDocument {
    /// Parses a manifest body.
    ///
    /// The body's `mediaType` decides the kind; the `Content-Type` header is
    /// consulted when the body carries none.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::JsonError`] if the body does not match the
    /// detected kind.
    pub fn parse(body: &[u8], content_type: Option<&str>) -> Result<Self, RegistryError> {
        let probe: MediaTypeProbe = serde_json::from_slice(body)?;
        let is_index = match (&probe.media_type, content_type) {
            (Some(media_type), _) => media_type.is_index(),
            (None, Some(header)) => MediaType::new(header).is_index(),
            // OCI indexes may omit mediaType entirely.
            (None, None) => probe.manifests.is_some(),
        };

        if is_index {
            Ok(Self::Index(serde_json::from_slice(body)?))
        } else {
            Ok(Self::Image(serde_json::from_slice(body)?))
        }
    }
}

/// Error response from registry API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// List of errors.
    #[serde(default)]
    pub errors: Vec<RegistryApiError>,
}

impl ErrorResponse {
    /// Summarizes the errors as `CODE: message` pairs, or returns the raw body.
    #[must_use]
    pub fn summarize(body: &str) -> String {
        match serde_json::from_str::<Self>(body) {
            Ok(response) if !response.errors.is_empty() => response
                .errors
                .iter()
                .map(|e| format!("{}: {}", e.code, e.message))
                .collect::<Vec<_>>()
                .join("; "),
            _ => body.trim().chars().take(200).collect(),
        }
    }
}

/// Individual error from registry API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryApiError {
    /// Error code.
    pub code: String,

    /// Human-readable message.
    #[serde(default)]
    pub message: String,

    /// Additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: u64 = 1024 * 1024;

    #[test]
    fn test_manifest_total_size() {
        let json = format!(
            r#"{{
                "schemaVersion": 2,
                "mediaType": "{}",
                "config": {{"mediaType": "application/vnd.docker.container.image.v1+json", "digest": "sha256:c", "size": {}}},
                "layers": [
                    {{"mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip", "digest": "sha256:a", "size": {}}},
                    {{"mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip", "digest": "sha256:b", "size": {}}},
                    {{"mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip", "digest": "sha256:d", "size": {}}}
                ]
            }}"#,
            MediaType::DOCKER_MANIFEST,
            7 * MB,
            20 * MB,
            30 * MB,
            40 * MB
        );
        let ManifestDocument::Image(manifest) = ManifestDocument::parse(json.as_bytes(), None).unwrap()
        else {
            panic!("expected image manifest");
        };
        assert_eq!(manifest.total_size(), 97 * MB);
    }

    #[test]
    fn test_index_detected_from_body() {
        let json = r#"{
            "schemaVersion": 2,
            "mediaType": "application/vnd.docker.distribution.manifest.list.v2+json",
            "manifests": [
                {"digest": "sha256:arm", "size": 1, "platform": {"architecture": "arm64", "os": "linux"}},
                {"digest": "sha256:amd", "size": 1, "platform": {"architecture": "amd64", "os": "linux"}}
            ]
        }"#;
        let ManifestDocument::Index(index) = ManifestDocument::parse(json.as_bytes(), None).unwrap()
        else {
            panic!("expected index");
        };
        assert_eq!(index.select(&Platform::linux_amd64()).unwrap().digest, "sha256:amd");
    }

    #[test]
    fn test_index_detected_from_content_type() {
        let json = r#"{"schemaVersion": 2, "manifests": []}"#;
        let doc = ManifestDocument::parse(
            json.as_bytes(),
            Some("application/vnd.oci.image.index.v1+json; charset=utf-8"),
        )
        .unwrap();
        assert!(matches!(doc, ManifestDocument::Index(ref i) if i.manifests.is_empty()));
    }

    #[test]
    fn test_select_falls_back_to_first() {
        let index = ImageIndex::new(vec![
            Descriptor::new(MediaType::DOCKER_MANIFEST, "sha256:first", 1)
                .with_platform(Platform::new("linux", "s390x")),
            Descriptor::new(MediaType::DOCKER_MANIFEST, "sha256:second", 1)
                .with_platform(Platform::new("windows", "amd64")),
        ]);
        assert_eq!(index.select(&Platform::linux_amd64()).unwrap().digest, "sha256:first");
        assert!(ImageIndex::new(vec![]).select(&Platform::linux_amd64()).is_none());
    }

    #[test]
    fn test_malformed_manifest() {
        let json = r#"{"schemaVersion": 2, "layers": "nope"}"#;
        let err = ManifestDocument::parse(json.as_bytes(), None).unwrap_err();
        assert!(matches!(err, RegistryError::JsonError { .. }));
    }

    #[test]
    fn test_accept_header_order() {
        let accept = MediaType::accept_header();
        assert!(accept.starts_with(MediaType::DOCKER_MANIFEST));
        assert!(accept.ends_with(MediaType::OCI_INDEX));
    }

    #[test]
    fn test_error_response_summary() {
        let body = r#"{"errors":[{"code":"MANIFEST_UNKNOWN","message":"manifest unknown"}]}"#;
        assert_eq!(ErrorResponse::summarize(body), "MANIFEST_UNKNOWN: manifest unknown");
        assert_eq!(ErrorResponse::summarize("plain text"), "plain text");
    }
}
