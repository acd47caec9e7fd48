//! Container image reference parsing.
//!
//! Image strings as they appear in a Pod spec (`nginx`, `nginx:1.21`,
//! `gcr.io:5000/team/app@sha256:...`) are canonicalized into an [`ImageRef`]
//! holding the registry host, the repository path and either a tag or a
//! digest.
//!
//! Parsing is a pure function of the input string.

use std::fmt;
use std::str::FromStr;

use crate::error::ReferenceError;

/// Registry assumed when the image string names none.
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// Tag assumed when the image string carries neither tag nor digest.
pub const DEFAULT_TAG: &str = "latest";

/// Namespace of official images on the default registry.
const OFFICIAL_NAMESPACE: &str = "library";

const MAX_TAG_LEN: usize = 128;

/// The tag-or-digest part of an image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Reference {
    /// A mutable tag such as `1.21` or `latest`.
    Tag(String),
    /// A content digest such as `sha256:...`.
    Digest(String),
}

impl Reference {
    /// Returns the raw tag or digest string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Tag(value) | Self::Digest(value) => value,
        }
    }

    /// Returns true if this reference is a digest.
    #[must_use]
    pub const fn is_digest(&self) -> bool {
        matches!(self, Self::Digest(_))
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A canonicalized container image reference.
///
/// # Examples
///
/// ```
/// use gatekeeper_core::{ImageRef, Reference};
///
/// let image = ImageRef::parse("nginx").unwrap();
/// assert_eq!(image.registry, "docker.io");
/// assert_eq!(image.repository, "library/nginx");
/// assert_eq!(image.reference, Reference::Tag("latest".to_string()));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageRef {
    /// Registry host, possibly with a port (`gcr.io:5000`).
    pub registry: String,

    /// Repository path within the registry (`library/nginx`).
    pub repository: String,

    /// Tag or digest.
    pub reference: Reference,
}

impl ImageRef {
    /// Parses an image string into its canonical form.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is empty, carries both a tag and a
    /// digest, or contains characters outside the reference grammar.
    pub fn parse(input: &str) -> Result<Self, ReferenceError> {
        if input.is_empty() {
            return Err(ReferenceError::Empty);
        }

        let (name_and_tag, digest) = match input.split_once('@') {
            Some((name, digest)) => (name, Some(digest)),
            None => (input, None),
        };

        // A colon followed by a path separator belongs to a registry port.
        let (name, tag) = match name_and_tag.rfind(':') {
            Some(idx) if !name_and_tag[idx + 1..].contains('/') => {
                (&name_and_tag[..idx], Some(&name_and_tag[idx + 1..]))
            }
            _ => (name_and_tag, None),
        };

        let reference = match (tag, digest) {
            (Some(_), Some(_)) => {
                return Err(ReferenceError::TagAndDigest {
                    reference: input.to_string(),
                })
            }
            (Some(tag), None) => {
                if !is_valid_tag(tag) {
                    return Err(ReferenceError::InvalidTag {
                        reference: input.to_string(),
                        tag: tag.to_string(),
                    });
                }
                Reference::Tag(tag.to_string())
            }
            (None, Some(digest)) => {
                if !is_valid_digest(digest) {
                    return Err(ReferenceError::InvalidDigest {
                        reference: input.to_string(),
                        digest: digest.to_string(),
                    });
                }
                Reference::Digest(digest.to_string())
            }
            (None, None) => Reference::Tag(DEFAULT_TAG.to_string()),
        };

        let (registry, path) = split_registry(name);

        if !is_valid_registry(registry) {
            return Err(ReferenceError::InvalidRegistry {
                reference: input.to_string(),
                registry: registry.to_string(),
            });
        }

        let repository = if registry == DEFAULT_REGISTRY && !path.contains('/') {
            format!("{OFFICIAL_NAMESPACE}/{path}")
        } else {
            path.to_string()
        };

        if !repository.split('/').all(is_valid_path_component) {
            return Err(ReferenceError::InvalidRepository {
                reference: input.to_string(),
                repository: path.to_string(),
            });
        }

        Ok(Self {
            registry: registry.to_string(),
            repository,
            reference,
        })
    }

    /// Returns a copy of this reference pointing at another registry host.
    ///
    /// Used when a Pod declares the registry its images originally came from.
    #[must_use]
    pub fn with_registry(&self, registry: impl Into<String>) -> Self {
        Self {
            registry: registry.into(),
            repository: self.repository.clone(),
            reference: self.reference.clone(),
        }
    }

    /// Returns the repository-plus-reference suffix (`library/nginx:1.21`).
    #[must_use]
    pub fn path_with_reference(&self) -> String {
        match &self.reference {
            Reference::Tag(tag) => format!("{}:{tag}", self.repository),
            Reference::Digest(digest) => format!("{}@{digest}", self.repository),
        }
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.registry, self.path_with_reference())
    }
}

impl FromStr for ImageRef {
    type Err = ReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Splits the registry host off a name, defaulting to [`DEFAULT_REGISTRY`].
fn split_registry(name: &str) -> (&str, &str) {
    match name.split_once('/') {
        Some((first, rest))
            if first.contains('.') || first.contains(':') || first == "localhost" =>
        {
            (first, rest)
        }
        _ => (DEFAULT_REGISTRY, name),
    }
}

fn is_valid_registry(registry: &str) -> bool {
    let (host, port) = if let Some(bracketed) = registry.strip_prefix('[') {
        // IPv6 literal: [addr]:port
        let Some((addr, rest)) = bracketed.split_once(']') else {
            return false;
        };
        if addr.is_empty() || !addr.chars().all(|c| c.is_ascii_hexdigit() || c == ':') {
            return false;
        }
        match rest {
            "" => return true,
            _ => match rest.strip_prefix(':') {
                Some(port) => (addr, Some(port)),
                None => return false,
            },
        }
    } else {
        match registry.split_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (registry, None),
        }
    };

    let host_ok = !host.is_empty()
        && (registry.starts_with('[')
            || host
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-'));
    let port_ok = port.map_or(true, |p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()));

    host_ok && port_ok
}

/// Validates one repository path component.
///
/// Components are lowercase alphanumerics separated by `.`, `_`, `__` or a
/// run of `-`.
fn is_valid_path_component(component: &str) -> bool {
    let bytes = component.as_bytes();
    let is_alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();

    match (bytes.first(), bytes.last()) {
        (Some(&first), Some(&last)) if is_alnum(first) && is_alnum(last) => {}
        _ => return false,
    }

    let mut i = 0;
    while i < bytes.len() {
        if is_alnum(bytes[i]) {
            i += 1;
            continue;
        }
        let start = i;
        while i < bytes.len() && !is_alnum(bytes[i]) {
            i += 1;
        }
        let separator = &component[start..i];
        let valid = matches!(separator, "." | "_" | "__") || separator.bytes().all(|b| b == b'-');
        if !valid {
            return false;
        }
    }
    true
}

fn is_valid_tag(tag: &str) -> bool {
    let mut chars = tag.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    tag.len() <= MAX_TAG_LEN
        && (first.is_ascii_alphanumeric() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

fn is_valid_digest(digest: &str) -> bool {
    let Some((algorithm, encoded)) = digest.split_once(':') else {
        return false;
    };

    let algorithm_ok = !algorithm.is_empty()
        && algorithm
            .split(['+', '.', '_', '-'])
            .all(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit()));
    let encoded_ok = !encoded.is_empty()
        && encoded
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'=' | b'_' | b'-'));

    let hex_len = match algorithm {
        "sha256" => Some(64),
        "sha512" => Some(128),
        _ => None,
    };
    let length_ok = hex_len.map_or(true, |len| {
        encoded.len() == len && encoded.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    });

    algorithm_ok && encoded_ok && length_ok
}
