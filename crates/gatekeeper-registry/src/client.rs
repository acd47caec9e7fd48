//! Registry v2 API client used to size images.
//!
//! A lookup fetches the image manifest, answering at most one authentication
//! challenge, and sums the declared config and layer sizes. Manifest lists
//! are resolved to one platform entry with a second fetch that reuses the
//! authorization obtained for the first.

use async_trait::async_trait;
use gatekeeper_core::{Credential, ImageRef, ImageSize};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};
use reqwest::{Response, StatusCode};
use tracing::{debug, warn};

use crate::auth::{basic_authorization, Challenge, TokenResponse};
use crate::config::RegistryClientConfig;
use crate::error::RegistryError;
use crate::oci::{ErrorResponse, Manifest, ManifestDocument, MediaType};
use crate::resolver::SizeResolver;

/// Client for the OCI / Docker registry v2 HTTP API.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    config: RegistryClientConfig,
    http: reqwest::Client,
}

/// Per-lookup state shared by the manifest fetches of one image.
struct Lookup<'a> {
    image: &'a ImageRef,
    credential: Option<&'a Credential>,
    base_url: String,
    authorization: Option<String>,
    challenged: bool,
}

impl RegistryClient {
    /// Creates a new registry client with the given configuration.
    ///
    /// An unparseable proxy URL is logged and ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use gatekeeper_registry::{RegistryClient, RegistryClientConfig};
    ///
    /// let client = RegistryClient::new(RegistryClientConfig::new())?;
    /// # Ok::<(), gatekeeper_registry::RegistryError>(())
    /// ```
    pub fn new(config: RegistryClientConfig) -> Result<Self, RegistryError> {
        let http = Self::build_http_client(&config)?;
        Ok(Self { config, http })
    }

    /// Returns the client configuration.
    #[must_use]
    pub const fn config(&self) -> &RegistryClientConfig {
        &self.config
    }

    /// Returns the base URL requests for `registry` are sent to.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use gatekeeper_registry::{RegistryClient, RegistryClientConfig};
    ///
    /// let client = RegistryClient::new(RegistryClientConfig::new())?;
    /// assert_eq!(client.base_url("docker.io"), "https://registry-1.docker.io");
    /// # Ok::<(), gatekeeper_registry::RegistryError>(())
    /// ```
    #[must_use]
    pub fn base_url(&self, registry: &str) -> String {
        let host = self.config.rewrites.resolve(registry);
        format!("{}://{host}", self.config.scheme_for(host))
    }

    /// Fetches the single-platform manifest for an image.
    ///
    /// # Errors
    ///
    /// Returns an error classified by [`RegistryError::kind`] when the
    /// registry cannot be reached, refuses access, has no such manifest, or
    /// answers outside the protocol.
    pub async fn fetch_manifest(
        &self,
        image: &ImageRef,
        credential: Option<&Credential>,
    ) -> Result<Manifest, RegistryError> {
        let mut lookup = Lookup {
            image,
            credential,
            base_url: self.base_url(&image.registry),
            authorization: None,
            challenged: false,
        };

        match self.fetch_document(&mut lookup, image.reference.as_str()).await? {
            ManifestDocument::Image(manifest) => Ok(manifest),
            ManifestDocument::Index(index) => {
                let entry = index
                    .select(&self.config.platform)
                    .ok_or_else(|| RegistryError::InvalidManifest {
                        image: image.to_string(),
                        message: "manifest list has no entries".to_string(),
                    })?;
                let digest = entry.digest.clone();
                debug!(
                    registry = %image.registry,
                    image = %image,
                    digest = %digest,
                    "Resolved manifest list entry"
                );

                match self.fetch_document(&mut lookup, &digest).await? {
                    ManifestDocument::Image(manifest) => Ok(manifest),
                    ManifestDocument::Index(_) => Err(RegistryError::InvalidManifest {
                        image: image.to_string(),
                        message: format!("manifest list entry {digest} is itself a list"),
                    }),
                }
            }
        }
    }

    /// Fetches one manifest, answering the first authentication challenge.
    async fn fetch_document(
        &self,
        lookup: &mut Lookup<'_>,
        reference: &str,
    ) -> Result<ManifestDocument, RegistryError> {
        let url = format!(
            "{}/v2/{}/manifests/{reference}",
            lookup.base_url, lookup.image.repository
        );

        let mut response = self.get_manifest(&url, lookup.authorization.as_deref()).await?;

        if response.status() == StatusCode::UNAUTHORIZED && !lookup.challenged {
            lookup.challenged = true;
            let header = response
                .headers()
                .get(WWW_AUTHENTICATE)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| RegistryError::InvalidChallenge {
                    message: format!("401 from {url} without Www-Authenticate"),
                })?;
            let challenge = Challenge::parse(header)?;
            debug!(registry = %lookup.image.registry, ?challenge, "Registry requested authentication");

            lookup.authorization = Some(self.authorize(&challenge, lookup).await?);
            response = self.get_manifest(&url, lookup.authorization.as_deref()).await?;
        }

        Self::read_document(response, lookup.image).await
    }

    async fn get_manifest(
        &self,
        url: &str,
        authorization: Option<&str>,
    ) -> Result<Response, RegistryError> {
        let mut request = self
            .http
            .get(url)
            .header(ACCEPT, MediaType::accept_header());
        if let Some(authorization) = authorization {
            request = request.header(AUTHORIZATION, authorization);
        }
        debug!(url, authenticated = authorization.is_some(), "Fetching manifest");
        Ok(request.send().await?)
    }

    /// Produces an `Authorization` header value for a challenge.
    async fn authorize(
        &self,
        challenge: &Challenge,
        lookup: &Lookup<'_>,
    ) -> Result<String, RegistryError> {
        match challenge {
            Challenge::Basic { .. } => lookup.credential.map(basic_authorization).ok_or_else(|| {
                RegistryError::Unauthorized {
                    registry: lookup.image.registry.clone(),
                    message: "registry requires basic credentials and none are configured"
                        .to_string(),
                }
            }),
            Challenge::Bearer { realm, .. } => {
                let token_url = challenge.token_url(&lookup.image.repository)?;
                let mut request = self.http.get(token_url.clone());
                if let Some(credential) = lookup.credential {
                    request = request.header(AUTHORIZATION, basic_authorization(credential));
                }
                debug!(
                    registry = %lookup.image.registry,
                    url = %token_url,
                    with_credentials = lookup.credential.is_some(),
                    "Requesting bearer token"
                );

                let response = request.send().await?;
                let status = response.status();
                if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                    return Err(RegistryError::Unauthorized {
                        registry: lookup.image.registry.clone(),
                        message: format!("token endpoint {realm} answered {status}"),
                    });
                }
                if !status.is_success() {
                    return Err(RegistryError::HttpError {
                        status: status.as_u16(),
                        message: ErrorResponse::summarize(&response.text().await.unwrap_or_default()),
                    });
                }

                let body = response.bytes().await?;
                let token: TokenResponse = serde_json::from_slice(&body)?;
                let token = token.into_token().ok_or_else(|| RegistryError::MissingToken {
                    realm: realm.clone(),
                })?;
                Ok(format!("Bearer {token}"))
            }
        }
    }

    /// Classifies a manifest response and parses its body.
    async fn read_document(
        response: Response,
        image: &ImageRef,
    ) -> Result<ManifestDocument, RegistryError> {
        let status = response.status();
        match status {
            s if s.is_success() => {
                let content_type = response
                    .headers()
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(ToString::to_string);
                let body = response.bytes().await?;
                ManifestDocument::parse(&body, content_type.as_deref()).map_err(|err| {
                    RegistryError::InvalidManifest {
                        image: image.to_string(),
                        message: err.to_string(),
                    }
                })
            }
            StatusCode::NOT_FOUND => Err(RegistryError::NotFound {
                image: image.to_string(),
            }),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(RegistryError::Unauthorized {
                registry: image.registry.clone(),
                message: format!(
                    "{status}: {}",
                    ErrorResponse::summarize(&response.text().await.unwrap_or_default())
                ),
            }),
            _ => Err(RegistryError::HttpError {
                status: status.as_u16(),
                message: ErrorResponse::summarize(&response.text().await.unwrap_or_default()),
            }),
        }
    }

    /// Builds the HTTP client with proper configuration.
    fn build_http_client(config: &RegistryClientConfig) -> Result<reqwest::Client, RegistryError> {
        let mut builder = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent);

        builder = match config.proxy_url.as_deref() {
            Some(proxy_url) => match reqwest::Proxy::all(proxy_url) {
                Ok(proxy) => builder.proxy(proxy),
                Err(e) => {
                    warn!(proxy = proxy_url, error = %e, "Ignoring unparseable proxy URL");
                    builder.no_proxy()
                }
            },
            None => builder.no_proxy(),
        };

        builder
            .build()
            .map_err(|source| RegistryError::ClientBuild { source })
    }
}

#[async_trait]
impl SizeResolver for RegistryClient {
    async fn size_of(
        &self,
        image: &ImageRef,
        credential: Option<&Credential>,
    ) -> Result<ImageSize, RegistryError> {
        let manifest = self.fetch_manifest(image, credential).await?;
        let size = manifest.total_size();
        debug!(
            registry = %image.registry,
            image = %image,
            layers = manifest.layers.len(),
            size_bytes = size,
            "Computed image size from manifest"
        );
        Ok(ImageSize::accurate(size))
    }

    fn name(&self) -> &'static str {
        "direct"
    }

    fn endpoint(&self, registry: &str) -> String {
        self.base_url(registry)
    }
}
