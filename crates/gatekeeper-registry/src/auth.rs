//! Registry authentication handshake.
//!
//! Registries answer an anonymous manifest request with `401` and a
//! `Www-Authenticate` challenge. A `Bearer` challenge names a token endpoint
//! (`realm`) and the `service` to request a token for; a `Basic` challenge asks
//! for credentials on the manifest request itself.

use base64::Engine;
use gatekeeper_core::Credential;
use serde::Deserialize;
use url::Url;

use crate::error::RegistryError;

/// A parsed `Www-Authenticate` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Challenge {
    /// Token authentication.
    Bearer {
        /// Token endpoint URL.
        realm: String,
        /// Service the token is issued for.
        service: Option<String>,
        /// Scope the registry asked for.
        scope: Option<String>,
    },
    /// Username/password authentication on the request itself.
    Basic {
        /// Protection space.
        realm: Option<String>,
    },
}

impl Challenge {
    /// Parses a `Www-Authenticate` header value.
    ///
    /// Accepts `Bearer k="v"(, k="v")*` and `Basic realm="..."`; the scheme is
    /// case-insensitive.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidChallenge`] for unknown schemes, a
    /// malformed parameter list, or a bearer challenge without a realm.
    ///
    /// # Examples
    ///
    /// ```
    /// use gatekeeper_registry::Challenge;
    ///
    /// let challenge = Challenge::parse(
    ///     r#"Bearer realm="https://auth.example/token",service="reg.example""#,
    /// ).unwrap();
    /// assert!(matches!(challenge, Challenge::Bearer { ref realm, .. } if realm == "https://auth.example/token"));
    /// ```
    pub fn parse(header: &str) -> Result<Self, RegistryError> {
        let header = header.trim();
        let (scheme, rest) = header
            .split_once(char::is_whitespace)
            .unwrap_or((header, ""));
        let params = parse_params(rest).map_err(|message| RegistryError::InvalidChallenge {
            message: format!("{message} in '{header}'"),
        })?;
        let param = |name: &str| {
            params
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.clone())
        };

        if scheme.eq_ignore_ascii_case("bearer") {
            let realm = param("realm").ok_or_else(|| RegistryError::InvalidChallenge {
                message: format!("bearer challenge without realm: '{header}'"),
            })?;
            Ok(Self::Bearer {
                realm,
                service: param("service"),
                scope: param("scope"),
            })
        } else if scheme.eq_ignore_ascii_case("basic") {
            Ok(Self::Basic {
                realm: param("realm"),
            })
        } else {
            Err(RegistryError::InvalidChallenge {
                message: format!("unsupported scheme '{scheme}'"),
            })
        }
    }

    /// Builds the token request URL for a bearer challenge.
    ///
    /// The challenge's own scope is used when offered, otherwise pull access
    /// on `repository`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidUrl`] if the realm is not a URL, and
    /// [`RegistryError::InvalidChallenge`] when called on a basic challenge.
    pub fn token_url(&self, repository: &str) -> Result<Url, RegistryError> {
        let Self::Bearer {
            realm,
            service,
            scope,
        } = self
        else {
            return Err(RegistryError::InvalidChallenge {
                message: "basic challenge has no token endpoint".to_string(),
            });
        };

        let mut url = Url::parse(realm).map_err(|_| RegistryError::InvalidUrl { url: realm.clone() })?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(service) = service {
                query.append_pair("service", service);
            }
            let scope = scope
                .clone()
                .unwrap_or_else(|| format!("repository:{repository}:pull"));
            query.append_pair("scope", &scope);
        }
        Ok(url)
    }
}

/// Splits `k="v", k2=token` into pairs.
fn parse_params(input: &str) -> Result<Vec<(String, String)>, String> {
    let mut params = Vec::new();
    let mut chars = input.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace() || *c == ',') {
            chars.next();
        }
        if chars.peek().is_none() {
            return Ok(params);
        }

        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' || c.is_whitespace() {
                break;
            }
            if !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')) {
                return Err(format!("unexpected character '{c}' in parameter name"));
            }
            key.push(c);
            chars.next();
        }
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        if key.is_empty() || chars.next() != Some('=') {
            return Err("expected key=value parameter".to_string());
        }
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }

        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            let mut closed = false;
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    '"' => {
                        closed = true;
                        break;
                    }
                    _ => value.push(c),
                }
            }
            if !closed {
                return Err(format!("unterminated value for '{key}'"));
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c == ',' || c.is_whitespace() {
                    break;
                }
                value.push(c);
                chars.next();
            }
        }
        params.push((key, value));

        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        match chars.peek() {
            None | Some(',') => {}
            Some(c) => return Err(format!("unexpected character '{c}' after parameter")),
        }
    }
}

/// Token endpoint response body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenResponse {
    /// Docker-style token field.
    #[serde(default)]
    pub token: Option<String>,

    /// OAuth2-style token field.
    #[serde(default)]
    pub access_token: Option<String>,
}

impl TokenResponse {
    /// Returns the first non-empty token field.
    #[must_use]
    pub fn into_token(self) -> Option<String> {
        self.token
            .filter(|t| !t.is_empty())
            .or_else(|| self.access_token.filter(|t| !t.is_empty()))
    }
}

/// Formats an `Authorization: Basic` header value.
#[must_use]
pub fn basic_authorization(credential: &Credential) -> String {
    let encoded = base64::engine::general_purpose::STANDARD
        .encode(format!("{}:{}", credential.username, credential.password));
    format!("Basic {encoded}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bearer() {
        let challenge = Challenge::parse(
            r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io",scope="repository:library/nginx:pull""#,
        )
        .unwrap();
        assert_eq!(
            challenge,
            Challenge::Bearer {
                realm: "https://auth.docker.io/token".to_string(),
                service: Some("registry.docker.io".to_string()),
                scope: Some("repository:library/nginx:pull".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_bearer_with_spaces_and_case() {
        let challenge =
            Challenge::parse(r#"bearer realm = "https://a/token" , service="svc""#).unwrap();
        assert!(matches!(
            challenge,
            Challenge::Bearer { ref service, .. } if service.as_deref() == Some("svc")
        ));
    }

    #[test]
    fn test_scope_with_commas_is_one_value() {
        let challenge = Challenge::parse(
            r#"Bearer realm="https://a/token",scope="repository:x:pull,push""#,
        )
        .unwrap();
        let Challenge::Bearer { scope, .. } = challenge else {
            panic!("expected bearer");
        };
        assert_eq!(scope.as_deref(), Some("repository:x:pull,push"));
    }

    #[test]
    fn test_parse_basic() {
        let challenge = Challenge::parse(r#"Basic realm="Registry Realm""#).unwrap();
        assert_eq!(
            challenge,
            Challenge::Basic {
                realm: Some("Registry Realm".to_string())
            }
        );
    }

    #[test]
    fn test_bearer_without_realm() {
        let err = Challenge::parse(r#"Bearer service="svc""#).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidChallenge { .. }));
    }

    #[test]
    fn test_malformed_params() {
        assert!(Challenge::parse(r#"Bearer realm="unterminated"#).is_err());
        assert!(Challenge::parse(r#"Bearer realm"#).is_err());
        assert!(Challenge::parse(r#"Bearer realm="a" junk"#).is_err());
        assert!(Challenge::parse("Negotiate abc=def").is_err());
    }

    #[test]
    fn test_token_url_default_scope() {
        let challenge = Challenge::parse(
            r#"Bearer realm="https://auth.example/token",service="reg.example""#,
        )
        .unwrap();
        let url = challenge.token_url("team/app").unwrap();
        assert_eq!(
            url.as_str(),
            "https://auth.example/token?service=reg.example&scope=repository%3Ateam%2Fapp%3Apull"
        );
    }

    #[test]
    fn test_token_response() {
        let token: TokenResponse = serde_json::from_str(r#"{"token":"abc"}"#).unwrap();
        assert_eq!(token.into_token().as_deref(), Some("abc"));

        let oauth: TokenResponse =
            serde_json::from_str(r#"{"token":"","access_token":"xyz"}"#).unwrap();
        assert_eq!(oauth.into_token().as_deref(), Some("xyz"));

        let empty: TokenResponse = serde_json::from_str("{}").unwrap();
        assert!(empty.into_token().is_none());
    }

    #[test]
    fn test_basic_authorization() {
        let credential = Credential::new("ghcr.io", "user", "pass");
        assert_eq!(basic_authorization(&credential), "Basic dXNlcjpwYXNz");
    }
}
