//! Per-API consumer configuration.
//!
//! An [`OAuthConsumerConfig`] is an immutable value handed to the signer and
//! the [`AuthClient`](crate::auth::AuthClient) at construction, so several
//! differently configured clients can coexist in one process.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::SignatureError;
use crate::store::Secret;

/// OAuth 1.0 signature method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SignatureMethod {
    /// `PLAINTEXT`; only for transports that are already confidential.
    Plaintext,

    /// `HMAC-SHA1`.
    HmacSha1,
}

impl SignatureMethod {
    /// Value of the `oauth_signature_method` parameter.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plaintext => "PLAINTEXT",
            Self::HmacSha1 => "HMAC-SHA1",
        }
    }
}

impl fmt::Display for SignatureMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignatureMethod {
    type Err = SignatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('_', "-").as_str() {
            "PLAINTEXT" => Ok(Self::Plaintext),
            "HMAC-SHA1" => Ok(Self::HmacSha1),
            _ => Err(SignatureError::UnsupportedSignatureMethod {
                method: s.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for SignatureMethod {
    type Error = SignatureError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SignatureMethod> for String {
    fn from(method: SignatureMethod) -> Self {
        method.as_str().to_string()
    }
}

/// Static OAuth 1.0 configuration for one API.
///
/// # Example
///
/// ```
/// use dropsync_core::oauth::{OAuthConsumerConfig, SignatureMethod};
///
/// let config = OAuthConsumerConfig::new("app-key", "app-secret")
///     .with_signature_method(SignatureMethod::HmacSha1)
///     .with_request_token_url("https://api.example.com/1/oauth/request_token")
///     .with_authorization_url("https://www.example.com/1/oauth/authorize")
///     .with_access_token_url("https://api.example.com/1/oauth/access_token");
///
/// assert_eq!(config.consumer_key, "app-key");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthConsumerConfig {
    /// Key identifying the client application.
    pub consumer_key: String,

    /// Secret shared between the client application and the service.
    pub consumer_secret: Secret,

    /// How requests are signed.
    pub signature_method: SignatureMethod,

    /// Endpoint issuing unauthorized request tokens.
    pub request_token_url: String,

    /// Page the user visits to authorize a request token.
    pub authorization_url: String,

    /// Endpoint exchanging request tokens (or xAuth credentials) for access tokens.
    pub access_token_url: String,

    /// Optional `oauth_callback` sent with the authorization URL.
    #[serde(default)]
    pub callback_url: Option<String>,
}

impl OAuthConsumerConfig {
    /// Create a configuration with HMAC-SHA1 signing and no endpoints.
    pub fn new(consumer_key: impl Into<String>, consumer_secret: impl Into<String>) -> Self {
        Self {
            consumer_key: consumer_key.into(),
            consumer_secret: Secret::new(consumer_secret),
            signature_method: SignatureMethod::HmacSha1,
            request_token_url: String::new(),
            authorization_url: String::new(),
            access_token_url: String::new(),
            callback_url: None,
        }
    }

    /// Dropbox v1 endpoints rooted at the given API and web hosts.
    pub fn dropbox(
        consumer_key: impl Into<String>,
        consumer_secret: impl Into<String>,
        api_url: &str,
        web_url: &str,
    ) -> Self {
        let api = api_url.trim_end_matches('/');
        let web = web_url.trim_end_matches('/');
        Self::new(consumer_key, consumer_secret)
            .with_request_token_url(format!("{}/1/oauth/request_token", api))
            .with_authorization_url(format!("{}/1/oauth/authorize", web))
            .with_access_token_url(format!("{}/1/oauth/access_token", api))
    }

    pub fn with_signature_method(mut self, method: SignatureMethod) -> Self {
        self.signature_method = method;
        self
    }

    pub fn with_request_token_url(mut self, url: impl Into<String>) -> Self {
        self.request_token_url = url.into();
        self
    }

    pub fn with_authorization_url(mut self, url: impl Into<String>) -> Self {
        self.authorization_url = url.into();
        self
    }

    pub fn with_access_token_url(mut self, url: impl Into<String>) -> Self {
        self.access_token_url = url.into();
        self
    }

    pub fn with_callback_url(mut self, url: impl Into<String>) -> Self {
        self.callback_url = Some(url.into());
        self
    }

    /// Check the consumer credentials are present.
    pub fn validate(&self) -> Result<(), SignatureError> {
        if self.consumer_key.trim().is_empty() {
            return Err(SignatureError::EmptyConsumerKey);
        }
        if self.consumer_secret.expose().trim().is_empty() {
            return Err(SignatureError::EmptyConsumerSecret);
        }
        Ok(())
    }

    /// Check the three link-flow endpoints parse as absolute URLs.
    pub fn validate_endpoints(&self) -> Result<(), SignatureError> {
        for url in [
            &self.request_token_url,
            &self.authorization_url,
            &self.access_token_url,
        ] {
            url::Url::parse(url).map_err(|e| SignatureError::InvalidUrl {
                url: url.clone(),
                message: e.to_string(),
            })?;
        }
        Ok(())
    }
}
