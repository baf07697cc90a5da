//! OAuth 1.0 token credential, the payload of a linked user's record.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::credential::{CredentialError, CredentialRecord};
use crate::store::Secret;

/// Token, token secret and verifier.
///
/// All fields are optional while a flow is in progress; once the access-token
/// exchange completes `token` and `secret` are both non-empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthCredential {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token: Option<Secret>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    secret: Option<Secret>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    verifier: Option<Secret>,
}

impl OAuthCredential {
    pub fn new(token: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            token: Some(Secret::new(token)),
            secret: Some(Secret::new(secret)),
            verifier: None,
        }
    }

    pub fn with_verifier(mut self, verifier: impl Into<String>) -> Self {
        self.verifier = Some(Secret::new(verifier));
        self
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_ref().map(Secret::expose)
    }

    pub fn secret(&self) -> Option<&str> {
        self.secret.as_ref().map(Secret::expose)
    }

    pub fn verifier(&self) -> Option<&str> {
        self.verifier.as_ref().map(Secret::expose)
    }

    pub fn set_token(&mut self, token: impl Into<String>) {
        self.token = Some(Secret::new(token));
    }

    pub fn set_secret(&mut self, secret: impl Into<String>) {
        self.secret = Some(Secret::new(secret));
    }

    pub fn set_verifier(&mut self, verifier: impl Into<String>) {
        self.verifier = Some(Secret::new(verifier));
    }

    /// Whether both token and secret are present and non-empty.
    pub fn is_complete(&self) -> bool {
        matches!((self.token(), self.secret()), (Some(t), Some(s)) if !t.is_empty() && !s.is_empty())
    }

    /// Parse a form-encoded token endpoint response.
    ///
    /// Returns the credential and every non-`oauth_*` key (such as `uid`),
    /// which callers keep as user info.
    pub fn from_response(body: &str) -> Result<(Self, Map<String, Value>), serde_urlencoded::de::Error> {
        let pairs: Vec<(String, String)> = serde_urlencoded::from_str(body.trim())?;

        let mut credential = Self::default();
        let mut extra = Map::new();
        for (key, value) in pairs {
            match key.as_str() {
                "oauth_token" => credential.set_token(value),
                "oauth_token_secret" => credential.set_secret(value),
                "oauth_verifier" => credential.set_verifier(value),
                _ if key.starts_with("oauth_") => {}
                _ => {
                    extra.insert(key, Value::String(value));
                }
            }
        }
        Ok((credential, extra))
    }

    /// Decode the OAuth payload of a stored record.
    pub fn from_record(record: &CredentialRecord) -> Result<Self, CredentialError> {
        record.payload_as()
    }
}
