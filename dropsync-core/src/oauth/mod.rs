//! OAuth 1.0 primitives.
//!
//! This module provides:
//! - [`OAuthConsumerConfig`] / [`SignatureMethod`] - static per-API configuration
//! - [`OAuthCredential`] - token, token secret and verifier
//! - [`OAuthSigner`] - HMAC-SHA1 and PLAINTEXT request signing
//! - [`percent_encode`] - RFC 3986 encoding used throughout the protocol
//!
//! Nothing here performs I/O; the link flows that talk to token endpoints
//! live in [`auth`](crate::auth).

pub mod consumer;
pub mod credential;
pub mod encode;
pub mod signer;

use thiserror::Error;

pub use consumer::{OAuthConsumerConfig, SignatureMethod};
pub use credential::OAuthCredential;
pub use encode::{percent_decode, percent_encode};
pub use signer::{
    OAuthParameters, OAuthSigner, SignatureRequest, normalize_parameters, signature_base_string,
    signing_key,
};

/// Error type for signing.
///
/// Every variant is a configuration problem and is not retryable.
#[derive(Debug, Error)]
pub enum SignatureError {
    /// The consumer key is missing.
    #[error("configuration error: consumer key is empty")]
    EmptyConsumerKey,

    /// The consumer secret is missing.
    #[error("configuration error: consumer secret is empty")]
    EmptyConsumerSecret,

    /// The configured signature method is not one of PLAINTEXT / HMAC-SHA1.
    #[error("unsupported signature method: {method}")]
    UnsupportedSignatureMethod { method: String },

    /// An endpoint URL could not be parsed.
    #[error("configuration error: invalid URL {url}: {message}")]
    InvalidUrl { url: String, message: String },

    /// The HMAC key was rejected.
    #[error("configuration error: invalid signing key: {message}")]
    InvalidKey { message: String },
}

/// Length of generated `oauth_nonce` values.
pub const NONCE_LENGTH: usize = 32;

/// Generate a random alphanumeric string of the specified length.
///
/// Backed by the thread-local CSPRNG.
pub fn generate_random_string(length: usize) -> String {
    use rand::Rng;
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::thread_rng();

    (0..length)
        .map(|_| {
            let idx = rng.gen_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}

/// Fresh single-use `oauth_nonce`.
pub fn generate_nonce() -> String {
    generate_random_string(NONCE_LENGTH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_random_string() {
        let s1 = generate_random_string(32);
        let s2 = generate_random_string(32);

        assert_eq!(s1.len(), 32);
        assert_ne!(s1, s2);
        assert!(s1.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_nonce_length() {
        assert_eq!(generate_nonce().len(), NONCE_LENGTH);
    }
}
