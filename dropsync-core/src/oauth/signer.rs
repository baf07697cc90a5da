//! OAuth 1.0 request signing (RFC 5849 §3.4).
//!
//! Signing is pure computation: given the request method, URL, parameters,
//! consumer configuration and an optional token credential, produce the full
//! set of `oauth_*` protocol parameters including `oauth_signature`.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use url::Url;

use super::consumer::{OAuthConsumerConfig, SignatureMethod};
use super::credential::OAuthCredential;
use super::encode::percent_encode;
use super::{SignatureError, generate_nonce};

type HmacSha1 = Hmac<Sha1>;

/// Value of `oauth_version`.
pub const OAUTH_VERSION: &str = "1.0";

/// A request to be signed.
///
/// Query parameters found on the URL are moved into the parameter set; the
/// base string URL only carries scheme, authority and path.
#[derive(Debug, Clone)]
pub struct SignatureRequest {
    method: String,
    url: Url,
    params: Vec<(String, String)>,
    protocol_params: Vec<(String, String)>,
}

impl SignatureRequest {
    /// Start a request for `method` against `url`.
    pub fn new(method: &str, url: &str) -> Result<Self, SignatureError> {
        let mut url = Url::parse(url).map_err(|e| SignatureError::InvalidUrl {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        let params: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        url.set_query(None);
        url.set_fragment(None);

        Ok(Self {
            method: method.to_ascii_uppercase(),
            url,
            params,
            protocol_params: Vec::new(),
        })
    }

    /// Add a query or form-body parameter.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Add several query or form-body parameters.
    pub fn params<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.params
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Add an extra protocol parameter such as `oauth_verifier` or `oauth_callback`.
    ///
    /// Protocol parameters are signed and emitted with the OAuth parameter set.
    pub fn protocol_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.protocol_params.push((key.into(), value.into()));
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Base string URI: scheme, host, non-default port and path.
    pub fn base_url(&self) -> String {
        let host = self.url.host_str().unwrap_or_default().to_ascii_lowercase();
        match self.url.port() {
            Some(port) => format!("{}://{}:{}{}", self.url.scheme(), host, port, self.url.path()),
            None => format!("{}://{}{}", self.url.scheme(), host, self.url.path()),
        }
    }
}

/// The fully populated OAuth protocol parameter set for one request.
#[derive(Clone, PartialEq, Eq)]
pub struct OAuthParameters {
    pub consumer_key: String,
    pub nonce: String,
    pub signature: String,
    pub signature_method: SignatureMethod,
    pub timestamp: i64,
    pub token: Option<String>,
    pub version: &'static str,
    /// Extra protocol parameters (`oauth_verifier`, `oauth_callback`).
    pub extra: Vec<(String, String)>,
}

impl OAuthParameters {
    /// Parameters as `(name, value)` pairs in emission order.
    pub fn pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![
            ("oauth_consumer_key".to_string(), self.consumer_key.clone()),
            ("oauth_nonce".to_string(), self.nonce.clone()),
            ("oauth_signature".to_string(), self.signature.clone()),
            (
                "oauth_signature_method".to_string(),
                self.signature_method.as_str().to_string(),
            ),
            ("oauth_timestamp".to_string(), self.timestamp.to_string()),
        ];
        if let Some(token) = &self.token {
            pairs.push(("oauth_token".to_string(), token.clone()));
        }
        pairs.push(("oauth_version".to_string(), self.version.to_string()));
        pairs.extend(self.extra.iter().cloned());
        pairs
    }

    /// Value for an `Authorization` header.
    pub fn authorization_header(&self) -> String {
        let fields: Vec<String> = self
            .pairs()
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", percent_encode(k), percent_encode(v)))
            .collect();
        format!("OAuth {}", fields.join(", "))
    }
}

impl std::fmt::Debug for OAuthParameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthParameters")
            .field("consumer_key", &self.consumer_key)
            .field("nonce", &self.nonce)
            .field("signature_method", &self.signature_method)
            .field("timestamp", &self.timestamp)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

/// Normalised parameter string: encode, sort by key then value, join with `&`.
pub fn normalize_parameters(params: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (percent_encode(k), percent_encode(v)))
        .collect();
    encoded.sort();
    encoded
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Signature base string: `METHOD&enc(url)&enc(normalized params)`.
pub fn signature_base_string(method: &str, base_url: &str, params: &[(String, String)]) -> String {
    format!(
        "{}&{}&{}",
        percent_encode(&method.to_ascii_uppercase()),
        percent_encode(base_url),
        percent_encode(&normalize_parameters(params))
    )
}

/// Signing key: `enc(consumer_secret)&enc(token_secret)`.
pub fn signing_key(consumer_secret: &str, token_secret: Option<&str>) -> String {
    format!(
        "{}&{}",
        percent_encode(consumer_secret),
        percent_encode(token_secret.unwrap_or_default())
    )
}

/// Signs requests with a fixed consumer configuration.
#[derive(Debug, Clone)]
pub struct OAuthSigner {
    config: OAuthConsumerConfig,
}

impl OAuthSigner {
    pub fn new(config: OAuthConsumerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OAuthConsumerConfig {
        &self.config
    }

    /// Sign with a fresh nonce and the current Unix time.
    pub fn sign(
        &self,
        request: &SignatureRequest,
        credential: Option<&OAuthCredential>,
    ) -> Result<OAuthParameters, SignatureError> {
        let nonce = generate_nonce();
        let timestamp = chrono::Utc::now().timestamp();
        self.sign_with(request, credential, &nonce, timestamp)
    }

    /// Sign with a caller-supplied nonce and timestamp.
    ///
    /// Deterministic: identical inputs yield identical signatures.
    pub fn sign_with(
        &self,
        request: &SignatureRequest,
        credential: Option<&OAuthCredential>,
        nonce: &str,
        timestamp: i64,
    ) -> Result<OAuthParameters, SignatureError> {
        self.config.validate()?;

        let token = credential.and_then(|c| c.token()).filter(|t| !t.is_empty());
        let token_secret = credential.and_then(|c| c.secret());

        let mut params = OAuthParameters {
            consumer_key: self.config.consumer_key.clone(),
            nonce: nonce.to_string(),
            signature: String::new(),
            signature_method: self.config.signature_method,
            timestamp,
            token: token.map(str::to_string),
            version: OAUTH_VERSION,
            extra: request.protocol_params.clone(),
        };

        let key = signing_key(self.config.consumer_secret.expose(), token_secret);
        params.signature = match self.config.signature_method {
            SignatureMethod::Plaintext => key,
            SignatureMethod::HmacSha1 => {
                let mut all = request.params.clone();
                all.extend(
                    params
                        .pairs()
                        .into_iter()
                        .filter(|(k, _)| k != "oauth_signature"),
                );
                let base = signature_base_string(&request.method, &request.base_url(), &all);
                tracing::trace!("Signature base string: {}", base);

                let mut mac = HmacSha1::new_from_slice(key.as_bytes())
                    .map_err(|e| SignatureError::InvalidKey { message: e.to_string() })?;
                mac.update(base.as_bytes());
                STANDARD.encode(mac.finalize().into_bytes())
            }
        };

        Ok(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::encode::percent_decode;

    fn consumer(key: &str, secret: &str) -> OAuthConsumerConfig {
        OAuthConsumerConfig::new(key, secret)
    }

    #[test]
    fn test_rfc5849_photos_example() {
        // Published OAuth 1.0 example (photos.example.net).
        let signer = OAuthSigner::new(consumer("dpf43f3p2l4k3l03", "kd94hf93k423kf44"));
        let request = SignatureRequest::new(
            "GET",
            "http://photos.example.net/photos?file=vacation.jpg&size=original",
        )
        .unwrap();
        let credential = OAuthCredential::new("nnch734d00sl2jdk", "pfkkdhi9sl3r4s00");

        let params = signer
            .sign_with(&request, Some(&credential), "kllo9940pd9333jh", 1191242096)
            .unwrap();

        assert_eq!(params.signature, "tR3+Ty81lMeYAr/Fid0kMTYa/WM=");
        assert_eq!(params.token.as_deref(), Some("nnch734d00sl2jdk"));
    }

    #[test]
    fn test_metadata_request_without_token() {
        let signer = OAuthSigner::new(consumer("ck", "cs"));
        let request = SignatureRequest::new("GET", "https://api.example.com/1/metadata/auto/").unwrap();

        let params = signer.sign_with(&request, None, "abc123", 1_000_000_000).unwrap();

        assert_eq!(params.signature, "es910rutu/yve6148uCIuktihbE=");
        assert!(params.token.is_none());
        assert_eq!(params.version, "1.0");
    }

    #[test]
    fn test_base_string_layout() {
        let params = vec![
            ("oauth_consumer_key".to_string(), "ck".to_string()),
            ("oauth_nonce".to_string(), "abc123".to_string()),
            ("oauth_signature_method".to_string(), "HMAC-SHA1".to_string()),
            ("oauth_timestamp".to_string(), "1000000000".to_string()),
            ("oauth_version".to_string(), "1.0".to_string()),
        ];
        let base = signature_base_string("get", "https://api.example.com/1/metadata/auto/", &params);

        assert_eq!(
            base,
            "GET&https%3A%2F%2Fapi.example.com%2F1%2Fmetadata%2Fauto%2F&\
             oauth_consumer_key%3Dck%26oauth_nonce%3Dabc123%26oauth_signature_method%3DHMAC-SHA1\
             %26oauth_timestamp%3D1000000000%26oauth_version%3D1.0"
        );
    }

    #[test]
    fn test_normalized_parameters_round_trip() {
        let params = vec![
            ("b".to_string(), "two words".to_string()),
            ("a".to_string(), "x=y&z".to_string()),
            ("a".to_string(), "1".to_string()),
        ];
        let normalized = normalize_parameters(&params);
        assert_eq!(normalized, "a=1&a=x%3Dy%26z&b=two%20words");

        let decoded: Vec<(String, String)> = normalized
            .split('&')
            .map(|pair| {
                let (k, v) = pair.split_once('=').unwrap();
                (percent_decode(k).unwrap(), percent_decode(v).unwrap())
            })
            .collect();
        let mut expected = params.clone();
        expected.sort();
        assert_eq!(decoded, expected);
    }

    #[test]
    fn test_base_url_drops_default_port_and_query() {
        let request = SignatureRequest::new("post", "HTTPS://API.Example.com:443/1/delta?cursor=abc#frag").unwrap();
        assert_eq!(request.base_url(), "https://api.example.com/1/delta");
        assert_eq!(request.method(), "POST");

        let request = SignatureRequest::new("GET", "http://localhost:8080/x").unwrap();
        assert_eq!(request.base_url(), "http://localhost:8080/x");
    }

    #[test]
    fn test_plaintext_signature() {
        let signer = OAuthSigner::new(
            consumer("ck", "c&s").with_signature_method(SignatureMethod::Plaintext),
        );
        let request = SignatureRequest::new("POST", "https://api.example.com/1/oauth/access_token").unwrap();
        let credential = OAuthCredential::new("tok", "t s");

        let params = signer.sign_with(&request, Some(&credential), "n", 1).unwrap();
        assert_eq!(params.signature, "c%26s&t%20s");
        assert_eq!(params.signature_method.as_str(), "PLAINTEXT");
    }

    #[test]
    fn test_signing_is_deterministic_for_fixed_nonce() {
        let signer = OAuthSigner::new(consumer("ck", "cs"));
        let request = SignatureRequest::new("POST", "https://api.example.com/1/delta")
            .unwrap()
            .param("cursor", "AAE");
        let credential = OAuthCredential::new("tok", "sec");

        let a = signer.sign_with(&request, Some(&credential), "n1", 42).unwrap();
        let b = signer.sign_with(&request, Some(&credential), "n1", 42).unwrap();
        let c = signer.sign_with(&request, Some(&credential), "n2", 42).unwrap();

        assert_eq!(a, b);
        assert_ne!(a.signature, c.signature);
    }

    #[test]
    fn test_fresh_nonce_per_signature() {
        let signer = OAuthSigner::new(consumer("ck", "cs"));
        let request = SignatureRequest::new("GET", "https://api.example.com/1/account/info").unwrap();

        let a = signer.sign(&request, None).unwrap();
        let b = signer.sign(&request, None).unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert!(a.timestamp > 1_000_000_000);
    }

    #[test]
    fn test_empty_consumer_rejected() {
        let request = SignatureRequest::new("GET", "https://api.example.com/").unwrap();

        let err = OAuthSigner::new(consumer("", "cs")).sign(&request, None).unwrap_err();
        assert!(matches!(err, SignatureError::EmptyConsumerKey));

        let err = OAuthSigner::new(consumer("ck", "")).sign(&request, None).unwrap_err();
        assert!(matches!(err, SignatureError::EmptyConsumerSecret));
    }

    #[test]
    fn test_invalid_url_rejected() {
        let err = SignatureRequest::new("GET", "not a url").unwrap_err();
        assert!(matches!(err, SignatureError::InvalidUrl { .. }));
    }

    #[test]
    fn test_authorization_header_format() {
        let signer = OAuthSigner::new(consumer("ck", "cs"));
        let request = SignatureRequest::new("POST", "https://api.example.com/1/oauth/access_token")
            .unwrap()
            .protocol_param("oauth_verifier", "v 1");
        let credential = OAuthCredential::new("tok", "sec");

        let params = signer.sign_with(&request, Some(&credential), "abc", 7).unwrap();
        let header = params.authorization_header();

        assert!(header.starts_with("OAuth oauth_consumer_key=\"ck\", oauth_nonce=\"abc\""));
        assert!(header.contains("oauth_token=\"tok\""));
        assert!(header.contains("oauth_timestamp=\"7\""));
        assert!(header.contains("oauth_verifier=\"v%201\""));
        assert!(header.contains("oauth_version=\"1.0\""));
        assert!(!format!("{:?}", params).contains("tok"));
    }
}
