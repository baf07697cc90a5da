//! Signed requests against the Dropbox v1 API.
//!
//! Only the calls that feed the reconciler are covered: account info,
//! metadata and the delta stream. Every request is signed through the
//! [`AuthClient`]; a 401 response is reported to its subscribers as
//! [`AuthEvent::AuthenticationFailed`](crate::auth::AuthEvent::AuthenticationFailed).

use reqwest::{Method, StatusCode};
use std::sync::Arc;
use thiserror::Error;
use url::Url;

use crate::auth::{AuthClient, AuthError};
use crate::credential::CredentialRecord;
use crate::delta::{DeltaPage, DeltaReconciler, SyncError, SyncState};
use crate::metadata::{AccountInfo, ClientRoot, Metadata};
use crate::oauth::{SignatureError, SignatureRequest};
use crate::store::SecretStore;

/// Error type for API requests.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Signing failed or no credential is available.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// A delta page was rejected by the reconciler.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// The request did not complete.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The server answered with an unexpected status.
    #[error("request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    /// The server rejected the user's credential.
    #[error("credential for user {user_id} was rejected")]
    Unauthorized { user_id: String },

    /// The response body was not the expected JSON.
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ClientError {
    /// The user has to link again before requests can succeed.
    pub fn requires_reauthentication(&self) -> bool {
        match self {
            ClientError::Unauthorized { .. } => true,
            ClientError::Auth(e) => e.requires_reauthentication(),
            _ => false,
        }
    }
}

fn invalid_url(url: &str, message: impl Into<String>) -> ClientError {
    ClientError::Auth(AuthError::Configuration(SignatureError::InvalidUrl {
        url: url.to_string(),
        message: message.into(),
    }))
}

/// Conditional and listing options for [`DropboxClient::metadata`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataQuery {
    /// Hash from a previous listing; an unchanged directory yields `None`.
    pub hash: Option<String>,
    /// Metadata of a specific revision.
    pub rev: Option<String>,
    /// Include directory contents. Defaults to `true` on the server.
    pub list: Option<bool>,
}

impl MetadataQuery {
    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.hash = Some(hash.into());
        self
    }

    pub fn with_rev(mut self, rev: impl Into<String>) -> Self {
        self.rev = Some(rev.into());
        self
    }

    pub fn with_list(mut self, list: bool) -> Self {
        self.list = Some(list);
        self
    }

    fn pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(hash) = &self.hash {
            pairs.push(("hash", hash.clone()));
        }
        if let Some(rev) = &self.rev {
            pairs.push(("rev", rev.clone()));
        }
        if let Some(list) = self.list {
            pairs.push(("list", list.to_string()));
        }
        pairs
    }
}

/// API client bound to one [`AuthClient`].
pub struct DropboxClient<S: SecretStore> {
    auth: Arc<AuthClient<S>>,
    api_url: String,
    root: ClientRoot,
    user_id: Option<String>,
}

impl<S: SecretStore> DropboxClient<S> {
    /// Client signing with the auth client's active session.
    pub fn new(auth: Arc<AuthClient<S>>, api_url: impl Into<String>, root: ClientRoot) -> Self {
        Self {
            auth,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            root,
            user_id: None,
        }
    }

    /// Sign with a specific stored user instead of the active session.
    pub fn for_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn auth(&self) -> &Arc<AuthClient<S>> {
        &self.auth
    }

    pub fn root(&self) -> ClientRoot {
        self.root
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        let raw = format!("{}/1/{}", self.api_url, path);
        Url::parse(&raw).map_err(|e| invalid_url(&raw, e.to_string()))
    }

    /// `/1/metadata/{root}/{path}` with each path segment escaped.
    fn metadata_url(&self, path: &str) -> Result<Url, ClientError> {
        let mut url = self.endpoint(&format!("metadata/{}", self.root))?;
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        {
            let mut builder = url
                .path_segments_mut()
                .map_err(|_| invalid_url(&self.api_url, "URL cannot have path segments"))?;
            if segments.is_empty() {
                builder.push("");
            } else {
                builder.extend(segments);
            }
        }
        Ok(url)
    }

    async fn credential(&self) -> Result<CredentialRecord, ClientError> {
        let record = match &self.user_id {
            Some(user_id) => self
                .auth
                .store()
                .find_by_identifier(self.auth.service_name(), user_id)
                .await
                .map_err(AuthError::from)?,
            None => self.auth.active_credential(),
        };
        record.ok_or_else(|| {
            ClientError::Auth(AuthError::Precondition {
                message: "no linked user to sign with".to_string(),
            })
        })
    }

    /// Sign and send a request, returning status and body.
    ///
    /// 2xx and 304 are returned; 401 and other statuses become errors.
    async fn send(
        &self,
        method: Method,
        url: Url,
        form: &[(String, String)],
    ) -> Result<(StatusCode, String), ClientError> {
        let record = self.credential().await?;
        let request = SignatureRequest::new(method.as_str(), url.as_str())
            .map_err(AuthError::from)?
            .params(form.iter().cloned());
        let params = self.auth.sign(&request, Some(&record))?;

        tracing::debug!("{} {}", method, url.path());
        let mut builder = self
            .auth
            .http()
            .request(method, url)
            .header(reqwest::header::AUTHORIZATION, params.authorization_header());
        if !form.is_empty() {
            builder = builder.form(form);
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if status == StatusCode::UNAUTHORIZED {
            self.auth.report_authentication_failure(record.identifier());
            return Err(ClientError::Unauthorized {
                user_id: record.identifier().to_string(),
            });
        }
        if status.is_success() || status == StatusCode::NOT_MODIFIED {
            return Ok((status, body));
        }
        tracing::warn!("Request to {} failed with {}", self.api_url, status);
        Err(ClientError::Status {
            status: status.as_u16(),
            body,
        })
    }

    /// The linked user's account.
    pub async fn account_info(&self) -> Result<AccountInfo, ClientError> {
        let url = self.endpoint("account/info")?;
        let (_, body) = self.send(Method::GET, url, &[]).await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Metadata for a path, or `None` if `query.hash` still matches.
    pub async fn metadata(
        &self,
        path: &str,
        query: &MetadataQuery,
    ) -> Result<Option<Metadata>, ClientError> {
        let mut url = self.metadata_url(path)?;
        let pairs = query.pairs();
        if !pairs.is_empty() {
            url.query_pairs_mut().extend_pairs(pairs);
        }

        let (status, body) = self.send(Method::GET, url, &[]).await?;
        if status == StatusCode::NOT_MODIFIED {
            tracing::debug!("Metadata for {} unchanged", path);
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&body)?))
    }

    /// One page of the change stream, starting after `cursor`.
    pub async fn delta(&self, cursor: Option<&str>) -> Result<DeltaPage, ClientError> {
        let url = self.endpoint("delta")?;
        let form: Vec<(String, String)> = cursor
            .map(|c| vec![("cursor".to_string(), c.to_string())])
            .unwrap_or_default();

        let (_, body) = self.send(Method::POST, url, &form).await?;
        Ok(DeltaPage::from_json(&body)?)
    }

    /// Fetch and apply pages until the stream is caught up.
    ///
    /// Returns the number of pages applied. On error `state` keeps the last
    /// page that applied cleanly, so a later call resumes from its cursor.
    pub async fn sync(&self, state: &mut SyncState) -> Result<usize, ClientError> {
        let mut pages = 0;
        loop {
            let page = self.delta(state.cursor.as_deref()).await?;
            let has_more = page.has_more;
            *state = DeltaReconciler::apply(state.clone(), page)?;
            pages += 1;
            if !has_more {
                break;
            }
        }
        tracing::info!(
            "Sync caught up after {} page(s), {} entries",
            pages,
            state.len()
        );
        Ok(pages)
    }
}

impl<S: SecretStore> std::fmt::Debug for DropboxClient<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DropboxClient")
            .field("api_url", &self.api_url)
            .field("root", &self.root)
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}
