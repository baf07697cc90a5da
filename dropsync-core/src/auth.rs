//! Account linking and the authenticated session.
//!
//! [`AuthClient`] drives the two ways of obtaining an access token:
//!
//! - three-legged: [`begin_link`](AuthClient::begin_link) fetches a request
//!   token and returns the URL the user must visit, then
//!   [`complete_link`](AuthClient::complete_link) exchanges it for an access
//!   token once the service calls back.
//! - xAuth: [`exchange_xauth`](AuthClient::exchange_xauth) trades a username
//!   and password for an access token in one request.
//!
//! Successful links are persisted through a [`CredentialStore`] and become
//! the active session used by [`sign`](AuthClient::sign).
//!
//! # Concurrency
//!
//! Only one link attempt is live at a time. Starting a new attempt
//! supersedes the previous one: its request token is discarded and a late
//! completion fails with [`LinkErrorKind::Superseded`] instead of persisting.
//! [`unlink`](AuthClient::unlink) and [`unlink_all`](AuthClient::unlink_all)
//! also cancel any attempt in progress.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use url::Url;

use crate::credential::{CredentialError, CredentialRecord, CredentialStore};
use crate::oauth::{
    OAuthConsumerConfig, OAuthCredential, OAuthParameters, OAuthSigner, SignatureError,
    SignatureRequest,
};
use crate::store::SecretStore;

const EVENT_CAPACITY: usize = 32;

/// Sub-kind of a failed token exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkErrorKind {
    /// The request never produced a response, or the server failed.
    Transport,
    /// The response or callback did not carry the expected fields.
    MalformedResponse,
    /// The user declined, or the request token was not authorised.
    Denied,
    /// The xAuth username/password pair was rejected.
    InvalidCredentials,
    /// A newer link attempt or an unlink overtook this one.
    Superseded,
}

impl std::fmt::Display for LinkErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LinkErrorKind::Transport => "transport",
            LinkErrorKind::MalformedResponse => "malformed response",
            LinkErrorKind::Denied => "denied",
            LinkErrorKind::InvalidCredentials => "invalid credentials",
            LinkErrorKind::Superseded => "superseded",
        };
        f.write_str(s)
    }
}

/// A token exchange failed.
#[derive(Debug, Clone, Error)]
#[error("link failed ({kind}): {message}")]
pub struct LinkError {
    pub kind: LinkErrorKind,
    pub message: String,
}

impl LinkError {
    pub fn new(kind: LinkErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// The user should re-enter their username and password.
    pub fn is_invalid_credentials(&self) -> bool {
        self.kind == LinkErrorKind::InvalidCredentials
    }

    /// Retrying without user interaction will not help.
    pub fn requires_reauthentication(&self) -> bool {
        matches!(
            self.kind,
            LinkErrorKind::Denied | LinkErrorKind::InvalidCredentials
        )
    }
}

/// Error type for [`AuthClient`] operations.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Consumer key, secret, signature method or an endpoint URL is invalid.
    #[error(transparent)]
    Configuration(#[from] SignatureError),

    /// A token exchange failed.
    #[error(transparent)]
    Link(#[from] LinkError),

    /// The operation needs state the client does not have.
    #[error("precondition failed: {message}")]
    Precondition { message: String },

    /// Persisting or loading a credential failed.
    #[error(transparent)]
    Store(#[from] CredentialError),
}

impl AuthError {
    fn precondition(message: impl Into<String>) -> Self {
        AuthError::Precondition {
            message: message.into(),
        }
    }

    /// See [`LinkError::is_invalid_credentials`].
    pub fn is_invalid_credentials(&self) -> bool {
        matches!(self, AuthError::Link(e) if e.is_invalid_credentials())
    }

    /// See [`LinkError::requires_reauthentication`].
    pub fn requires_reauthentication(&self) -> bool {
        matches!(self, AuthError::Link(e) if e.requires_reauthentication())
    }
}

/// Where the client is in the link lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    Unlinked,
    RequestingToken,
    AwaitingUserAuthorization,
    ExchangingAccessToken,
    ExchangingXAuthToken,
    Linked,
}

/// Notification delivered to [`AuthClient::subscribe`] receivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    StateChanged(LinkState),
    Linked { user_id: String },
    Unlinked { user_id: String },
    /// A signed request was rejected; the user must link again.
    AuthenticationFailed { user_id: String },
}

/// Result of [`AuthClient::begin_link`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingLink {
    /// Page the user must visit to approve access.
    pub authorization_url: String,
    /// The unauthorised request token embedded in the URL.
    pub request_token: String,
}

struct PendingAttempt {
    generation: u64,
    credential: OAuthCredential,
}

#[derive(Default)]
struct FlowState {
    link_state: LinkState,
    generation: u64,
    pending: Option<PendingAttempt>,
    active: Option<CredentialRecord>,
}

impl FlowState {
    fn settled(&self) -> LinkState {
        if self.active.is_some() {
            LinkState::Linked
        } else {
            LinkState::Unlinked
        }
    }
}

/// OAuth 1.0 link flows plus the active signed-in session for one service.
pub struct AuthClient<S: SecretStore> {
    service_name: String,
    signer: OAuthSigner,
    store: Arc<CredentialStore<S>>,
    http: reqwest::Client,
    state: parking_lot::Mutex<FlowState>,
    persist_lock: tokio::sync::Mutex<()>,
    events: broadcast::Sender<AuthEvent>,
}

impl<S: SecretStore> AuthClient<S> {
    /// Create a client; fails if the consumer configuration is unusable.
    pub fn new(
        config: OAuthConsumerConfig,
        service_name: impl Into<String>,
        store: Arc<CredentialStore<S>>,
    ) -> Result<Self, AuthError> {
        config.validate()?;
        config.validate_endpoints()?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            service_name: service_name.into(),
            signer: OAuthSigner::new(config),
            store,
            http: reqwest::Client::new(),
            state: parking_lot::Mutex::new(FlowState::default()),
            persist_lock: tokio::sync::Mutex::new(()),
            events,
        })
    }

    /// Use a preconfigured HTTP client (timeouts, proxies).
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn config(&self) -> &OAuthConsumerConfig {
        self.signer.config()
    }

    pub fn store(&self) -> &Arc<CredentialStore<S>> {
        &self.store
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn state(&self) -> LinkState {
        self.state.lock().link_state
    }

    /// Whether an active session exists.
    pub fn is_linked(&self) -> bool {
        self.state.lock().active.is_some()
    }

    /// The active session's record.
    pub fn active_credential(&self) -> Option<CredentialRecord> {
        self.state.lock().active.clone()
    }

    /// Receive state transitions and link events. Drop the receiver to unsubscribe.
    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: AuthEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    fn transition(&self, state: &mut FlowState, next: LinkState) -> Option<AuthEvent> {
        if state.link_state == next {
            return None;
        }
        tracing::debug!(
            "Link state for {}: {:?} -> {:?}",
            self.service_name,
            state.link_state,
            next
        );
        state.link_state = next;
        Some(AuthEvent::StateChanged(next))
    }

    /// Start a new attempt, superseding any attempt in progress.
    fn start_attempt(&self, next: LinkState) -> u64 {
        let (generation, event) = {
            let mut state = self.state.lock();
            state.generation += 1;
            if state.pending.take().is_some() {
                tracing::info!("Superseding pending link attempt for {}", self.service_name);
            }
            let event = self.transition(&mut state, next);
            (state.generation, event)
        };
        if let Some(event) = event {
            self.emit(event);
        }
        generation
    }

    /// Revert a failed attempt, unless a newer one already took over.
    fn fail(&self, generation: u64, error: LinkError) -> AuthError {
        self.settle(generation);
        tracing::warn!("Link attempt for {} failed: {}", self.service_name, error);
        AuthError::Link(error)
    }

    /// Drop the attempt's pending token and return to a settled state.
    fn settle(&self, generation: u64) {
        let event = {
            let mut state = self.state.lock();
            if state.generation == generation {
                state.pending = None;
                let settled = state.settled();
                self.transition(&mut state, settled)
            } else {
                None
            }
        };
        if let Some(event) = event {
            self.emit(event);
        }
    }

    fn current_generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Sign and POST a form request to a token endpoint, returning the body.
    async fn post_token_request(
        &self,
        request: SignatureRequest,
        url: &str,
        body: &[(String, String)],
        credential: Option<&OAuthCredential>,
        rejected: LinkErrorKind,
    ) -> Result<String, LinkError> {
        let params = self
            .signer
            .sign(&request, credential)
            .map_err(|e| LinkError::new(LinkErrorKind::Transport, e.to_string()))?;

        let mut builder = self
            .http
            .post(url)
            .header(reqwest::header::AUTHORIZATION, params.authorization_header());
        if !body.is_empty() {
            builder = builder.form(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| LinkError::new(LinkErrorKind::Transport, e.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| LinkError::new(LinkErrorKind::Transport, e.to_string()))?;

        if status.is_success() {
            return Ok(text);
        }
        let kind = match status.as_u16() {
            400 | 401 | 403 => rejected,
            _ => LinkErrorKind::Transport,
        };
        Err(LinkError::new(kind, format!("{} returned {}: {}", url, status, text.trim())))
    }

    fn parse_token_response(body: &str) -> Result<(OAuthCredential, Map<String, Value>), LinkError> {
        let (credential, extra) = OAuthCredential::from_response(body)
            .map_err(|e| LinkError::new(LinkErrorKind::MalformedResponse, e.to_string()))?;
        if !credential.is_complete() {
            return Err(LinkError::new(
                LinkErrorKind::MalformedResponse,
                "response is missing oauth_token or oauth_token_secret",
            ));
        }
        Ok((credential, extra))
    }

    /// Step one of the three-legged flow.
    ///
    /// Obtains a request token and returns the authorization URL to show the
    /// user. The request token stays pending until
    /// [`complete_link`](Self::complete_link) or another attempt replaces it.
    pub async fn begin_link(&self) -> Result<PendingLink, AuthError> {
        let config = self.signer.config();
        let mut authorization_url =
            Url::parse(&config.authorization_url).map_err(|e| SignatureError::InvalidUrl {
                url: config.authorization_url.clone(),
                message: e.to_string(),
            })?;
        let request = SignatureRequest::new("POST", &config.request_token_url)?;

        let generation = self.start_attempt(LinkState::RequestingToken);
        tracing::info!("Requesting OAuth request token for {}", self.service_name);

        let result = self
            .post_token_request(
                request,
                &config.request_token_url,
                &[],
                None,
                LinkErrorKind::Denied,
            )
            .await
            .and_then(|body| Self::parse_token_response(&body));
        let credential = match result {
            Ok((credential, _)) => credential,
            Err(e) => return Err(self.fail(generation, e)),
        };
        let request_token = credential.token().unwrap_or_default().to_string();

        {
            let mut query = authorization_url.query_pairs_mut();
            query.append_pair("oauth_token", &request_token);
            if let Some(callback) = &config.callback_url {
                query.append_pair("oauth_callback", callback);
            }
        }

        let event = {
            let mut state = self.state.lock();
            if state.generation != generation {
                None
            } else {
                state.pending = Some(PendingAttempt {
                    generation,
                    credential,
                });
                Some(self.transition(&mut state, LinkState::AwaitingUserAuthorization))
            }
        };
        let Some(event) = event else {
            return Err(LinkError::new(
                LinkErrorKind::Superseded,
                "a newer link attempt started while requesting a token",
            )
            .into());
        };
        if let Some(event) = event {
            self.emit(event);
        }

        Ok(PendingLink {
            authorization_url: authorization_url.into(),
            request_token,
        })
    }

    /// Step three of the three-legged flow.
    ///
    /// `callback` holds the query parameters the service appended to the
    /// callback URL. The pending request token is consumed whatever the
    /// outcome.
    pub async fn complete_link(
        &self,
        callback: &HashMap<String, String>,
    ) -> Result<CredentialRecord, AuthError> {
        let (generation, pending, event) = {
            let mut state = self.state.lock();
            if state.link_state != LinkState::AwaitingUserAuthorization {
                return Err(AuthError::precondition(format!(
                    "no link awaiting authorization (state {:?})",
                    state.link_state
                )));
            }
            let Some(pending) = state.pending.take() else {
                return Err(AuthError::precondition("no pending request token"));
            };
            let event = self.transition(&mut state, LinkState::ExchangingAccessToken);
            (pending.generation, pending.credential, event)
        };
        if let Some(event) = event {
            self.emit(event);
        }

        if callback.get("not_approved").is_some_and(|v| v == "true") {
            return Err(self.fail(
                generation,
                LinkError::new(LinkErrorKind::Denied, "user did not approve access"),
            ));
        }
        if let Some(token) = callback.get("oauth_token") {
            if Some(token.as_str()) != pending.token() {
                return Err(self.fail(
                    generation,
                    LinkError::new(
                        LinkErrorKind::MalformedResponse,
                        "callback token does not match the pending request token",
                    ),
                ));
            }
        }

        let access_token_url = self.signer.config().access_token_url.clone();
        let mut request = match SignatureRequest::new("POST", &access_token_url) {
            Ok(request) => request,
            Err(e) => {
                self.settle(generation);
                return Err(e.into());
            }
        };
        if let Some(verifier) = callback.get("oauth_verifier") {
            request = request.protocol_param("oauth_verifier", verifier.as_str());
        }

        tracing::info!("Exchanging request token for {}", self.service_name);
        let result = self
            .post_token_request(
                request,
                &access_token_url,
                &[],
                Some(&pending),
                LinkErrorKind::Denied,
            )
            .await
            .and_then(|body| Self::parse_token_response(&body));

        match result {
            Ok((credential, extra)) => self.persist(generation, credential, extra).await,
            Err(e) => Err(self.fail(generation, e)),
        }
    }

    /// Direct username/password exchange (xAuth).
    ///
    /// A rejected pair fails with [`LinkErrorKind::InvalidCredentials`].
    pub async fn exchange_xauth(
        &self,
        username: &str,
        password: &str,
    ) -> Result<CredentialRecord, AuthError> {
        if username.is_empty() || password.is_empty() {
            return Err(LinkError::new(
                LinkErrorKind::InvalidCredentials,
                "username and password must not be empty",
            )
            .into());
        }

        let access_token_url = self.signer.config().access_token_url.clone();
        let body = vec![
            ("x_auth_username".to_string(), username.to_string()),
            ("x_auth_password".to_string(), password.to_string()),
            ("x_auth_mode".to_string(), "client_auth".to_string()),
        ];
        let request = SignatureRequest::new("POST", &access_token_url)?.params(body.clone());

        let generation = self.start_attempt(LinkState::ExchangingXAuthToken);
        tracing::info!("Exchanging xAuth credentials for {}", self.service_name);

        let result = self
            .post_token_request(
                request,
                &access_token_url,
                &body,
                None,
                LinkErrorKind::InvalidCredentials,
            )
            .await
            .and_then(|body| Self::parse_token_response(&body));

        match result {
            Ok((credential, extra)) => self.persist(generation, credential, extra).await,
            Err(e) => Err(self.fail(generation, e)),
        }
    }

    /// Persist a fresh access token, unless the attempt was overtaken.
    async fn persist(
        &self,
        generation: u64,
        credential: OAuthCredential,
        mut user_info: Map<String, Value>,
    ) -> Result<CredentialRecord, AuthError> {
        let _guard = self.persist_lock.lock().await;

        if self.current_generation() != generation {
            tracing::info!("Discarding superseded link result for {}", self.service_name);
            return Err(LinkError::new(
                LinkErrorKind::Superseded,
                "a newer link attempt or an unlink completed first",
            )
            .into());
        }

        let user_id = match user_info.get("uid") {
            Some(Value::String(uid)) if !uid.is_empty() => uid.clone(),
            _ => credential.token().unwrap_or_default().to_string(),
        };
        user_info
            .entry("uid")
            .or_insert_with(|| Value::String(user_id.clone()));

        let record = match self
            .store
            .create(&self.service_name, &user_id, &credential, user_info)
            .await
        {
            Ok(record) => record,
            Err(e) => {
                self.settle(generation);
                return Err(e.into());
            }
        };

        // The record is stored either way; a newer attempt that started
        // during the write keeps ownership of the flow state.
        let event = {
            let mut state = self.state.lock();
            if state.generation == generation {
                state.active = Some(record.clone());
                self.transition(&mut state, LinkState::Linked)
            } else {
                tracing::info!(
                    "Newer link attempt for {} in progress; leaving state {:?}",
                    self.service_name,
                    state.link_state
                );
                None
            }
        };
        tracing::info!("Linked {} user {}", self.service_name, user_id);
        if let Some(event) = event {
            self.emit(event);
        }
        self.emit(AuthEvent::Linked { user_id });
        Ok(record)
    }

    /// Identifiers of every stored record for this service.
    pub async fn linked_user_ids(&self) -> Result<Vec<String>, AuthError> {
        Ok(self
            .store
            .find_for_service(&self.service_name)
            .await?
            .into_iter()
            .map(|r| r.identifier().to_string())
            .collect())
    }

    /// Make an already stored record the active session.
    pub async fn activate(&self, user_id: &str) -> Result<CredentialRecord, AuthError> {
        let record = self
            .store
            .find_by_identifier(&self.service_name, user_id)
            .await?
            .ok_or_else(|| {
                AuthError::precondition(format!("no credential stored for user {}", user_id))
            })?;

        let event = {
            let mut state = self.state.lock();
            state.active = Some(record.clone());
            if state.pending.is_none() {
                self.transition(&mut state, LinkState::Linked)
            } else {
                None
            }
        };
        tracing::debug!("Activated {} user {}", self.service_name, user_id);
        if let Some(event) = event {
            self.emit(event);
        }
        Ok(record)
    }

    /// Cancel any in-flight attempt and settle the state. Caller holds `persist_lock`.
    fn reset_flow(&self, clear_active: impl FnOnce(&Option<CredentialRecord>) -> bool) -> Option<AuthEvent> {
        let mut state = self.state.lock();
        state.generation += 1;
        state.pending = None;
        if clear_active(&state.active) {
            state.active = None;
        }
        let settled = state.settled();
        self.transition(&mut state, settled)
    }

    /// Evict one user's record. Unlinking the active user ends the session.
    ///
    /// Unlinking an unknown user is a no-op.
    pub async fn unlink(&self, user_id: &str) -> Result<(), AuthError> {
        let _guard = self.persist_lock.lock().await;

        self.store
            .evict_identifier(&self.service_name, user_id)
            .await?;
        let event = self.reset_flow(|active| {
            active
                .as_ref()
                .is_some_and(|r| r.identifier() == user_id)
        });

        tracing::info!("Unlinked {} user {}", self.service_name, user_id);
        if let Some(event) = event {
            self.emit(event);
        }
        self.emit(AuthEvent::Unlinked {
            user_id: user_id.to_string(),
        });
        Ok(())
    }

    /// Evict every record for this service and end the session.
    pub async fn unlink_all(&self) -> Result<(), AuthError> {
        let _guard = self.persist_lock.lock().await;

        let user_ids = self.linked_user_ids().await?;
        self.store.evict_all(&self.service_name).await?;
        let event = self.reset_flow(|_| true);

        if let Some(event) = event {
            self.emit(event);
        }
        for user_id in user_ids {
            self.emit(AuthEvent::Unlinked { user_id });
        }
        Ok(())
    }

    /// Sign a request with a stored credential, or the active session if `None`.
    pub fn sign(
        &self,
        request: &SignatureRequest,
        credential: Option<&CredentialRecord>,
    ) -> Result<OAuthParameters, AuthError> {
        let active;
        let record = match credential {
            Some(record) => record,
            None => {
                active = self
                    .active_credential()
                    .ok_or_else(|| AuthError::precondition("no linked user to sign with"))?;
                &active
            }
        };

        let oauth = OAuthCredential::from_record(record)?;
        if !oauth.is_complete() {
            return Err(AuthError::precondition(format!(
                "credential for user {} has no access token",
                record.identifier()
            )));
        }
        Ok(self.signer.sign(request, Some(&oauth))?)
    }

    /// Report that the service rejected a user's credential.
    pub fn report_authentication_failure(&self, user_id: &str) {
        tracing::warn!(
            "Authentication failed for {} user {}",
            self.service_name,
            user_id
        );
        self.emit(AuthEvent::AuthenticationFailed {
            user_id: user_id.to_string(),
        });
    }
}

impl<S: SecretStore> std::fmt::Debug for AuthClient<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthClient")
            .field("service_name", &self.service_name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Query parameters of a callback URL, for [`AuthClient::complete_link`].
pub fn parse_callback_url(url: &str) -> Result<HashMap<String, String>, AuthError> {
    let parsed = Url::parse(url).map_err(|e| {
        AuthError::Link(LinkError::new(
            LinkErrorKind::MalformedResponse,
            format!("invalid callback URL: {}", e),
        ))
    })?;
    Ok(parsed.query_pairs().into_owned().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn client() -> AuthClient<MemoryStore> {
        let config = OAuthConsumerConfig::dropbox(
            "ck",
            "cs",
            "https://api.example.com",
            "https://www.example.com",
        );
        AuthClient::new(config, "dropbox", Arc::new(CredentialStore::new(MemoryStore::new()))).unwrap()
    }

    #[test]
    fn test_new_rejects_empty_consumer() {
        let store = Arc::new(CredentialStore::new(MemoryStore::new()));
        let result = AuthClient::new(OAuthConsumerConfig::new("", "cs"), "dropbox", store);
        assert!(matches!(
            result,
            Err(AuthError::Configuration(SignatureError::EmptyConsumerKey))
        ));
    }

    #[test]
    fn test_sign_without_session_is_precondition_error() {
        let client = client();
        let request = SignatureRequest::new("GET", "https://api.example.com/1/account/info").unwrap();
        assert!(matches!(
            client.sign(&request, None),
            Err(AuthError::Precondition { .. })
        ));
    }

    #[tokio::test]
    async fn test_complete_without_begin_is_precondition_error() {
        let client = client();
        let result = client.complete_link(&HashMap::new()).await;
        assert!(matches!(result, Err(AuthError::Precondition { .. })));
        assert_eq!(client.state(), LinkState::Unlinked);
    }

    #[tokio::test]
    async fn test_activate_and_sign() {
        let client = client();
        client
            .store()
            .create("dropbox", "42", &OAuthCredential::new("tok", "sec"), Map::new())
            .await
            .unwrap();
        let mut events = client.subscribe();

        client.activate("42").await.unwrap();
        assert!(client.is_linked());
        assert_eq!(client.state(), LinkState::Linked);
        assert_eq!(
            events.recv().await.unwrap(),
            AuthEvent::StateChanged(LinkState::Linked)
        );

        let request = SignatureRequest::new("GET", "https://api.example.com/1/account/info").unwrap();
        let params = client.sign(&request, None).unwrap();
        assert_eq!(params.token.as_deref(), Some("tok"));
    }

    #[tokio::test]
    async fn test_activate_unknown_user() {
        let client = client();
        assert!(matches!(
            client.activate("nobody").await,
            Err(AuthError::Precondition { .. })
        ));
    }

    #[tokio::test]
    async fn test_sign_with_incomplete_payload() {
        let client = client();
        let record = client
            .store()
            .create("dropbox", "7", &json!({"token": "only"}), Map::new())
            .await
            .unwrap();
        let request = SignatureRequest::new("GET", "https://api.example.com/1/account/info").unwrap();
        assert!(matches!(
            client.sign(&request, Some(&record)),
            Err(AuthError::Precondition { .. })
        ));
    }

    #[tokio::test]
    async fn test_unlink_active_user() {
        let client = client();
        client
            .store()
            .create("dropbox", "1", &OAuthCredential::new("t", "s"), Map::new())
            .await
            .unwrap();
        client.activate("1").await.unwrap();
        let mut events = client.subscribe();

        client.unlink("1").await.unwrap();
        assert!(!client.is_linked());
        assert_eq!(client.state(), LinkState::Unlinked);
        assert!(client.linked_user_ids().await.unwrap().is_empty());
        assert_eq!(
            events.recv().await.unwrap(),
            AuthEvent::StateChanged(LinkState::Unlinked)
        );
        assert_eq!(
            events.recv().await.unwrap(),
            AuthEvent::Unlinked {
                user_id: "1".into()
            }
        );

        // Second unlink is a no-op.
        client.unlink("1").await.unwrap();
    }

    #[tokio::test]
    async fn test_xauth_rejects_empty_input_without_request() {
        let client = client();
        let err = client.exchange_xauth("", "pw").await.unwrap_err();
        assert!(err.is_invalid_credentials());
        assert!(err.requires_reauthentication());
        assert_eq!(client.state(), LinkState::Unlinked);
    }

    #[test]
    fn test_parse_callback_url() {
        let params =
            parse_callback_url("db-ck://1/connect?oauth_token=tok&uid=42&not_approved=false").unwrap();
        assert_eq!(params["oauth_token"], "tok");
        assert_eq!(params["uid"], "42");

        assert!(parse_callback_url("not a url").is_err());
    }

    #[test]
    fn test_link_error_kinds() {
        let denied = LinkError::new(LinkErrorKind::Denied, "no");
        assert!(denied.requires_reauthentication());
        assert!(!denied.is_invalid_credentials());

        let transport = LinkError::new(LinkErrorKind::Transport, "timeout");
        assert!(!transport.requires_reauthentication());
        assert_eq!(transport.to_string(), "link failed (transport): timeout");
    }
}
