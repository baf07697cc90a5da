//! Keyed persistence of signed-in user records.
//!
//! A [`CredentialRecord`] is an immutable snapshot of one signed-in user for
//! one service: the service name, a display username, a unique identifier, an
//! opaque serialisable payload (for OAuth this is an
//! [`OAuthCredential`](crate::oauth::OAuthCredential)) and free-form user info.
//!
//! [`CredentialStore`] maps `(service_name, identifier)` onto a
//! [`SecretStore`] key and keeps a per-service index so that records can be
//! enumerated on backends that cannot list their keys.
//!
//! # Storage Key Convention
//!
//! - record: `dropsync/{service}/{identifier}`
//! - index:  `dropsync/{service}/.index`
//!
//! Service and identifier are percent-encoded as key segments, so `/` in
//! either never crosses into another identity. An encoded segment never
//! begins with `.`; a leading dot is written as `%2E`, which keeps `.index`
//! out of reach of any identifier.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::oauth::percent_encode;
use crate::store::{Secret, SecretStore, StoreError};

const KEY_PREFIX: &str = "dropsync";
const INDEX_NAME: &str = ".index";

/// Error type for credential store operations.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// A record must belong to a named service.
    #[error("credential service name must not be empty")]
    EmptyServiceName,

    /// A record must have a unique identifier within its service.
    #[error("credential identifier must not be empty")]
    EmptyIdentifier,

    /// The record to update is no longer persisted.
    #[error("credential {service}/{identifier} not found")]
    NotFound { service: String, identifier: String },

    /// The payload could not be converted to or from the requested type.
    #[error("credential payload error: {0}")]
    Payload(#[source] serde_json::Error),

    /// The underlying secret store failed.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

/// Immutable snapshot of a persisted signed-in user.
///
/// Identity is `(service_name, identifier)`. The identifier defaults to the
/// username but is decoupled from it so several records may share a username.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialRecord {
    service_name: String,
    username: String,
    identifier: String,
    payload: Value,
    #[serde(default)]
    user_info: Map<String, Value>,
    created_at: DateTime<Utc>,
}

impl CredentialRecord {
    /// Build a record that has not been persisted yet.
    pub fn new(
        service_name: impl Into<String>,
        identifier: impl Into<String>,
        username: impl Into<String>,
        payload: Value,
        user_info: Map<String, Value>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            username: username.into(),
            identifier: identifier.into(),
            payload,
            user_info,
            created_at: Utc::now(),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn user_info(&self) -> &Map<String, Value> {
        &self.user_info
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Decode the payload into a concrete type.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, CredentialError> {
        serde_json::from_value(self.payload.clone()).map_err(CredentialError::Payload)
    }

    /// Copy of this record with a different username.
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    /// Copy of this record with a different payload.
    pub fn with_payload<T: Serialize>(mut self, payload: &T) -> Result<Self, CredentialError> {
        self.payload = serde_json::to_value(payload).map_err(CredentialError::Payload)?;
        Ok(self)
    }

    /// Copy of this record with replaced user info.
    pub fn with_user_info(mut self, user_info: Map<String, Value>) -> Self {
        self.user_info = user_info;
        self
    }

    /// Mutable working copy; persist it with [`CredentialStore::commit`].
    pub fn to_mutable(&self) -> MutableCredentialRecord {
        MutableCredentialRecord {
            inner: self.clone(),
        }
    }

    fn validate(&self) -> Result<(), CredentialError> {
        if self.service_name.trim().is_empty() {
            return Err(CredentialError::EmptyServiceName);
        }
        if self.identifier.trim().is_empty() {
            return Err(CredentialError::EmptyIdentifier);
        }
        Ok(())
    }
}

impl std::fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("service_name", &self.service_name)
            .field("username", &self.username)
            .field("identifier", &self.identifier)
            .field("payload", &"[REDACTED]")
            .field("user_info", &self.user_info)
            .finish()
    }
}

/// Mutable variant of [`CredentialRecord`].
///
/// Service name and identifier are fixed; everything else may be edited
/// before the record is committed back to the store.
#[derive(Debug, Clone)]
pub struct MutableCredentialRecord {
    inner: CredentialRecord,
}

impl MutableCredentialRecord {
    pub fn service_name(&self) -> &str {
        &self.inner.service_name
    }

    pub fn identifier(&self) -> &str {
        &self.inner.identifier
    }

    pub fn username(&self) -> &str {
        &self.inner.username
    }

    pub fn set_username(&mut self, username: impl Into<String>) {
        self.inner.username = username.into();
    }

    pub fn set_payload<T: Serialize>(&mut self, payload: &T) -> Result<(), CredentialError> {
        self.inner.payload = serde_json::to_value(payload).map_err(CredentialError::Payload)?;
        Ok(())
    }

    pub fn set_user_info(&mut self, user_info: Map<String, Value>) {
        self.inner.user_info = user_info;
    }

    pub fn insert_user_info(&mut self, key: impl Into<String>, value: Value) {
        self.inner.user_info.insert(key.into(), value);
    }

    /// Snapshot of the current edits without persisting them.
    pub fn snapshot(&self) -> CredentialRecord {
        self.inner.clone()
    }
}

/// Keyed persistence of [`CredentialRecord`]s on top of a [`SecretStore`].
///
/// All writes reach the backend before the call returns. Mutations are
/// serialised per service, so a read-modify-write of one record never
/// interleaves with another write to the same service's records or index.
pub struct CredentialStore<S: SecretStore> {
    backend: S,
    locks: parking_lot::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl<S: SecretStore> CredentialStore<S> {
    /// Wrap a secret store backend.
    pub fn new(backend: S) -> Self {
        Self {
            backend,
            locks: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Access the underlying backend.
    pub fn backend(&self) -> &S {
        &self.backend
    }

    fn key_segment(value: &str) -> String {
        let encoded = percent_encode(value);
        match encoded.strip_prefix('.') {
            Some(rest) => format!("%2E{}", rest),
            None => encoded,
        }
    }

    fn record_key(service: &str, identifier: &str) -> String {
        format!(
            "{}/{}/{}",
            KEY_PREFIX,
            Self::key_segment(service),
            Self::key_segment(identifier)
        )
    }

    fn index_key(service: &str) -> String {
        format!("{}/{}/{}", KEY_PREFIX, Self::key_segment(service), INDEX_NAME)
    }

    fn service_lock(&self, service: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(service.to_string())
            .or_default()
            .clone()
    }

    async fn read_index(&self, service: &str) -> Result<Vec<String>, CredentialError> {
        match self.backend.get(&Self::index_key(service)).await? {
            Some(raw) => Ok(serde_json::from_str(raw.expose()).map_err(StoreError::from)?),
            None => Ok(Vec::new()),
        }
    }

    async fn write_index(&self, service: &str, index: &[String]) -> Result<(), CredentialError> {
        let key = Self::index_key(service);
        if index.is_empty() {
            self.backend.delete(&key).await?;
        } else {
            let raw = serde_json::to_string(index).map_err(StoreError::from)?;
            self.backend.set(&key, &Secret::new(raw)).await?;
        }
        Ok(())
    }

    async fn load(&self, service: &str, identifier: &str) -> Result<Option<CredentialRecord>, CredentialError> {
        match self.backend.get(&Self::record_key(service, identifier)).await? {
            Some(raw) => {
                let record = serde_json::from_str(raw.expose()).map_err(StoreError::from)?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Write a record and register it in the index. Caller holds the service lock.
    async fn write(&self, record: &CredentialRecord) -> Result<(), CredentialError> {
        record.validate()?;

        let raw = serde_json::to_string(record).map_err(StoreError::from)?;
        self.backend
            .set(
                &Self::record_key(&record.service_name, &record.identifier),
                &Secret::new(raw),
            )
            .await?;

        let mut index = self.read_index(&record.service_name).await?;
        if !index.iter().any(|id| id == &record.identifier) {
            index.push(record.identifier.clone());
            self.write_index(&record.service_name, &index).await?;
        }

        tracing::debug!(
            "Persisted credential {}/{}",
            record.service_name,
            record.identifier
        );
        Ok(())
    }

    /// Persist a record as-is, replacing any record with the same identity.
    pub async fn save(&self, record: &CredentialRecord) -> Result<(), CredentialError> {
        let lock = self.service_lock(&record.service_name);
        let _guard = lock.lock().await;
        self.write(record).await
    }

    /// All records for a service. No ordering is guaranteed.
    pub async fn find_for_service(&self, service: &str) -> Result<Vec<CredentialRecord>, CredentialError> {
        let mut records = Vec::new();
        for identifier in self.read_index(service).await? {
            // Index entries whose record vanished are skipped rather than reported.
            if let Some(record) = self.load(service, &identifier).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Look up a record by username.
    ///
    /// When several records share a username the match returned is
    /// unspecified; use [`find_by_identifier`](Self::find_by_identifier)
    /// for an unambiguous lookup.
    pub async fn find_by_username(
        &self,
        service: &str,
        username: &str,
    ) -> Result<Option<CredentialRecord>, CredentialError> {
        Ok(self
            .find_for_service(service)
            .await?
            .into_iter()
            .find(|r| r.username == username))
    }

    /// Exact lookup by `(service, identifier)`.
    pub async fn find_by_identifier(
        &self,
        service: &str,
        identifier: &str,
    ) -> Result<Option<CredentialRecord>, CredentialError> {
        self.load(service, identifier).await
    }

    /// Create and persist a record whose identifier is its username.
    pub async fn create<T: Serialize>(
        &self,
        service: &str,
        username: &str,
        payload: &T,
        user_info: Map<String, Value>,
    ) -> Result<CredentialRecord, CredentialError> {
        self.create_with_identifier(service, username, username, payload, user_info)
            .await
    }

    /// Create and persist a record with an explicit unique identifier.
    pub async fn create_with_identifier<T: Serialize>(
        &self,
        service: &str,
        identifier: &str,
        username: &str,
        payload: &T,
        user_info: Map<String, Value>,
    ) -> Result<CredentialRecord, CredentialError> {
        let payload = serde_json::to_value(payload).map_err(CredentialError::Payload)?;
        let record = CredentialRecord::new(service, identifier, username, payload, user_info);
        self.save(&record).await?;
        Ok(record)
    }

    /// Persist the edits held by a mutable record.
    ///
    /// Fails with [`CredentialError::NotFound`] if the record was evicted
    /// after the working copy was taken; an eviction is never undone by a
    /// stale commit.
    pub async fn commit(&self, record: MutableCredentialRecord) -> Result<CredentialRecord, CredentialError> {
        let record = record.inner;
        let lock = self.service_lock(&record.service_name);
        let _guard = lock.lock().await;

        if self
            .load(&record.service_name, &record.identifier)
            .await?
            .is_none()
        {
            return Err(CredentialError::NotFound {
                service: record.service_name.clone(),
                identifier: record.identifier.clone(),
            });
        }

        self.write(&record).await?;
        Ok(record)
    }

    /// Atomically re-read, edit and persist one record.
    ///
    /// Fails with [`CredentialError::NotFound`] if the record was evicted
    /// in the meantime.
    pub async fn update<F>(&self, record: &CredentialRecord, edit: F) -> Result<CredentialRecord, CredentialError>
    where
        F: FnOnce(&mut MutableCredentialRecord) -> Result<(), CredentialError>,
    {
        let lock = self.service_lock(&record.service_name);
        let _guard = lock.lock().await;

        let current = self
            .load(&record.service_name, &record.identifier)
            .await?
            .ok_or_else(|| CredentialError::NotFound {
                service: record.service_name.clone(),
                identifier: record.identifier.clone(),
            })?;

        let mut mutable = current.to_mutable();
        edit(&mut mutable)?;
        let updated = mutable.inner;
        self.write(&updated).await?;
        Ok(updated)
    }

    /// Remove a record. Evicting an absent record is a no-op.
    pub async fn evict(&self, record: &CredentialRecord) -> Result<(), CredentialError> {
        self.evict_identifier(&record.service_name, &record.identifier)
            .await
    }

    /// Remove a record by identity. Evicting an absent record is a no-op.
    pub async fn evict_identifier(&self, service: &str, identifier: &str) -> Result<(), CredentialError> {
        let lock = self.service_lock(service);
        let _guard = lock.lock().await;

        let mut index = self.read_index(service).await?;
        let before = index.len();
        index.retain(|id| id != identifier);
        if index.len() != before {
            self.write_index(service, &index).await?;
        }
        self.backend
            .delete(&Self::record_key(service, identifier))
            .await?;

        tracing::debug!("Evicted credential {}/{}", service, identifier);
        Ok(())
    }

    /// Remove every record for a service, returning how many were indexed.
    pub async fn evict_all(&self, service: &str) -> Result<usize, CredentialError> {
        let lock = self.service_lock(service);
        let _guard = lock.lock().await;

        let index = self.read_index(service).await?;
        for identifier in &index {
            self.backend
                .delete(&Self::record_key(service, identifier))
                .await?;
        }
        self.write_index(service, &[]).await?;

        tracing::info!("Evicted {} credential(s) for {}", index.len(), service);
        Ok(index.len())
    }
}

impl<S: SecretStore + std::fmt::Debug> std::fmt::Debug for CredentialStore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("backend", &self.backend)
            .finish()
    }
}
