//! # Dropsync Core
//!
//! Client-side core for a cloud-storage REST API using OAuth 1.0.
//!
//! This crate provides:
//! - Keyed persistence of signed-in user records over pluggable secret stores
//! - OAuth 1.0 request signing (HMAC-SHA1 and PLAINTEXT)
//! - Three-legged and xAuth account linking with state-change notifications
//! - A delta reconciler folding the remote change stream into a local
//!   metadata snapshot, plus a thin API client that drives it
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use dropsync_core::{AuthClient, CredentialStore, DropboxClient, SyncState, load_config};
//!
//! async fn sync_once() -> anyhow::Result<SyncState> {
//!     let config = load_config()?;
//!     let store = Arc::new(CredentialStore::new(config.secret_store()));
//!     let auth = Arc::new(AuthClient::new(config.consumer(), &config.service_name, store)?);
//!
//!     let user_id = auth.linked_user_ids().await?.into_iter().next()
//!         .ok_or_else(|| anyhow::anyhow!("no linked account"))?;
//!     auth.activate(&user_id).await?;
//!
//!     let client = DropboxClient::new(auth, &config.api_url, config.root);
//!     let sync_store = config.sync_store();
//!     let mut state = sync_store.load(&config.service_name, &user_id)?.unwrap_or_default();
//!     client.sync(&mut state).await?;
//!     sync_store.save(&config.service_name, &user_id, &state)?;
//!     Ok(state)
//! }
//! ```

pub mod config;
pub mod credential;
pub mod delta;
pub mod error;
pub mod metadata;
pub mod oauth;
pub mod store;
pub mod sync_store;

#[cfg(feature = "oauth")]
pub mod auth;

#[cfg(feature = "oauth")]
pub mod client;

// Re-export commonly used types at crate root
pub use config::{DropsyncConfig, load_config, load_config_from};

pub use credential::{
    CredentialError,
    CredentialRecord,
    CredentialStore,
    MutableCredentialRecord,
};

pub use delta::{
    DeltaEntry,
    DeltaPage,
    DeltaReconciler,
    SyncError,
    SyncState,
    normalize_path,
};

pub use error::DropsyncError;

pub use metadata::{AccountInfo, ClientRoot, Metadata, Quota};

pub use oauth::{
    OAuthConsumerConfig,
    OAuthCredential,
    OAuthSigner,
    SignatureError,
    SignatureMethod,
    SignatureRequest,
};

pub use store::{
    Secret,
    SecretStore,
    StoreError,
    MemoryStore,
    create_store,
};

#[cfg(feature = "keyring-store")]
pub use store::KeyringStore;

pub use sync_store::{SyncStateStore, SyncStoreError};

#[cfg(feature = "oauth")]
pub use auth::{
    AuthClient,
    AuthError,
    AuthEvent,
    LinkError,
    LinkErrorKind,
    LinkState,
    PendingLink,
    parse_callback_url,
};

#[cfg(feature = "oauth")]
pub use client::{ClientError, DropboxClient, MetadataQuery};
