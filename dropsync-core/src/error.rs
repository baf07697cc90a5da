//! Top-level error type for dropsync.

use thiserror::Error;

use crate::credential::CredentialError;
use crate::delta::SyncError;
use crate::oauth::SignatureError;
use crate::store::StoreError;
use crate::sync_store::SyncStoreError;

#[cfg(feature = "oauth")]
use crate::auth::AuthError;
#[cfg(feature = "oauth")]
use crate::client::ClientError;

/// Top-level error type encompassing all dropsync errors.
#[derive(Debug, Error)]
pub enum DropsyncError {
    /// Error from secret storage operations.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Error from credential record operations.
    #[error("credential error: {0}")]
    Credential(#[from] CredentialError),

    /// Invalid consumer configuration.
    #[error("signature error: {0}")]
    Signature(#[from] SignatureError),

    /// Error from the link flows.
    #[cfg(feature = "oauth")]
    #[error("auth error: {0}")]
    Auth(#[from] AuthError),

    /// Error from an API request.
    #[cfg(feature = "oauth")]
    #[error("client error: {0}")]
    Client(#[from] ClientError),

    /// Malformed delta page.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// Error persisting sync state.
    #[error("sync state error: {0}")]
    SyncStore(#[from] SyncStoreError),
}

impl DropsyncError {
    /// The user has to link again before requests can succeed.
    pub fn requires_reauthentication(&self) -> bool {
        match self {
            #[cfg(feature = "oauth")]
            DropsyncError::Auth(e) => e.requires_reauthentication(),
            #[cfg(feature = "oauth")]
            DropsyncError::Client(e) => e.requires_reauthentication(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversions() {
        let err: DropsyncError = SyncError::MissingCursor.into();
        assert!(matches!(err, DropsyncError::Sync(_)));
        assert!(!err.requires_reauthentication());

        let err: DropsyncError = SignatureError::EmptyConsumerKey.into();
        assert_eq!(
            err.to_string(),
            "signature error: configuration error: consumer key is empty"
        );
    }

    #[cfg(feature = "oauth")]
    #[test]
    fn test_unauthorized_requires_reauthentication() {
        let err: DropsyncError = ClientError::Unauthorized {
            user_id: "42".into(),
        }
        .into();
        assert!(err.requires_reauthentication());
    }
}
