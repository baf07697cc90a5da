//! Configuration file handling.
//!
//! Settings are read from `config.toml` in the platform configuration
//! directory. A missing file yields the defaults; every field is optional.
//!
//! ```toml
//! consumer_key = "app-key"
//! consumer_secret = "app-secret"
//! signature_method = "hmac-sha1"
//! root = "sandbox"
//! ```

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::metadata::ClientRoot;
use crate::oauth::{OAuthConsumerConfig, SignatureMethod};
use crate::store::{Secret, SecretStore, create_store};
use crate::sync_store::SyncStateStore;

pub const DEFAULT_API_URL: &str = "https://api.dropbox.com";
pub const DEFAULT_WEB_URL: &str = "https://www.dropbox.com";
pub const DEFAULT_SERVICE_NAME: &str = "dropbox";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DropsyncConfig {
    /// Application key issued by the service.
    pub consumer_key: String,

    pub consumer_secret: Secret,

    pub signature_method: SignatureMethod,

    pub root: ClientRoot,

    pub api_url: String,

    /// Host serving the authorization page.
    pub web_url: String,

    /// Callback the service redirects to after authorization.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,

    /// Namespace for stored credentials.
    pub service_name: String,

    /// Keep credentials in the OS keyring rather than in memory.
    pub prefer_keyring: bool,

    /// Directory for sync state files.
    pub data_dir: PathBuf,

    /// Path to the configuration file that was loaded.
    #[serde(skip)]
    pub config_path: PathBuf,
}

impl Default for DropsyncConfig {
    fn default() -> Self {
        let data_dir = project_dirs()
            .map(|d| d.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from(".dropsync"));

        Self {
            consumer_key: String::new(),
            consumer_secret: Secret::default(),
            signature_method: SignatureMethod::HmacSha1,
            root: ClientRoot::Dropbox,
            api_url: DEFAULT_API_URL.to_string(),
            web_url: DEFAULT_WEB_URL.to_string(),
            callback_url: None,
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            prefer_keyring: true,
            data_dir,
            config_path: PathBuf::new(),
        }
    }
}

impl DropsyncConfig {
    /// Consumer configuration with the v1 OAuth endpoints of the configured hosts.
    pub fn consumer(&self) -> OAuthConsumerConfig {
        let config = OAuthConsumerConfig::dropbox(
            self.consumer_key.clone(),
            self.consumer_secret.expose(),
            &self.api_url,
            &self.web_url,
        )
        .with_signature_method(self.signature_method);

        match &self.callback_url {
            Some(callback) => config.with_callback_url(callback.clone()),
            None => config,
        }
    }

    /// Credential backend selected by `prefer_keyring`.
    pub fn secret_store(&self) -> Box<dyn SecretStore> {
        create_store(self.prefer_keyring, &self.service_name)
    }

    /// Sync state storage under `data_dir`.
    pub fn sync_store(&self) -> SyncStateStore {
        SyncStateStore::new(&self.data_dir)
    }
}

/// Load configuration from the default location or fall back to defaults.
pub fn load_config() -> Result<DropsyncConfig> {
    let config_path = project_dirs()
        .map(|d| d.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("dropsync.toml"));
    load_config_from(&config_path)
}

/// Load configuration from a specific file, which need not exist.
pub fn load_config_from(config_path: &Path) -> Result<DropsyncConfig> {
    let mut config = if config_path.exists() {
        let contents = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config from {:?}", config_path))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config from {:?}", config_path))?
    } else {
        tracing::debug!("No config at {:?}, using defaults", config_path);
        DropsyncConfig::default()
    };

    config.config_path = config_path.to_path_buf();
    Ok(config)
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "dropsync", "dropsync")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");

        let config = load_config_from(&path).unwrap();
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.service_name, "dropbox");
        assert_eq!(config.signature_method, SignatureMethod::HmacSha1);
        assert_eq!(config.config_path, path);
    }

    #[test]
    fn test_parse_partial_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
consumer_key = "ck"
consumer_secret = "cs"
signature_method = "plaintext"
root = "sandbox"
web_url = "https://web.example.com/"
content_url = "https://content.example.com"
data_dir = "/tmp/dropsync-test"
"#,
        )
        .unwrap();

        let config = load_config_from(&path).unwrap();
        assert_eq!(config.consumer_key, "ck");
        assert_eq!(config.consumer_secret.expose(), "cs");
        assert_eq!(config.root, ClientRoot::Sandbox);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/dropsync-test"));
        assert_eq!(config.api_url, DEFAULT_API_URL);

        let consumer = config.consumer();
        assert_eq!(consumer.signature_method, SignatureMethod::Plaintext);
        assert_eq!(consumer.authorization_url, "https://web.example.com/1/oauth/authorize");
        assert_eq!(
            consumer.request_token_url,
            "https://api.dropbox.com/1/oauth/request_token"
        );
        assert!(consumer.validate().is_ok());
    }

    #[test]
    fn test_unknown_signature_method_is_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "signature_method = \"RSA-SHA1\"\n").unwrap();

        let err = load_config_from(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("RSA-SHA1"));
    }

    #[test]
    fn test_secret_not_in_debug_output() {
        let config = DropsyncConfig {
            consumer_secret: Secret::new("very-secret"),
            ..DropsyncConfig::default()
        };
        assert!(!format!("{:?}", config).contains("very-secret"));
    }

    #[test]
    fn test_sync_store_uses_data_dir() {
        let temp = TempDir::new().unwrap();
        let config = DropsyncConfig {
            data_dir: temp.path().to_path_buf(),
            ..DropsyncConfig::default()
        };
        assert_eq!(config.sync_store().root(), temp.path());
    }
}
