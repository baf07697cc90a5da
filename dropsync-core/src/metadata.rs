//! Remote file metadata and account information.
//!
//! Field names follow the Dropbox v1 JSON shapes on the wire and the
//! descriptive Rust names in code.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Metadata for one remote file or directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Path in its original case.
    pub path: String,

    #[serde(rename = "is_dir", default)]
    pub is_directory: bool,

    #[serde(default)]
    pub is_deleted: bool,

    /// Opaque revision identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,

    /// Legacy numeric revision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<i64>,

    /// Directory listing hash, used for conditional metadata requests.
    #[serde(rename = "hash", default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,

    /// Size in bytes.
    #[serde(rename = "bytes", default)]
    pub size: u64,

    #[serde(rename = "size", default, skip_serializing_if = "Option::is_none")]
    pub human_readable_size: Option<String>,

    #[serde(rename = "modified", default, with = "rfc2822", skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,

    #[serde(rename = "client_mtime", default, with = "rfc2822", skip_serializing_if = "Option::is_none")]
    pub client_modified_at: Option<DateTime<Utc>>,

    /// Listing of a directory; always empty for files.
    #[serde(rename = "contents", default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Metadata>,

    #[serde(rename = "thumb_exists", default)]
    pub thumbnail_exists: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
}

impl Metadata {
    fn bare(path: impl Into<String>, is_directory: bool) -> Self {
        Self {
            path: path.into(),
            is_directory,
            is_deleted: false,
            rev: None,
            revision: None,
            content_hash: None,
            size: 0,
            human_readable_size: None,
            modified_at: None,
            client_modified_at: None,
            children: Vec::new(),
            thumbnail_exists: false,
            icon: None,
            root: None,
        }
    }

    /// Metadata for a file.
    pub fn file(path: impl Into<String>, size: u64) -> Self {
        Self {
            size,
            ..Self::bare(path, false)
        }
    }

    /// Metadata for a directory without a listing.
    pub fn directory(path: impl Into<String>) -> Self {
        Self::bare(path, true)
    }

    pub fn with_rev(mut self, rev: impl Into<String>) -> Self {
        self.rev = Some(rev.into());
        self
    }

    /// Attach a listing. Ignored for files.
    pub fn with_children(mut self, children: Vec<Metadata>) -> Self {
        if self.is_directory {
            self.children = children;
        }
        self
    }

    /// Last path component, or empty for the root.
    pub fn filename(&self) -> &str {
        self.path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
    }
}

/// Which namespace paths are resolved against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientRoot {
    /// The user's whole Dropbox.
    #[default]
    Dropbox,
    /// The application's own folder.
    Sandbox,
}

impl ClientRoot {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientRoot::Dropbox => "dropbox",
            ClientRoot::Sandbox => "sandbox",
        }
    }
}

impl std::fmt::Display for ClientRoot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage quota in bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quota {
    #[serde(default)]
    pub normal: u64,

    #[serde(default)]
    pub shared: u64,

    #[serde(rename = "quota", default)]
    pub total: u64,
}

impl Quota {
    /// Bytes consumed by owned and shared files.
    pub fn consumed(&self) -> u64 {
        self.normal.saturating_add(self.shared)
    }
}

/// The linked user's account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountInfo {
    #[serde(deserialize_with = "string_or_number")]
    pub uid: String,

    #[serde(default)]
    pub display_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referral_link: Option<String>,

    #[serde(rename = "quota_info", default)]
    pub quota: Quota,
}

/// User ids arrive as JSON numbers from some endpoints and strings from others.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

/// RFC 2822 timestamps (`Sat, 21 Aug 2010 22:31:20 +0000`).
mod rfc2822 {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(dt) => serializer.serialize_str(&dt.to_rfc2822()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            Some(raw) if !raw.trim().is_empty() => DateTime::parse_from_rfc2822(raw.trim())
                .map(|dt| Some(dt.with_timezone(&Utc)))
                .map_err(serde::de::Error::custom),
            _ => Ok(None),
        }
    }
}
