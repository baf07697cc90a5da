//! Delta-based metadata reconciliation.
//!
//! The remote change stream arrives in pages. Each page carries an ordered
//! list of entries (an upsert when metadata is present, a tombstone when it
//! is null), a reset flag, the cursor to resume from, and whether more pages
//! are pending. [`DeltaReconciler`] folds one page into a [`SyncState`].
//!
//! # Semantics
//!
//! - `reset` discards every local entry before the page is applied.
//! - Entries apply strictly in order; later entries for a path win.
//! - Tombstones are deep: deleting a directory deletes its descendants.
//! - Upserts replace whatever was at the path, including type changes.
//!   Replacing a directory with a file drops the former descendants.
//! - The cursor always advances to the page's cursor, even for empty pages.
//! - `has_more` is only a hint to the caller to fetch again.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::metadata::Metadata;

/// Error type for malformed delta pages.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The page carries no cursor to resume from.
    #[error("sync protocol error: delta page has no cursor")]
    MissingCursor,

    /// An entry path is empty.
    #[error("sync protocol error: invalid entry path {path:?}")]
    InvalidPath { path: String },

    /// An entry's metadata describes a different path than the entry key.
    #[error("sync protocol error: entry {entry:?} carries metadata for {metadata:?}")]
    PathMismatch { entry: String, metadata: String },

    /// The page body could not be decoded.
    #[error("sync protocol error: malformed delta page: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Normalise a remote path for matching.
///
/// Ensures a leading `/`, strips trailing `/` (except for the root) and
/// lowercases. Returns `None` for an empty path.
pub fn normalize_path(path: &str) -> Option<String> {
    if path.is_empty() {
        return None;
    }
    let trimmed = path.trim_end_matches('/');
    let mut normalized = String::with_capacity(trimmed.len() + 1);
    if !trimmed.starts_with('/') {
        normalized.push('/');
    }
    normalized.push_str(&trimmed.to_lowercase());
    Some(normalized)
}

fn descendant_prefix(normalized: &str) -> String {
    if normalized == "/" {
        "/".to_string()
    } else {
        format!("{}/", normalized)
    }
}

/// One change in the stream: upsert when `metadata` is present, delete otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "(String, Option<Metadata>)", into = "(String, Option<Metadata>)")]
pub struct DeltaEntry {
    /// Path as sent by the server (lowercased on the wire, but not relied upon).
    pub path: String,
    pub metadata: Option<Metadata>,
}

impl DeltaEntry {
    pub fn upsert(path: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            path: path.into(),
            metadata: Some(metadata),
        }
    }

    pub fn tombstone(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            metadata: None,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.metadata.is_none()
    }
}

impl From<(String, Option<Metadata>)> for DeltaEntry {
    fn from((path, metadata): (String, Option<Metadata>)) -> Self {
        Self { path, metadata }
    }
}

impl From<DeltaEntry> for (String, Option<Metadata>) {
    fn from(entry: DeltaEntry) -> Self {
        (entry.path, entry.metadata)
    }
}

/// One page of the change stream as returned by the delta endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeltaPage {
    #[serde(default)]
    pub entries: Vec<DeltaEntry>,

    #[serde(default)]
    pub reset: bool,

    #[serde(default)]
    pub cursor: Option<String>,

    #[serde(default)]
    pub has_more: bool,
}

impl DeltaPage {
    /// Decode a delta response body.
    pub fn from_json(body: &str) -> Result<Self, SyncError> {
        Ok(serde_json::from_str(body)?)
    }
}

/// Local snapshot of remote metadata plus the cursor to resume from.
///
/// Keys are normalised paths; values keep the original-case path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    #[serde(default)]
    pub cursor: Option<String>,

    #[serde(default)]
    entries: BTreeMap<String, Metadata>,
}

impl SyncState {
    /// Empty state with no cursor.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &BTreeMap<String, Metadata> {
        &self.entries
    }

    /// Look up by any casing of the path.
    pub fn get(&self, path: &str) -> Option<&Metadata> {
        normalize_path(path).and_then(|p| self.entries.get(&p))
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Direct children of a directory.
    pub fn children_of(&self, dir: &str) -> Vec<&Metadata> {
        let Some(dir) = normalize_path(dir) else {
            return Vec::new();
        };
        let prefix = descendant_prefix(&dir);
        self.entries
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter(|(k, _)| k.len() > prefix.len() && !k[prefix.len()..].contains('/'))
            .map(|(_, v)| v)
            .collect()
    }

    fn remove_tree(&mut self, normalized: &str) -> usize {
        let prefix = descendant_prefix(normalized);
        let before = self.entries.len();
        self.entries
            .retain(|k, _| k != normalized && !k.starts_with(&prefix));
        before - self.entries.len()
    }

    fn remove_descendants(&mut self, normalized: &str) {
        let prefix = descendant_prefix(normalized);
        self.entries
            .retain(|k, _| k == normalized || !k.starts_with(&prefix));
    }
}

/// Stateless transformer folding delta pages into a [`SyncState`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DeltaReconciler;

impl DeltaReconciler {
    /// Apply a decoded page.
    pub fn apply(state: SyncState, page: DeltaPage) -> Result<SyncState, SyncError> {
        let cursor = page.cursor.ok_or(SyncError::MissingCursor)?;
        Self::apply_page(state, page.entries, page.reset, cursor, page.has_more)
    }

    /// Apply one page of entries.
    ///
    /// The page is validated before anything is touched, so on error the
    /// caller's previous state is unaffected.
    pub fn apply_page(
        mut state: SyncState,
        entries: Vec<DeltaEntry>,
        reset: bool,
        cursor: impl Into<String>,
        has_more: bool,
    ) -> Result<SyncState, SyncError> {
        let cursor = cursor.into();
        if cursor.is_empty() {
            return Err(SyncError::MissingCursor);
        }

        let mut changes = Vec::with_capacity(entries.len());
        for entry in entries {
            let key = normalize_path(&entry.path).ok_or_else(|| SyncError::InvalidPath {
                path: entry.path.clone(),
            })?;
            if let Some(meta) = &entry.metadata {
                if normalize_path(&meta.path).as_deref() != Some(key.as_str()) {
                    return Err(SyncError::PathMismatch {
                        entry: entry.path.clone(),
                        metadata: meta.path.clone(),
                    });
                }
            }
            changes.push((key, entry.metadata));
        }

        if reset {
            tracing::info!("Delta reset: discarding {} local entries", state.len());
            state.entries.clear();
        }

        let mut upserts = 0usize;
        let mut removed = 0usize;
        for (key, metadata) in changes {
            match metadata {
                Some(meta) => {
                    if !meta.is_directory {
                        state.remove_descendants(&key);
                    }
                    state.entries.insert(key, meta);
                    upserts += 1;
                }
                None => {
                    removed += state.remove_tree(&key);
                }
            }
        }

        tracing::debug!(
            "Applied delta page: {} upserts, {} removals, has_more={}",
            upserts,
            removed,
            has_more
        );

        state.cursor = Some(cursor);
        Ok(state)
    }
}
