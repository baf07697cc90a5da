//! Integration tests for delta reconciliation.
//!
//! These tests verify that:
//! - Reconciliation properties hold across multi-page sequences
//! - The sync driver follows cursors until the stream is caught up
//! - A rejected page leaves the last good state and cursor in place
//! - Sync state survives a save/load cycle on disk

use dropsync_core::{
    DeltaEntry, DeltaPage, DeltaReconciler, Metadata, SyncError, SyncState, SyncStateStore,
};
use tempfile::TempDir;

fn apply(state: SyncState, entries: Vec<DeltaEntry>, reset: bool, cursor: &str) -> SyncState {
    DeltaReconciler::apply_page(state, entries, reset, cursor, false).unwrap()
}

#[test]
fn test_create_then_delete_in_one_page_leaves_table_empty() {
    let state = apply(
        SyncState::new(),
        vec![
            DeltaEntry::upsert("/x", Metadata::file("/x", 1)),
            DeltaEntry::tombstone("/x"),
        ],
        false,
        "c1",
    );
    assert!(state.is_empty());
    assert_eq!(state.cursor.as_deref(), Some("c1"));
}

#[test]
fn test_deep_delete_of_directory() {
    let state = apply(
        SyncState::new(),
        vec![
            DeltaEntry::upsert("/a", Metadata::directory("/a")),
            DeltaEntry::upsert("/a/b", Metadata::file("/a/b", 1)),
        ],
        false,
        "c1",
    );
    let state = apply(state, vec![DeltaEntry::tombstone("/a")], false, "c2");
    assert!(state.is_empty());
}

#[test]
fn test_reset_matches_fresh_application() {
    let page = vec![
        DeltaEntry::upsert("/docs", Metadata::directory("/Docs")),
        DeltaEntry::upsert("/docs/readme.md", Metadata::file("/Docs/README.md", 5)),
    ];
    let stale = apply(
        SyncState::new(),
        vec![DeltaEntry::upsert("/old", Metadata::file("/old", 1))],
        false,
        "c0",
    );

    let reset = apply(stale, page.clone(), true, "c1");
    let fresh = apply(SyncState::new(), page, false, "c1");
    assert_eq!(reset.entries(), fresh.entries());
}

#[test]
fn test_reapplying_pages_is_idempotent() {
    let pages: Vec<(Vec<DeltaEntry>, bool, &str)> = vec![
        (
            vec![
                DeltaEntry::upsert("/a", Metadata::directory("/a")),
                DeltaEntry::upsert("/a/1", Metadata::file("/a/1", 1)),
            ],
            true,
            "c1",
        ),
        (
            vec![
                DeltaEntry::upsert("/a/1", Metadata::directory("/a/1")),
                DeltaEntry::upsert("/a/1/x", Metadata::file("/a/1/x", 1)),
                DeltaEntry::tombstone("/gone"),
            ],
            false,
            "c2",
        ),
    ];

    for (entries, reset, cursor) in pages {
        let base = apply(SyncState::new(), Vec::new(), false, "c0");
        let once = apply(base, entries.clone(), reset, cursor);
        let twice = apply(once.clone(), entries, reset, cursor);
        assert_eq!(once, twice);
    }
}

#[test]
fn test_case_insensitive_matching_keeps_latest_display_path() {
    let state = apply(
        SyncState::new(),
        vec![DeltaEntry::upsert("/Readme.TXT", Metadata::file("/Readme.TXT", 1))],
        false,
        "c1",
    );
    let state = apply(
        state,
        vec![DeltaEntry::upsert("/readme.txt", Metadata::file("/README.txt", 2))],
        false,
        "c2",
    );

    assert_eq!(state.len(), 1);
    let entry = state.get("/README.TXT").unwrap();
    assert_eq!(entry.path, "/README.txt");
    assert_eq!(entry.size, 2);
}

#[test]
fn test_rejected_page_leaves_input_untouched() {
    let state = apply(
        SyncState::new(),
        vec![DeltaEntry::upsert("/keep", Metadata::file("/keep", 1))],
        false,
        "c1",
    );
    let page = DeltaPage {
        entries: vec![DeltaEntry::upsert("/x", Metadata::file("/elsewhere", 1))],
        reset: true,
        cursor: Some("c2".into()),
        has_more: false,
    };

    let result = DeltaReconciler::apply(state.clone(), page);
    assert!(matches!(result, Err(SyncError::PathMismatch { .. })));
    assert!(state.contains("/keep"));
    assert_eq!(state.cursor.as_deref(), Some("c1"));
}

#[test]
fn test_state_persists_between_sessions() {
    let temp = TempDir::new().unwrap();
    let state = apply(
        SyncState::new(),
        vec![
            DeltaEntry::upsert("/a", Metadata::directory("/A")),
            DeltaEntry::upsert("/a/b.txt", Metadata::file("/A/b.txt", 9).with_rev("r1")),
        ],
        false,
        "c9",
    );

    SyncStateStore::new(temp.path())
        .save("dropbox", "42", &state)
        .unwrap();
    let loaded = SyncStateStore::new(temp.path())
        .load("dropbox", "42")
        .unwrap()
        .unwrap();

    assert_eq!(loaded, state);
    assert_eq!(loaded.children_of("/a").len(), 1);
}

#[cfg(feature = "oauth")]
mod driver {
    use super::*;
    use std::sync::Arc;

    use dropsync_core::{
        AuthClient, ClientError, ClientRoot, CredentialStore, DropboxClient, MemoryStore,
        OAuthConsumerConfig, OAuthCredential,
    };
    use serde_json::{Map, json};
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_string_contains, method, path},
    };

    async fn client(server: &MockServer) -> DropboxClient<MemoryStore> {
        let config = OAuthConsumerConfig::dropbox("ck", "cs", &server.uri(), "https://www.example.com");
        let store = Arc::new(CredentialStore::new(MemoryStore::new()));
        let auth = AuthClient::new(config, "dropbox", store).unwrap();
        auth.store()
            .create("dropbox", "42", &OAuthCredential::new("at", "as"), Map::new())
            .await
            .unwrap();
        auth.activate("42").await.unwrap();
        DropboxClient::new(Arc::new(auth), server.uri(), ClientRoot::Dropbox)
    }

    async fn mount_first_page(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/1/delta"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "entries": [
                    ["/photos", {"path": "/Photos", "is_dir": true}],
                    ["/photos/a.jpg", {"path": "/Photos/a.jpg", "bytes": 10}]
                ],
                "reset": true,
                "cursor": "c1",
                "has_more": true
            })))
            .with_priority(5)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_sync_follows_cursor_until_caught_up() {
        let server = MockServer::start().await;
        mount_first_page(&server).await;
        Mock::given(method("POST"))
            .and(path("/1/delta"))
            .and(body_string_contains("cursor=c1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "entries": [
                    ["/photos/a.jpg", null],
                    ["/notes.txt", {"path": "/Notes.txt", "bytes": 4}]
                ],
                "reset": false,
                "cursor": "c2",
                "has_more": false
            })))
            .with_priority(1)
            .mount(&server)
            .await;
        let client = client(&server).await;

        let mut state = SyncState::new();
        let pages = client.sync(&mut state).await.unwrap();

        assert_eq!(pages, 2);
        assert_eq!(state.cursor.as_deref(), Some("c2"));
        assert!(state.contains("/photos"));
        assert!(!state.contains("/photos/a.jpg"));
        assert_eq!(state.get("/notes.txt").unwrap().path, "/Notes.txt");
    }

    #[tokio::test]
    async fn test_sync_stops_at_bad_page_keeping_progress() {
        let server = MockServer::start().await;
        mount_first_page(&server).await;
        Mock::given(method("POST"))
            .and(path("/1/delta"))
            .and(body_string_contains("cursor=c1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "entries": [],
                "reset": false,
                "has_more": false
            })))
            .with_priority(1)
            .mount(&server)
            .await;
        let client = client(&server).await;

        let mut state = SyncState::new();
        let err = client.sync(&mut state).await.unwrap_err();

        assert!(matches!(err, ClientError::Sync(SyncError::MissingCursor)));
        assert_eq!(state.cursor.as_deref(), Some("c1"));
        assert_eq!(state.len(), 2);
    }
}
