//! Wire-level sync behavior against a mocked Core server: delivery,
//! retry classification, metadata re-delivery, orphan cleanup, and
//! verification.

mod common;

use std::sync::Arc;

use httpmock::prelude::*;
use regex::Regex;
use serde_json::json;
use tempfile::TempDir;
use uuid::Uuid;

use lexsync::{
    ChangeEvent, InMemoryCatalog, SourceContent, SourceRef, SqliteStore, SyncLogStatus,
    SyncOrchestrator, SyncState,
};

use common::{fresh_store, sample_content, test_core_config, test_pipeline};

/// Store + catalog with one processed source: chunks written, embeddings
/// present and unsynced.
async fn seeded() -> (SqliteStore, Arc<InMemoryCatalog>, TempDir, SourceRef, usize) {
    let (store, dir) = fresh_store().await;
    let catalog = Arc::new(InMemoryCatalog::new());
    let content = sample_content(6);
    let source = content.source_ref();
    catalog.insert(content);

    let pipeline = test_pipeline(store.clone(), catalog.clone());
    let report = pipeline.process_source(source).await.unwrap();
    assert!(report.embeddings > 0);
    (store, catalog, dir, source, report.embeddings)
}

fn orchestrator(
    store: &SqliteStore,
    catalog: &Arc<InMemoryCatalog>,
    server: &MockServer,
) -> SyncOrchestrator {
    SyncOrchestrator::new(
        store.clone(),
        catalog.clone(),
        test_core_config(&server.base_url()),
    )
    .unwrap()
}

#[tokio::test]
async fn incremental_push_marks_embeddings_synced() {
    let (store, catalog, _dir, source, count) = seeded().await;
    let server = MockServer::start_async().await;
    let push = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/v1/sync/embeddings")
                .header("X-API-Key", "test-key")
                .json_body_partial(r#"{"sync_type": "incremental"}"#);
            then.status(200).json_body(json!({}));
        })
        .await;

    let sync = orchestrator(&store, &catalog, &server);
    let report = sync.sync_new_embeddings().await.unwrap();

    assert_eq!(report.attempted, count);
    assert_eq!(report.synced, count);
    assert_eq!(report.failed, 0);
    push.assert_async().await;

    for chunk in store.chunks_for_source(source).await.unwrap() {
        for record in store.embeddings_for_chunk(chunk.id).await.unwrap() {
            assert_eq!(record.sync_state, SyncState::Synced);
            // No node ids in the response: the embedding id is the key.
            assert_eq!(record.core_node_id.as_deref(), Some(&*record.id.to_string()));
            assert!(record.metadata_hash.is_some());
            assert!(record.synced_at.is_some());
        }
        let log = store.log_entries_for_chunk(chunk.id).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].status, SyncLogStatus::Synced);
    }
}

#[tokio::test]
async fn rejected_payload_fails_without_retry() {
    let (store, catalog, _dir, _source, count) = seeded().await;
    let server = MockServer::start_async().await;
    let push = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/v1/sync/embeddings");
            then.status(422).body("dimension mismatch");
        })
        .await;

    let sync = orchestrator(&store, &catalog, &server);
    let report = sync.sync_new_embeddings().await.unwrap();
    assert_eq!(report.failed, count);
    assert_eq!(push.hits_async().await, 1);

    let stats = store.sync_stats().await.unwrap();
    assert_eq!(stats.failed as usize, count);

    // Terminal rows are never claimed again.
    let again = sync.sync_new_embeddings().await.unwrap();
    assert_eq!(again.attempted, 0);
    assert_eq!(push.hits_async().await, 1);
}

#[tokio::test]
async fn item_level_rejections_fail_only_those_items() {
    let (store, catalog, _dir, source, count) = seeded().await;
    assert!(count >= 2);

    let chunks = store.chunks_for_source(source).await.unwrap();
    let victim = store.embeddings_for_chunk(chunks[0].id).await.unwrap()[0].id;

    let server = MockServer::start_async().await;
    let victim_id = victim.to_string();
    let push = server
        .mock_async(move |when, then| {
            when.method(POST).path("/api/v1/sync/embeddings");
            then.status(200).json_body(json!({
                "status": "partial",
                "synced_count": count - 1,
                "errors": [{"id": victim_id, "error": "dimension mismatch"}],
            }));
        })
        .await;

    let sync = orchestrator(&store, &catalog, &server);
    let report = sync.sync_new_embeddings().await.unwrap();

    assert_eq!(report.synced, count - 1);
    assert_eq!(report.failed, 1);
    assert_eq!(push.hits_async().await, 1);

    let row = store.get_embedding(victim).await.unwrap().unwrap();
    assert_eq!(row.sync_state, SyncState::Failed);
    assert_eq!(row.sync_error, "dimension mismatch");

    // The rejection is terminal: nothing is pending on the next pass.
    assert_eq!(sync.sync_new_embeddings().await.unwrap().attempted, 0);
    assert_eq!(push.hits_async().await, 1);
}

#[tokio::test]
async fn transport_failures_retry_until_the_budget_is_spent() {
    let (store, catalog, _dir, _source, count) = seeded().await;
    let server = MockServer::start_async().await;
    let push = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/v1/sync/embeddings");
            then.status(500).body("upstream down");
        })
        .await;

    let sync = orchestrator(&store, &catalog, &server);
    let max_retries = 3;
    for attempt in 1..=max_retries {
        let report = sync.sync_new_embeddings().await.unwrap();
        assert_eq!(report.failed, count, "attempt {attempt}");
    }
    assert_eq!(push.hits_async().await, max_retries as usize);

    let stats = store.sync_stats().await.unwrap();
    assert_eq!(stats.failed as usize, count);
    assert_eq!(sync.sync_new_embeddings().await.unwrap().attempted, 0);
}

#[tokio::test]
async fn metadata_change_triggers_payload_redelivery_only() {
    let (store, catalog, _dir, source, count) = seeded().await;
    let server = MockServer::start_async().await;
    let push = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/v1/sync/embeddings");
            then.status(200).json_body(json!({}));
        })
        .await;

    let sync = orchestrator(&store, &catalog, &server);
    sync.sync_new_embeddings().await.unwrap();
    assert_eq!(push.hits_async().await, 1);
    assert!(store.metadata_stale(100).await.unwrap().is_empty());

    let pipeline = test_pipeline(store.clone(), catalog.clone());
    pipeline
        .handle_event(ChangeEvent::MetadataChanged(source))
        .await
        .unwrap();
    assert_eq!(store.metadata_stale(100).await.unwrap().len(), count);

    let report = sync.sync_changed_metadata().await.unwrap();
    assert_eq!(report.metadata_updated, count);
    assert_eq!(push.hits_async().await, 2);
    assert!(store.metadata_stale(100).await.unwrap().is_empty());

    // Vectors were untouched: everything is still synced.
    let stats = store.sync_stats().await.unwrap();
    assert_eq!(stats.synced as usize, count);
}

#[tokio::test]
async fn deleting_a_source_cleans_up_core_nodes() {
    let (store, catalog, _dir, source, count) = seeded().await;
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/v1/sync/embeddings");
            then.status(200).json_body(json!({}));
        })
        .await;
    let delete = server
        .mock_async(|when, then| {
            when.method(DELETE)
                .path_matches(Regex::new("^/api/v1/sync/node/").unwrap())
                .header("X-API-Key", "test-key");
            then.status(200);
        })
        .await;

    let sync = orchestrator(&store, &catalog, &server);
    sync.sync_new_embeddings().await.unwrap();

    catalog.remove(source);
    let pipeline = test_pipeline(store.clone(), catalog.clone());
    pipeline
        .handle_event(ChangeEvent::SourceDeleted(source))
        .await
        .unwrap();

    let report = sync.cleanup_orphans().await.unwrap();
    assert_eq!(report.nodes_deleted, count);
    assert_eq!(delete.hits_async().await, count);
    assert!(store.orphaned_log_entries(100).await.unwrap().is_empty());
}

#[tokio::test]
async fn deleting_an_already_absent_node_still_succeeds() {
    let (store, catalog, _dir, source, count) = seeded().await;
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/v1/sync/embeddings");
            then.status(200).json_body(json!({}));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(DELETE)
                .path_matches(Regex::new("^/api/v1/sync/node/").unwrap());
            then.status(404);
        })
        .await;

    let sync = orchestrator(&store, &catalog, &server);
    sync.sync_new_embeddings().await.unwrap();
    catalog.remove(source);
    store.delete_source(source).await.unwrap();

    let report = sync.cleanup_orphans().await.unwrap();
    assert_eq!(report.nodes_deleted, count);
    assert_eq!(report.failed, 0);
}

#[tokio::test]
async fn verification_confirms_present_nodes() {
    let (store, catalog, _dir, source, count) = seeded().await;
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/v1/sync/embeddings");
            then.status(200).json_body(json!({}));
        })
        .await;
    let verify = server
        .mock_async(|when, then| {
            when.method(GET)
                .path_matches(Regex::new("^/api/v1/sync/node/").unwrap());
            then.status(200).json_body(json!({"exists": true}));
        })
        .await;

    let sync = orchestrator(&store, &catalog, &server);
    sync.sync_new_embeddings().await.unwrap();

    let report = sync.verify_synced(100).await.unwrap();
    assert_eq!(report.verified, count);
    assert_eq!(report.missing, 0);
    assert_eq!(verify.hits_async().await, count);

    for chunk in store.chunks_for_source(source).await.unwrap() {
        for entry in store.log_entries_for_chunk(chunk.id).await.unwrap() {
            assert_eq!(entry.status, SyncLogStatus::Verified);
        }
    }
}

#[tokio::test]
async fn verification_flags_missing_nodes() {
    let (store, catalog, _dir, source, count) = seeded().await;
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/v1/sync/embeddings");
            then.status(200).json_body(json!({}));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path_matches(Regex::new("^/api/v1/sync/node/").unwrap());
            then.status(404);
        })
        .await;

    let sync = orchestrator(&store, &catalog, &server);
    sync.sync_new_embeddings().await.unwrap();

    let report = sync.verify_synced(100).await.unwrap();
    assert_eq!(report.missing, count);

    for chunk in store.chunks_for_source(source).await.unwrap() {
        for entry in store.log_entries_for_chunk(chunk.id).await.unwrap() {
            assert_eq!(entry.status, SyncLogStatus::Failed);
            assert_eq!(entry.detail, "missing on core");
        }
    }
}

#[tokio::test]
async fn full_resync_resends_everything_tagged_full() {
    let (store, catalog, _dir, _source, count) = seeded().await;
    let server = MockServer::start_async().await;
    let incremental = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/v1/sync/embeddings")
                .json_body_partial(r#"{"sync_type": "incremental"}"#);
            then.status(200).json_body(json!({}));
        })
        .await;
    let full = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/v1/sync/embeddings")
                .json_body_partial(r#"{"sync_type": "full"}"#);
            then.status(200).json_body(json!({}));
        })
        .await;

    let sync = orchestrator(&store, &catalog, &server);
    sync.sync_new_embeddings().await.unwrap();
    assert_eq!(incremental.hits_async().await, 1);

    let report = sync.sync_all().await.unwrap();
    assert_eq!(report.synced, count);
    assert_eq!(full.hits_async().await, 1);

    let stats = store.sync_stats().await.unwrap();
    assert_eq!(stats.synced as usize, count);
}

#[tokio::test]
async fn vanished_source_content_skips_delivery() {
    let (store, catalog, _dir, source, count) = seeded().await;
    let server = MockServer::start_async().await;
    let push = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/v1/sync/embeddings");
            then.status(200).json_body(json!({}));
        })
        .await;

    // Source row gone from the catalog but chunks still present locally.
    catalog.remove(source);

    let sync = orchestrator(&store, &catalog, &server);
    let report = sync.sync_new_embeddings().await.unwrap();
    assert_eq!(report.orphaned, count);
    assert_eq!(report.synced, 0);
    assert_eq!(push.hits_async().await, 0);

    let stats = store.sync_stats().await.unwrap();
    assert_eq!(stats.failed as usize, count);
}

#[tokio::test]
async fn stale_claims_are_recoverable() {
    let (store, catalog, _dir, _source, count) = seeded().await;
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/v1/sync/embeddings");
            then.status(200).json_body(json!({}));
        })
        .await;

    // Simulate a crashed pass that claimed but never resolved.
    let claimed = store.claim_unsynced(3, 100).await.unwrap();
    assert_eq!(claimed.len(), count);

    let sync = orchestrator(&store, &catalog, &server);
    assert_eq!(sync.sync_new_embeddings().await.unwrap().attempted, 0);

    let released = sync.recover_stale_claims().await.unwrap();
    assert_eq!(released as usize, count);
    let report = sync.sync_new_embeddings().await.unwrap();
    assert_eq!(report.synced, count);
}

#[tokio::test]
async fn sync_is_effectively_exactly_once() {
    let (store, catalog, _dir, _source, count) = seeded().await;
    let server = MockServer::start_async().await;
    let push = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/v1/sync/embeddings");
            then.status(200).json_body(json!({}));
        })
        .await;

    let sync = orchestrator(&store, &catalog, &server);
    let first = sync.sync_new_embeddings().await.unwrap();
    assert_eq!(first.synced, count);

    // Repeated passes with nothing pending are no-ops.
    for _ in 0..3 {
        let report = sync.sync_new_embeddings().await.unwrap();
        assert_eq!(report.attempted, 0);
    }
    assert_eq!(push.hits_async().await, 1);
}

#[tokio::test]
async fn qa_entries_sync_with_labeled_composition() {
    let (store, _dir) = fresh_store().await;
    let catalog = Arc::new(InMemoryCatalog::new());
    let qa = common::qa_entry("شرایط فسخ قرارداد چیست؟", "طبق ماده 10 قانون مدنی.");
    let source = SourceRef::qa_entry(qa.id);
    catalog.insert(SourceContent::QaEntry(qa));

    let pipeline = test_pipeline(store.clone(), catalog.clone());
    pipeline.process_source(source).await.unwrap();

    let server = MockServer::start_async().await;
    let push = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/v1/sync/embeddings")
                .body_contains("پرسش:")
                .body_contains("پاسخ:");
            then.status(200).json_body(json!({}));
        })
        .await;

    let sync = orchestrator(&store, &catalog, &server);
    let report = sync.sync_new_embeddings().await.unwrap();
    assert!(report.synced > 0);
    push.assert_async().await;
}

#[tokio::test]
async fn requests_without_configured_key_omit_the_header() {
    let (store, catalog, _dir, _source, count) = seeded().await;
    let server = MockServer::start_async().await;
    let push = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/v1/sync/embeddings")
                .matches(|req| {
                    req.headers.as_ref().is_none_or(|headers| {
                        headers
                            .iter()
                            .all(|(name, _)| !name.eq_ignore_ascii_case("x-api-key"))
                    })
                });
            then.status(200).json_body(json!({}));
        })
        .await;

    let mut config = test_core_config(&server.base_url());
    config.api_key = String::new();
    let sync = SyncOrchestrator::new(store.clone(), catalog.clone(), config).unwrap();
    let report = sync.sync_new_embeddings().await.unwrap();
    assert_eq!(report.synced, count);
    push.assert_async().await;
}

#[tokio::test]
async fn uuid_source_ids_round_trip_through_payloads() {
    // Guard against id formatting drift between store and payload.
    let id = Uuid::new_v4();
    let source = SourceRef::legal_unit(id);
    assert_eq!(source.to_string(), format!("legal_unit:{id}"));
}
