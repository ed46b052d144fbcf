//! Sync orchestration: moves embeddings through the sync state machine.
//!
//! Each pass is idempotent and crash-safe. Claims are row-level state
//! transitions in the store, delivery keys are stable embedding ids, and
//! Core upserts by node id, so a crashed or repeated pass converges to
//! the same external state instead of duplicating nodes.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::catalog::SourceCatalog;
use crate::config::CoreConfig;
use crate::model::{Chunk, EmbeddingRecord, SyncLogStatus};
use crate::payload::{EmbeddingPayload, build_payload, metadata_fingerprint};
use crate::store::SqliteStore;
use crate::sync::client::{CoreClient, SyncType};
use crate::types::PipelineError;

/// Counters from one orchestrator pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Embeddings selected for delivery.
    pub attempted: usize,
    /// Embeddings confirmed delivered.
    pub synced: usize,
    /// Embeddings that failed (retryable or terminal).
    pub failed: usize,
    /// Embeddings skipped because their source row is gone.
    pub orphaned: usize,
    /// Metadata-only re-deliveries confirmed.
    pub metadata_updated: usize,
    /// Core nodes removed by the cleanup pass.
    pub nodes_deleted: usize,
    /// Log entries confirmed present on Core.
    pub verified: usize,
    /// Log entries whose node is missing on Core.
    pub missing: usize,
}

/// Drives deliveries from the local store to Core.
pub struct SyncOrchestrator {
    store: SqliteStore,
    client: CoreClient,
    catalog: Arc<dyn SourceCatalog>,
    config: CoreConfig,
}

impl SyncOrchestrator {
    pub fn new(
        store: SqliteStore,
        catalog: Arc<dyn SourceCatalog>,
        config: CoreConfig,
    ) -> Result<Self, PipelineError> {
        let client = CoreClient::new(&config)?;
        Ok(Self {
            store,
            client,
            catalog,
            config,
        })
    }

    /// Deliver all pending embeddings in batches.
    ///
    /// Claims flip rows to `syncing` so concurrent passes never double-
    /// send. A batch-level transport failure ends the pass after
    /// recording the failures; the retry counters decide whether those
    /// rows come back next pass or park as `failed`.
    #[instrument(skip(self))]
    pub async fn sync_new_embeddings(&self) -> Result<SyncReport, PipelineError> {
        self.drain_unsynced(SyncType::Incremental).await
    }

    /// Operator-initiated resend of every embedding, tagged `full` so
    /// Core can distinguish a rebuild from routine deltas.
    #[instrument(skip(self))]
    pub async fn sync_all(&self) -> Result<SyncReport, PipelineError> {
        self.store.release_stale_claims().await?;
        let reset = self.store.reset_all_sync_state().await?;
        info!(reset, "starting full resync");
        self.drain_unsynced(SyncType::Full).await
    }

    async fn drain_unsynced(&self, sync_type: SyncType) -> Result<SyncReport, PipelineError> {
        let mut report = SyncReport::default();
        loop {
            let claimed = self
                .store
                .claim_unsynced(self.config.max_retries, self.config.sync_batch_size)
                .await?;
            if claimed.is_empty() {
                break;
            }
            report.attempted += claimed.len();

            let mut batch: Vec<(EmbeddingRecord, Chunk, EmbeddingPayload, String)> = Vec::new();
            for record in claimed {
                match self.prepare(&record).await? {
                    Some(prepared) => batch.push(prepared),
                    None => report.orphaned += 1,
                }
            }
            if batch.is_empty() {
                continue;
            }

            let payloads: Vec<EmbeddingPayload> =
                batch.iter().map(|(_, _, p, _)| p.clone()).collect();
            match self.client.push_embeddings(&payloads, sync_type).await {
                Ok(result) => {
                    for ((record, chunk, payload, fingerprint), node_id) in
                        batch.iter().zip(result.node_ids.iter())
                    {
                        // Core can reject individual items inside an
                        // accepted batch; those are payload defects and
                        // terminal for the item, not the batch.
                        if let Some(reason) = result.rejected.get(&payload.id) {
                            self.store
                                .mark_sync_failure(
                                    record.id,
                                    reason,
                                    false,
                                    self.config.max_retries,
                                )
                                .await?;
                            self.store
                                .append_sync_log(
                                    Some(chunk.id),
                                    &payload.id,
                                    SyncLogStatus::Failed,
                                    reason,
                                )
                                .await?;
                            report.failed += 1;
                            continue;
                        }
                        self.store
                            .mark_synced(record.id, node_id, fingerprint)
                            .await?;
                        self.store
                            .append_sync_log(
                                Some(chunk.id),
                                node_id,
                                SyncLogStatus::Synced,
                                "",
                            )
                            .await?;
                        report.synced += 1;
                    }
                }
                Err(err) => {
                    let retryable = err.is_retryable();
                    let detail = err.to_string();
                    warn!(error = %detail, retryable, batch = batch.len(), "sync batch failed");
                    for (record, chunk, payload, _) in &batch {
                        self.store
                            .mark_sync_failure(
                                record.id,
                                &detail,
                                retryable,
                                self.config.max_retries,
                            )
                            .await?;
                        self.store
                            .append_sync_log(
                                Some(chunk.id),
                                &payload.id,
                                SyncLogStatus::Failed,
                                &detail,
                            )
                            .await?;
                        report.failed += 1;
                    }
                    // Stop draining: a transport fault will hit the next
                    // batch too, and validation faults are terminal.
                    break;
                }
            }
        }
        info!(
            attempted = report.attempted,
            synced = report.synced,
            failed = report.failed,
            orphaned = report.orphaned,
            "sync pass complete"
        );
        Ok(report)
    }

    /// Resolve a claimed embedding into a deliverable payload.
    ///
    /// Returns `None` when the chunk or its source content no longer
    /// exists; the claim is released and the embedding will be swept by
    /// the cascade or the orphan cleanup pass.
    async fn prepare(
        &self,
        record: &EmbeddingRecord,
    ) -> Result<Option<(EmbeddingRecord, Chunk, EmbeddingPayload, String)>, PipelineError> {
        // A deleted chunk cascades its embeddings away, so there is no
        // claim left to release here.
        let Some(chunk) = self.store.get_chunk(record.chunk_id).await? else {
            warn!(embedding = %record.id, "chunk vanished before delivery");
            return Ok(None);
        };
        let Some(content) = self.catalog.lookup(chunk.source).await? else {
            warn!(source = %chunk.source, "source content deleted; skipping embedding");
            self.store
                .mark_sync_failure(record.id, "source content deleted", false, self.config.max_retries)
                .await?;
            return Ok(None);
        };
        let payload = build_payload(&chunk, record, &content)?;
        let fingerprint = metadata_fingerprint(&chunk, &content);
        Ok(Some((record.clone(), chunk, payload, fingerprint)))
    }

    /// Re-deliver payloads whose metadata fingerprint was invalidated.
    ///
    /// Vectors are unchanged; Core upserts the node in place. The
    /// fingerprint is only recorded after Core accepts the batch, so an
    /// interrupted pass retries cleanly.
    #[instrument(skip(self))]
    pub async fn sync_changed_metadata(&self) -> Result<SyncReport, PipelineError> {
        let mut report = SyncReport::default();
        loop {
            let stale = self
                .store
                .metadata_stale(self.config.sync_batch_size)
                .await?;
            if stale.is_empty() {
                break;
            }
            report.attempted += stale.len();

            let mut batch = Vec::new();
            for record in stale {
                match self.prepare(&record).await? {
                    Some(prepared) => batch.push(prepared),
                    None => report.orphaned += 1,
                }
            }
            if batch.is_empty() {
                break;
            }

            let payloads: Vec<EmbeddingPayload> =
                batch.iter().map(|(_, _, p, _)| p.clone()).collect();
            match self
                .client
                .push_embeddings(&payloads, SyncType::Incremental)
                .await
            {
                Ok(result) => {
                    for (record, _, payload, fingerprint) in &batch {
                        if let Some(reason) = result.rejected.get(&payload.id) {
                            self.store
                                .mark_sync_failure(
                                    record.id,
                                    reason,
                                    false,
                                    self.config.max_retries,
                                )
                                .await?;
                            report.failed += 1;
                            continue;
                        }
                        self.store
                            .mark_metadata_synced(record.id, fingerprint)
                            .await?;
                        report.metadata_updated += 1;
                    }
                }
                Err(err) => {
                    warn!(error = %err, "metadata sync batch failed");
                    report.failed += batch.len();
                    break;
                }
            }
        }
        Ok(report)
    }

    /// Delete Core nodes whose local chunk is gone.
    ///
    /// Orphans are sync-log rows with a nulled chunk reference. Each
    /// node is deleted on Core first and the log row removed only after
    /// Core confirms, so an interrupted pass re-runs safely.
    #[instrument(skip(self))]
    pub async fn cleanup_orphans(&self) -> Result<SyncReport, PipelineError> {
        let mut report = SyncReport::default();
        loop {
            let orphans = self
                .store
                .orphaned_log_entries(self.config.sync_batch_size)
                .await?;
            if orphans.is_empty() {
                break;
            }
            let mut progressed = false;
            for entry in orphans {
                match self.client.delete_node(&entry.core_node_id).await {
                    Ok(()) => {
                        self.store.delete_log_entry(entry.id).await?;
                        report.nodes_deleted += 1;
                        progressed = true;
                    }
                    Err(err) => {
                        warn!(node = %entry.core_node_id, error = %err, "orphan delete failed");
                        report.failed += 1;
                    }
                }
            }
            if !progressed {
                break;
            }
        }
        info!(deleted = report.nodes_deleted, failed = report.failed, "orphan cleanup complete");
        Ok(report)
    }

    /// Spot-check that synced nodes actually exist on Core.
    ///
    /// Confirmed entries move to `verified`; missing nodes are flagged
    /// `failed` in the log for operator attention, local sync state is
    /// left untouched.
    #[instrument(skip(self))]
    pub async fn verify_synced(&self, limit: usize) -> Result<SyncReport, PipelineError> {
        let mut report = SyncReport::default();
        let entries = self.store.unverified_log_entries(limit).await?;
        report.attempted = entries.len();
        for entry in entries {
            match self.client.verify_node(&entry.core_node_id).await {
                Ok(true) => {
                    self.store
                        .set_log_status(entry.id, SyncLogStatus::Verified, "")
                        .await?;
                    report.verified += 1;
                }
                Ok(false) => {
                    self.store
                        .set_log_status(entry.id, SyncLogStatus::Failed, "missing on core")
                        .await?;
                    report.missing += 1;
                }
                Err(err) => {
                    warn!(node = %entry.core_node_id, error = %err, "verification request failed");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    /// Recover claims left behind by a crashed pass.
    pub async fn recover_stale_claims(&self) -> Result<u64, PipelineError> {
        Ok(self.store.release_stale_claims().await?)
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }
}
