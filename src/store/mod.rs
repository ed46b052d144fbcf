//! SQLite-backed persistence for chunks, embeddings, and the sync log.
//!
//! All sync-state transitions happen through row-level updates inside
//! transactions; no in-process locks are involved, so independent worker
//! processes can share one database. Chunk replacement for a source is a
//! single transaction (delete-all then insert) so concurrent edits never
//! interleave partial chunk sets.
//!
//! Embedded migrations (`sqlx::migrate!("./migrations")`) run on connect.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::instrument;
use uuid::Uuid;

use crate::model::{
    Chunk, EmbeddingRecord, SourceKind, SourceRef, SyncLogEntry, SyncLogStatus, SyncState,
};
use crate::segmenter::SegmentedChunk;
use crate::types::StoreError;

/// Aggregate sync counters, suitable for monitoring snapshots.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub total: u64,
    pub synced: u64,
    pub unsynced: u64,
    pub syncing: u64,
    pub failed: u64,
}

/// Pooled SQLite store for pipeline bookkeeping.
#[derive(Clone)]
pub struct SqliteStore {
    pool: Arc<SqlitePool>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish()
    }
}

impl SqliteStore {
    /// Connect (or create) a SQLite database at `database_url` and run
    /// embedded migrations. Example URL: `sqlite://lexsync.db`.
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Sqlx(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    // ------------------------------------------------------------------
    // Chunks
    // ------------------------------------------------------------------

    /// Replace the full chunk set for a source in one transaction.
    ///
    /// Deleting first keeps indices contiguous and lets the FK cascade
    /// drop the old embeddings; partial chunk updates are deliberately
    /// not supported.
    #[instrument(skip(self, segmented), fields(source = %source, chunks = segmented.len()))]
    pub async fn replace_chunks(
        &self,
        source: SourceRef,
        segmented: &[SegmentedChunk],
    ) -> Result<Vec<Chunk>, StoreError> {
        let now = Utc::now();
        let chunks: Vec<Chunk> = segmented
            .iter()
            .enumerate()
            .map(|(index, piece)| Chunk {
                id: Uuid::new_v4(),
                source,
                chunk_index: index,
                content: piece.text.clone(),
                token_count: piece.token_count,
                overlap_prev: piece.overlap_prev,
                content_hash: chunk_content_hash(&piece.text, source, index),
                created_at: now,
            })
            .collect();

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunks WHERE source_kind = ?1 AND source_id = ?2")
            .bind(source.kind.as_str())
            .bind(source.id.to_string())
            .execute(&mut *tx)
            .await?;
        for chunk in &chunks {
            sqlx::query(
                r#"
                INSERT INTO chunks (
                    id, source_kind, source_id, chunk_index,
                    content, token_count, overlap_prev, content_hash, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
            )
            .bind(chunk.id.to_string())
            .bind(chunk.source.kind.as_str())
            .bind(chunk.source.id.to_string())
            .bind(chunk.chunk_index as i64)
            .bind(&chunk.content)
            .bind(chunk.token_count as i64)
            .bind(chunk.overlap_prev as i64)
            .bind(&chunk.content_hash)
            .bind(chunk.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(chunks)
    }

    pub async fn chunks_for_source(&self, source: SourceRef) -> Result<Vec<Chunk>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, source_kind, source_id, chunk_index,
                   content, token_count, overlap_prev, content_hash, created_at
            FROM chunks
            WHERE source_kind = ?1 AND source_id = ?2
            ORDER BY chunk_index ASC
            "#,
        )
        .bind(source.kind.as_str())
        .bind(source.id.to_string())
        .fetch_all(&*self.pool)
        .await?;
        rows.iter().map(row_to_chunk).collect()
    }

    pub async fn get_chunk(&self, id: Uuid) -> Result<Option<Chunk>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, source_kind, source_id, chunk_index,
                   content, token_count, overlap_prev, content_hash, created_at
            FROM chunks WHERE id = ?1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&*self.pool)
        .await?;
        row.as_ref().map(row_to_chunk).transpose()
    }

    /// Delete a source's chunks. Embeddings cascade away; sync-log rows
    /// keep their history with the chunk reference nulled.
    #[instrument(skip(self), fields(source = %source))]
    pub async fn delete_source(&self, source: SourceRef) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM chunks WHERE source_kind = ?1 AND source_id = ?2")
            .bind(source.kind.as_str())
            .bind(source.id.to_string())
            .execute(&*self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    // ------------------------------------------------------------------
    // Embeddings
    // ------------------------------------------------------------------

    /// Insert embeddings, upserting on the `(chunk_id, model_id)` key.
    ///
    /// A re-embedded chunk replaces its vector and drops back to
    /// `unsynced`; two inserts for the same pair can never produce a
    /// duplicate row.
    #[instrument(skip(self, records), fields(count = records.len()))]
    pub async fn insert_embeddings(
        &self,
        records: &[EmbeddingRecord],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for record in records {
            let vector_json = serde_json::to_string(&record.vector)?;
            sqlx::query(
                r#"
                INSERT INTO embeddings (
                    id, chunk_id, model_id, dim, vector_json,
                    sync_state, core_node_id, metadata_hash,
                    sync_error, sync_retry_count, created_at, synced_at, last_metadata_sync
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, NULL, '', 0, ?7, NULL, NULL)
                ON CONFLICT (chunk_id, model_id) DO UPDATE SET
                    dim = excluded.dim,
                    vector_json = excluded.vector_json,
                    sync_state = 'unsynced',
                    core_node_id = NULL,
                    metadata_hash = NULL,
                    sync_error = '',
                    sync_retry_count = 0,
                    synced_at = NULL,
                    last_metadata_sync = NULL
                "#,
            )
            .bind(record.id.to_string())
            .bind(record.chunk_id.to_string())
            .bind(&record.model_id)
            .bind(record.dim as i64)
            .bind(vector_json)
            .bind(SyncState::Unsynced.as_str())
            .bind(record.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_embedding(&self, id: Uuid) -> Result<Option<EmbeddingRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "{EMBEDDING_COLUMNS} FROM embeddings WHERE id = ?1"
        ))
        .bind(id.to_string())
        .fetch_optional(&*self.pool)
        .await?;
        row.as_ref().map(row_to_embedding).transpose()
    }

    pub async fn embeddings_for_chunk(
        &self,
        chunk_id: Uuid,
    ) -> Result<Vec<EmbeddingRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            "{EMBEDDING_COLUMNS} FROM embeddings WHERE chunk_id = ?1"
        ))
        .bind(chunk_id.to_string())
        .fetch_all(&*self.pool)
        .await?;
        rows.iter().map(row_to_embedding).collect()
    }

    /// Chunks of a source that have no embedding under `model_id` yet.
    pub async fn chunks_missing_embedding(
        &self,
        source: SourceRef,
        model_id: &str,
    ) -> Result<Vec<Chunk>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.source_kind, c.source_id, c.chunk_index,
                   c.content, c.token_count, c.overlap_prev, c.content_hash, c.created_at
            FROM chunks c
            LEFT JOIN embeddings e ON e.chunk_id = c.id AND e.model_id = ?3
            WHERE c.source_kind = ?1 AND c.source_id = ?2 AND e.id IS NULL
            ORDER BY c.chunk_index ASC
            "#,
        )
        .bind(source.kind.as_str())
        .bind(source.id.to_string())
        .bind(model_id)
        .fetch_all(&*self.pool)
        .await?;
        rows.iter().map(row_to_chunk).collect()
    }

    /// Claim a batch of unsynced embeddings for delivery.
    ///
    /// Claimed rows flip `unsynced → syncing` inside one transaction so
    /// a concurrently running pass cannot pick them up again; rows whose
    /// retry budget is exhausted are never selected.
    #[instrument(skip(self))]
    pub async fn claim_unsynced(
        &self,
        max_retries: u32,
        limit: usize,
    ) -> Result<Vec<EmbeddingRecord>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query(&format!(
            r#"
            {EMBEDDING_COLUMNS} FROM embeddings
            WHERE sync_state = 'unsynced' AND sync_retry_count < ?1
            ORDER BY created_at ASC
            LIMIT ?2
            "#
        ))
        .bind(max_retries as i64)
        .bind(limit as i64)
        .fetch_all(&mut *tx)
        .await?;
        let mut claimed = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut record = row_to_embedding(row)?;
            sqlx::query(
                "UPDATE embeddings SET sync_state = 'syncing' \
                 WHERE id = ?1 AND sync_state = 'unsynced'",
            )
            .bind(record.id.to_string())
            .execute(&mut *tx)
            .await?;
            record.sync_state = SyncState::Syncing;
            claimed.push(record);
        }
        tx.commit().await?;
        Ok(claimed)
    }

    /// Synced embeddings whose metadata fingerprint was invalidated.
    pub async fn metadata_stale(
        &self,
        limit: usize,
    ) -> Result<Vec<EmbeddingRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            {EMBEDDING_COLUMNS} FROM embeddings
            WHERE sync_state = 'synced' AND metadata_hash IS NULL
            ORDER BY created_at ASC
            LIMIT ?1
            "#
        ))
        .bind(limit as i64)
        .fetch_all(&*self.pool)
        .await?;
        rows.iter().map(row_to_embedding).collect()
    }

    /// Record a successful delivery. A missing row (source deleted
    /// mid-flight) is a benign no-op.
    pub async fn mark_synced(
        &self,
        id: Uuid,
        core_node_id: &str,
        metadata_hash: &str,
    ) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            UPDATE embeddings SET
                sync_state = 'synced',
                core_node_id = ?2,
                metadata_hash = ?3,
                sync_error = '',
                sync_retry_count = 0,
                synced_at = ?4,
                last_metadata_sync = ?4
            WHERE id = ?1
            "#,
        )
        .bind(id.to_string())
        .bind(core_node_id)
        .bind(metadata_hash)
        .bind(now)
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    /// Record a delivery failure.
    ///
    /// Retryable failures return the row to `unsynced` with an
    /// incremented retry count; once the count reaches `max_retries`
    /// (or the failure is non-retryable) the row parks as `failed` and
    /// is excluded from automatic passes.
    pub async fn mark_sync_failure(
        &self,
        id: Uuid,
        error: &str,
        retryable: bool,
        max_retries: u32,
    ) -> Result<(), StoreError> {
        let error = truncate(error, 500);
        if retryable {
            sqlx::query(
                r#"
                UPDATE embeddings SET
                    sync_retry_count = sync_retry_count + 1,
                    sync_error = ?2,
                    sync_state = CASE
                        WHEN sync_retry_count + 1 >= ?3 THEN 'failed'
                        ELSE 'unsynced'
                    END
                WHERE id = ?1
                "#,
            )
            .bind(id.to_string())
            .bind(error)
            .bind(max_retries as i64)
            .execute(&*self.pool)
            .await?;
        } else {
            sqlx::query(
                "UPDATE embeddings SET sync_state = 'failed', sync_error = ?2, \
                 sync_retry_count = sync_retry_count + 1 WHERE id = ?1",
            )
            .bind(id.to_string())
            .bind(error)
            .execute(&*self.pool)
            .await?;
        }
        Ok(())
    }

    /// Record a successful metadata-only re-delivery.
    pub async fn mark_metadata_synced(
        &self,
        id: Uuid,
        metadata_hash: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE embeddings SET metadata_hash = ?2, last_metadata_sync = ?3 WHERE id = ?1",
        )
        .bind(id.to_string())
        .bind(metadata_hash)
        .bind(Utc::now().to_rfc3339())
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    /// Return rows stuck in `syncing` (crashed run) to `unsynced`.
    /// Redundant re-delivery is safe: Core upserts by node id.
    pub async fn release_stale_claims(&self) -> Result<u64, StoreError> {
        let result =
            sqlx::query("UPDATE embeddings SET sync_state = 'unsynced' WHERE sync_state = 'syncing'")
                .execute(&*self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    /// Reset every embedding for a full resync.
    pub async fn reset_all_sync_state(&self) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE embeddings SET
                sync_state = 'unsynced',
                sync_error = '',
                sync_retry_count = 0,
                synced_at = NULL
            "#,
        )
        .execute(&*self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Clear the metadata fingerprint for every synced embedding of a
    /// source, flagging it for metadata-only re-delivery.
    #[instrument(skip(self), fields(source = %source))]
    pub async fn invalidate_metadata_for_source(
        &self,
        source: SourceRef,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE embeddings SET metadata_hash = NULL
            WHERE sync_state = 'synced' AND chunk_id IN (
                SELECT id FROM chunks WHERE source_kind = ?1 AND source_id = ?2
            )
            "#,
        )
        .bind(source.kind.as_str())
        .bind(source.id.to_string())
        .execute(&*self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn sync_stats(&self) -> Result<SyncStats, StoreError> {
        let rows = sqlx::query(
            "SELECT sync_state, COUNT(*) as n FROM embeddings GROUP BY sync_state",
        )
        .fetch_all(&*self.pool)
        .await?;
        let mut stats = SyncStats::default();
        for row in rows {
            let state: String = row.get("sync_state");
            let n: i64 = row.get("n");
            let n = n as u64;
            stats.total += n;
            match SyncState::parse(&state) {
                Some(SyncState::Synced) => stats.synced += n,
                Some(SyncState::Unsynced) => stats.unsynced += n,
                Some(SyncState::Syncing) => stats.syncing += n,
                Some(SyncState::Failed) | None => stats.failed += n,
            }
        }
        Ok(stats)
    }

    // ------------------------------------------------------------------
    // Sync log
    // ------------------------------------------------------------------

    pub async fn append_sync_log(
        &self,
        chunk_id: Option<Uuid>,
        core_node_id: &str,
        status: SyncLogStatus,
        detail: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sync_log (chunk_id, core_node_id, status, detail, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(chunk_id.map(|id| id.to_string()))
        .bind(core_node_id)
        .bind(status.as_str())
        .bind(detail)
        .bind(Utc::now().to_rfc3339())
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    /// Log rows whose chunk has been deleted: their Core nodes are
    /// orphans awaiting cleanup.
    pub async fn orphaned_log_entries(
        &self,
        limit: usize,
    ) -> Result<Vec<SyncLogEntry>, StoreError> {
        let rows = sqlx::query(&format!(
            "{SYNC_LOG_COLUMNS} FROM sync_log WHERE chunk_id IS NULL \
             ORDER BY created_at ASC LIMIT ?1"
        ))
        .bind(limit as i64)
        .fetch_all(&*self.pool)
        .await?;
        rows.iter().map(row_to_sync_log).collect()
    }

    pub async fn unverified_log_entries(
        &self,
        limit: usize,
    ) -> Result<Vec<SyncLogEntry>, StoreError> {
        let rows = sqlx::query(&format!(
            "{SYNC_LOG_COLUMNS} FROM sync_log WHERE status = 'synced' \
             AND chunk_id IS NOT NULL ORDER BY created_at ASC LIMIT ?1"
        ))
        .bind(limit as i64)
        .fetch_all(&*self.pool)
        .await?;
        rows.iter().map(row_to_sync_log).collect()
    }

    pub async fn set_log_status(
        &self,
        id: i64,
        status: SyncLogStatus,
        detail: &str,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE sync_log SET status = ?2, detail = ?3 WHERE id = ?1")
            .bind(id)
            .bind(status.as_str())
            .bind(detail)
            .execute(&*self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_log_entry(&self, id: i64) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM sync_log WHERE id = ?1")
            .bind(id)
            .execute(&*self.pool)
            .await?;
        Ok(())
    }

    pub async fn log_entries_for_chunk(
        &self,
        chunk_id: Uuid,
    ) -> Result<Vec<SyncLogEntry>, StoreError> {
        let rows = sqlx::query(&format!(
            "{SYNC_LOG_COLUMNS} FROM sync_log WHERE chunk_id = ?1 ORDER BY created_at ASC"
        ))
        .bind(chunk_id.to_string())
        .fetch_all(&*self.pool)
        .await?;
        rows.iter().map(row_to_sync_log).collect()
    }

    pub async fn all_log_entries(&self) -> Result<Vec<SyncLogEntry>, StoreError> {
        let rows = sqlx::query(&format!(
            "{SYNC_LOG_COLUMNS} FROM sync_log ORDER BY created_at ASC"
        ))
        .fetch_all(&*self.pool)
        .await?;
        rows.iter().map(row_to_sync_log).collect()
    }
}

/// SHA-256 over chunk text plus its owner and ordinal, so identical
/// text in different positions still hashes distinctly.
pub fn chunk_content_hash(text: &str, source: SourceRef, index: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hasher.update(b"_");
    hasher.update(source.to_string().as_bytes());
    hasher.update(b"_");
    hasher.update(index.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

const EMBEDDING_COLUMNS: &str = "SELECT id, chunk_id, model_id, dim, vector_json, sync_state, \
     core_node_id, metadata_hash, sync_error, sync_retry_count, \
     created_at, synced_at, last_metadata_sync";

const SYNC_LOG_COLUMNS: &str = "SELECT id, chunk_id, core_node_id, status, detail, created_at";

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn parse_uuid(raw: &str, what: &'static str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(raw).map_err(|_| StoreError::Missing(what))
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_chunk(row: &SqliteRow) -> Result<Chunk, StoreError> {
    let id: String = row.get("id");
    let kind: String = row.get("source_kind");
    let source_id: String = row.get("source_id");
    let created_at: String = row.get("created_at");
    Ok(Chunk {
        id: parse_uuid(&id, "chunk id")?,
        source: SourceRef {
            kind: SourceKind::parse(&kind).ok_or(StoreError::Missing("source_kind"))?,
            id: parse_uuid(&source_id, "source id")?,
        },
        chunk_index: row.get::<i64, _>("chunk_index") as usize,
        content: row.get("content"),
        token_count: row.get::<i64, _>("token_count") as usize,
        overlap_prev: row.get::<i64, _>("overlap_prev") as usize,
        content_hash: row.get("content_hash"),
        created_at: parse_timestamp(&created_at),
    })
}

fn row_to_embedding(row: &SqliteRow) -> Result<EmbeddingRecord, StoreError> {
    let id: String = row.get("id");
    let chunk_id: String = row.get("chunk_id");
    let vector_json: String = row.get("vector_json");
    let sync_state: String = row.get("sync_state");
    let created_at: String = row.get("created_at");
    let synced_at: Option<String> = row.get("synced_at");
    let last_metadata_sync: Option<String> = row.get("last_metadata_sync");
    Ok(EmbeddingRecord {
        id: parse_uuid(&id, "embedding id")?,
        chunk_id: parse_uuid(&chunk_id, "embedding chunk id")?,
        model_id: row.get("model_id"),
        dim: row.get::<i64, _>("dim") as usize,
        vector: serde_json::from_str(&vector_json)?,
        sync_state: SyncState::parse(&sync_state).ok_or(StoreError::Missing("sync_state"))?,
        core_node_id: row.get("core_node_id"),
        metadata_hash: row.get("metadata_hash"),
        sync_error: row.get("sync_error"),
        sync_retry_count: row.get::<i64, _>("sync_retry_count") as u32,
        created_at: parse_timestamp(&created_at),
        synced_at: synced_at.as_deref().map(parse_timestamp),
        last_metadata_sync: last_metadata_sync.as_deref().map(parse_timestamp),
    })
}

fn row_to_sync_log(row: &SqliteRow) -> Result<SyncLogEntry, StoreError> {
    let chunk_id: Option<String> = row.get("chunk_id");
    let status: String = row.get("status");
    let created_at: String = row.get("created_at");
    Ok(SyncLogEntry {
        id: row.get("id"),
        chunk_id: chunk_id
            .as_deref()
            .map(|raw| parse_uuid(raw, "sync_log chunk id"))
            .transpose()?,
        core_node_id: row.get("core_node_id"),
        status: SyncLogStatus::parse(&status).ok_or(StoreError::Missing("sync_log status"))?,
        detail: row.get("detail"),
        created_at: parse_timestamp(&created_at),
    })
}
