//! Ingestion pipeline: source text to stored, sync-ready embeddings.
//!
//! The pipeline reacts to explicit [`ChangeEvent`]s emitted by the
//! storage layer when source rows change. Processing is idempotent:
//! re-running an event for unchanged content is a no-op, so duplicate
//! event delivery is harmless.

use std::sync::Arc;

use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::catalog::SourceCatalog;
use crate::config::PipelineConfig;
use crate::embedder::EmbeddingProvider;
use crate::model::{EmbeddingRecord, SourceRef};
use crate::segmenter::segment;
use crate::store::{SqliteStore, chunk_content_hash};
use crate::types::{PipelineError, SegmentationError};

/// A change in the external storage layer that the pipeline must react
/// to. Emitted explicitly by the caller at its transaction boundaries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeEvent {
    /// Source text changed (or the row is new): re-chunk and re-embed.
    SourceSaved(SourceRef),
    /// Source row deleted: drop its chunks; embeddings cascade and the
    /// sync log keeps orphan markers for Core-side cleanup.
    SourceDeleted(SourceRef),
    /// Only display metadata changed: flag synced embeddings for
    /// metadata-only re-delivery, vectors stay.
    MetadataChanged(SourceRef),
    /// A document-level attribute changed: fan the metadata invalidation
    /// out to every unit of the work.
    WorkMetadataChanged(Uuid),
}

/// Outcome of processing one source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub chunks: usize,
    pub embeddings: usize,
    /// True when content was identical to the stored chunk set and
    /// nothing was rewritten.
    pub unchanged: bool,
}

/// Aggregate outcome of a batch of events.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub succeeded: usize,
    pub failed: usize,
    pub chunks: usize,
    pub embeddings: usize,
}

/// Chunking and embedding front half of the system.
pub struct IngestPipeline {
    store: SqliteStore,
    catalog: Arc<dyn SourceCatalog>,
    provider: Arc<dyn EmbeddingProvider>,
    config: PipelineConfig,
}

impl IngestPipeline {
    pub fn new(
        store: SqliteStore,
        catalog: Arc<dyn SourceCatalog>,
        provider: Arc<dyn EmbeddingProvider>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            catalog,
            provider,
            config,
        }
    }

    /// Dispatch one change event.
    #[instrument(skip(self))]
    pub async fn handle_event(&self, event: ChangeEvent) -> Result<IngestReport, PipelineError> {
        match event {
            ChangeEvent::SourceSaved(source) => self.process_source(source).await,
            ChangeEvent::SourceDeleted(source) => {
                let removed = self.store.delete_source(source).await?;
                info!(%source, removed, "source deleted; chunks dropped");
                Ok(IngestReport::default())
            }
            ChangeEvent::MetadataChanged(source) => {
                let flagged = self.store.invalidate_metadata_for_source(source).await?;
                info!(%source, flagged, "metadata invalidated");
                Ok(IngestReport::default())
            }
            ChangeEvent::WorkMetadataChanged(work_id) => {
                let mut flagged = 0;
                for source in self.catalog.units_for_work(work_id).await? {
                    flagged += self.store.invalidate_metadata_for_source(source).await?;
                }
                info!(%work_id, flagged, "work metadata invalidated across units");
                Ok(IngestReport::default())
            }
        }
    }

    /// Process a batch of events, isolating failures per item: one
    /// source's failure is recorded and the rest of the batch proceeds.
    #[instrument(skip(self, events))]
    pub async fn process_batch(&self, events: &[ChangeEvent]) -> BatchReport {
        let mut report = BatchReport::default();
        for event in events {
            match self.handle_event(*event).await {
                Ok(item) => {
                    report.succeeded += 1;
                    report.chunks += item.chunks;
                    report.embeddings += item.embeddings;
                }
                Err(err) => {
                    warn!(?event, error = %err, "event processing failed");
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Re-chunk and re-embed one source.
    ///
    /// A source whose content hashes to the stored chunk set is left
    /// untouched, preserving its sync state. A source that resolves to
    /// nothing (deleted, or its text normalizes to empty) has its chunks
    /// dropped instead.
    #[instrument(skip(self), fields(source = %source))]
    pub async fn process_source(&self, source: SourceRef) -> Result<IngestReport, PipelineError> {
        let Some(content) = self.catalog.lookup(source).await? else {
            self.store.delete_source(source).await?;
            return Ok(IngestReport::default());
        };

        let text = content.embeddable_text();
        let segmented = match segment(
            &text,
            self.config.chunk_size_tokens,
            self.config.overlap_tokens,
        ) {
            Ok(segmented) => segmented,
            Err(SegmentationError::EmptyInput) => {
                self.store.delete_source(source).await?;
                return Ok(IngestReport::default());
            }
            Err(other) => return Err(other.into()),
        };

        // Idempotency check: identical content produces identical hashes
        // in identical order, and a no-op save must not reset sync state.
        let existing = self.store.chunks_for_source(source).await?;
        if existing.len() == segmented.len()
            && existing.iter().zip(segmented.iter()).all(|(old, new)| {
                old.content_hash == chunk_content_hash(&new.text, source, old.chunk_index)
            })
        {
            return Ok(IngestReport {
                chunks: existing.len(),
                embeddings: 0,
                unchanged: true,
            });
        }

        let chunks = self.store.replace_chunks(source, &segmented).await?;

        let mut records = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.config.embed_batch_size.max(1)) {
            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
            let vectors = self.provider.embed_batch(&texts).await?;
            for (chunk, vector) in batch.iter().zip(vectors) {
                records.push(EmbeddingRecord::new(
                    chunk.id,
                    self.provider.model_id(),
                    vector,
                ));
            }
        }
        self.store.insert_embeddings(&records).await?;

        info!(
            %source,
            chunks = chunks.len(),
            embeddings = records.len(),
            "source processed"
        );
        Ok(IngestReport {
            chunks: chunks.len(),
            embeddings: records.len(),
            unchanged: false,
        })
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }
}
