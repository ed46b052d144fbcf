//! ```text
//! Source content (legal units / QA / text entries, via SourceCatalog)
//!        │
//!        ├─► text::normalize ──► segmenter::segment ──► Chunks
//!        │                                                │
//!        │                      embedder::EmbeddingProvider
//!        │                                                │
//!        └─► pipeline::IngestPipeline ──► store::SqliteStore
//!                                                         │
//! payload::build_payload ◄── sync::SyncOrchestrator ◄─────┘
//!        │
//!        └─► sync::CoreClient ──► Core vector-search system
//! ```
//!
pub mod catalog;
pub mod config;
pub mod embedder;
pub mod model;
pub mod payload;
pub mod pipeline;
pub mod segmenter;
pub mod store;
pub mod sync;
pub mod text;
pub mod types;

pub use catalog::{InMemoryCatalog, SourceCatalog};
pub use config::{CoreConfig, PipelineConfig};
pub use embedder::{EmbeddingProvider, HttpEmbeddingProvider, MockEmbeddingProvider};
pub use model::{
    Chunk, DocumentMeta, EmbeddingRecord, LegalUnit, QaEntry, SourceContent, SourceKind,
    SourceRef, SyncLogEntry, SyncLogStatus, SyncState, TextEntry,
};
pub use payload::{EmbeddingPayload, build_payload, metadata_fingerprint};
pub use pipeline::{BatchReport, ChangeEvent, IngestPipeline, IngestReport};
pub use segmenter::{SegmentedChunk, segment};
pub use store::{SqliteStore, SyncStats};
pub use sync::{CoreClient, PushResult, SyncOrchestrator, SyncReport, SyncType};
pub use types::{
    EmbedError, PayloadError, PipelineError, SegmentationError, StoreError, SyncError,
};
