//! Source-content lookup seam.
//!
//! Chunk and embedding bookkeeping lives in this crate's store, but the
//! source rows (legal units, QA entries, text entries) are owned by an
//! external storage layer. [`SourceCatalog`] is the read-only window onto
//! that layer; production wires a database-backed implementation, tests
//! use [`InMemoryCatalog`].

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use uuid::Uuid;

use crate::model::{SourceContent, SourceKind, SourceRef};
use crate::types::StoreError;

/// Read-only access to the source content that chunks are derived from.
#[async_trait]
pub trait SourceCatalog: Send + Sync {
    /// Resolve a source reference to its current content. `Ok(None)`
    /// means the row was deleted; the pipeline treats that as a cleanup
    /// signal rather than a fault.
    async fn lookup(&self, source: SourceRef) -> Result<Option<SourceContent>, StoreError>;

    /// All legal units belonging to a work, for metadata fan-out when a
    /// document-level attribute changes.
    async fn units_for_work(&self, work_id: Uuid) -> Result<Vec<SourceRef>, StoreError>;
}

/// Map-backed catalog for tests and offline runs.
#[derive(Default)]
pub struct InMemoryCatalog {
    entries: RwLock<HashMap<SourceRef, SourceContent>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, content: SourceContent) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(content.source_ref(), content);
        }
    }

    pub fn remove(&self, source: SourceRef) {
        if let Ok(mut entries) = self.entries.write() {
            entries.remove(&source);
        }
    }
}

#[async_trait]
impl SourceCatalog for InMemoryCatalog {
    async fn lookup(&self, source: SourceRef) -> Result<Option<SourceContent>, StoreError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| StoreError::Missing("catalog lock poisoned"))?;
        Ok(entries.get(&source).cloned())
    }

    async fn units_for_work(&self, work_id: Uuid) -> Result<Vec<SourceRef>, StoreError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| StoreError::Missing("catalog lock poisoned"))?;
        let mut refs: Vec<SourceRef> = entries
            .values()
            .filter_map(|content| match content {
                SourceContent::LegalUnit(unit) if unit.work_id == Some(work_id) => {
                    Some(SourceRef::legal_unit(unit.id))
                }
                _ => None,
            })
            .collect();
        refs.sort_by_key(|r| r.id);
        Ok(refs)
    }
}
