//! Domain types shared across the pipeline.
//!
//! Source content is owned by an external storage layer; the pipeline
//! only reads it and owns the derived chunk/embedding bookkeeping. A
//! chunk's owner is expressed as a [`SourceRef`] sum type so "exactly one
//! owner" is a type-level invariant rather than a runtime check over
//! nullable references.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind discriminant for a chunk's owning source content.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    LegalUnit,
    QaEntry,
    TextEntry,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::LegalUnit => "legal_unit",
            SourceKind::QaEntry => "qa_entry",
            SourceKind::TextEntry => "text_entry",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "legal_unit" => Some(SourceKind::LegalUnit),
            "qa_entry" => Some(SourceKind::QaEntry),
            "text_entry" => Some(SourceKind::TextEntry),
            _ => None,
        }
    }
}

/// Typed reference to the source content row that owns a chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceRef {
    pub kind: SourceKind,
    pub id: Uuid,
}

impl SourceRef {
    pub fn legal_unit(id: Uuid) -> Self {
        Self {
            kind: SourceKind::LegalUnit,
            id,
        }
    }

    pub fn qa_entry(id: Uuid) -> Self {
        Self {
            kind: SourceKind::QaEntry,
            id,
        }
    }

    pub fn text_entry(id: Uuid) -> Self {
        Self {
            kind: SourceKind::TextEntry,
            id,
        }
    }
}

impl std::fmt::Display for SourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

/// Denormalized document-lineage metadata attached to a legal unit.
///
/// Mirrors the Work/Expression/Manifestation attributes the sync payload
/// needs; the hierarchy itself lives in the external storage layer.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub title: String,
    pub doc_type: String,
    pub language: String,
    pub urn: String,
    pub jurisdiction: String,
    pub authority: String,
    pub expression_date: Option<NaiveDate>,
    pub publication_date: Option<NaiveDate>,
    pub official_gazette: String,
    pub gazette_issue_no: String,
    pub repeal_status: String,
}

/// A hierarchical legal provision (article, clause, note, ...).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LegalUnit {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    /// Structural type tag, e.g. `article` or `clause`.
    pub unit_type: String,
    pub number: String,
    /// Human-readable structural path, e.g. `ماده 12 > تبصره 1`.
    pub path_label: String,
    pub content: String,
    pub valid_from: Option<NaiveDate>,
    pub valid_to: Option<NaiveDate>,
    pub is_active: bool,
    pub work_id: Option<Uuid>,
    pub expression_id: Option<Uuid>,
    pub manifestation_id: Option<Uuid>,
    pub document: DocumentMeta,
    pub tags: Vec<String>,
}

/// A curated question/answer pair, optionally linked to legal units.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QaEntry {
    pub id: Uuid,
    pub question: String,
    pub answer: String,
    pub related_unit_ids: Vec<Uuid>,
    pub approved: bool,
    pub tags: Vec<String>,
}

/// Free-form titled text, optionally backed by an uploaded file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TextEntry {
    pub id: Uuid,
    pub title: String,
    pub body: String,
    /// Opaque object-storage key; text extraction is out of scope here.
    pub file_ref: Option<String>,
    pub tags: Vec<String>,
}

/// One of the three source content variants that can own chunks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SourceContent {
    LegalUnit(LegalUnit),
    QaEntry(QaEntry),
    TextEntry(TextEntry),
}

impl SourceContent {
    pub fn source_ref(&self) -> SourceRef {
        match self {
            SourceContent::LegalUnit(u) => SourceRef::legal_unit(u.id),
            SourceContent::QaEntry(q) => SourceRef::qa_entry(q.id),
            SourceContent::TextEntry(t) => SourceRef::text_entry(t.id),
        }
    }

    /// The text that feeds segmentation. QA entries embed as a labeled
    /// question/answer composition, matching how they are retrieved.
    pub fn embeddable_text(&self) -> String {
        match self {
            SourceContent::LegalUnit(u) => u.content.clone(),
            SourceContent::QaEntry(q) => {
                format!("پرسش: {}\n\nپاسخ: {}", q.question, q.answer)
            }
            SourceContent::TextEntry(t) => {
                if t.title.is_empty() {
                    t.body.clone()
                } else {
                    format!("{}\n\n{}", t.title, t.body)
                }
            }
        }
    }

    pub fn tags(&self) -> &[String] {
        match self {
            SourceContent::LegalUnit(u) => &u.tags,
            SourceContent::QaEntry(q) => &q.tags,
            SourceContent::TextEntry(t) => &t.tags,
        }
    }
}

/// A bounded, possibly overlapping slice of a source's text.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: Uuid,
    pub source: SourceRef,
    /// Zero-based, contiguous within the source.
    pub chunk_index: usize,
    pub content: String,
    pub token_count: usize,
    /// Tokens shared with the previous chunk (0 for the first chunk).
    pub overlap_prev: usize,
    /// SHA-256 of `content + source + index`, used for receiver-side dedup.
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Sync lifecycle of an embedding row.
///
/// `Syncing` is a transient row-claim held for the duration of one
/// orchestrator batch; `Failed` is terminal and excluded from automatic
/// retry passes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Unsynced,
    Syncing,
    Synced,
    Failed,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Unsynced => "unsynced",
            SyncState::Syncing => "syncing",
            SyncState::Synced => "synced",
            SyncState::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "unsynced" => Some(SyncState::Unsynced),
            "syncing" => Some(SyncState::Syncing),
            "synced" => Some(SyncState::Synced),
            "failed" => Some(SyncState::Failed),
            _ => None,
        }
    }
}

/// A stored embedding vector plus its sync bookkeeping.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub id: Uuid,
    pub chunk_id: Uuid,
    pub model_id: String,
    pub dim: usize,
    pub vector: Vec<f32>,
    pub sync_state: SyncState,
    /// External vector-store key once synced.
    pub core_node_id: Option<String>,
    /// Cached fingerprint of the non-vector payload; `None` means the
    /// metadata needs re-delivery even though the vector is unchanged.
    pub metadata_hash: Option<String>,
    pub sync_error: String,
    pub sync_retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub synced_at: Option<DateTime<Utc>>,
    pub last_metadata_sync: Option<DateTime<Utc>>,
}

impl EmbeddingRecord {
    pub fn new(chunk_id: Uuid, model_id: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            id: Uuid::new_v4(),
            chunk_id,
            model_id: model_id.into(),
            dim: vector.len(),
            vector,
            sync_state: SyncState::Unsynced,
            core_node_id: None,
            metadata_hash: None,
            sync_error: String::new(),
            sync_retry_count: 0,
            created_at: Utc::now(),
            synced_at: None,
            last_metadata_sync: None,
        }
    }
}

/// Verification status of a sync-log row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncLogStatus {
    Synced,
    Verified,
    Failed,
}

impl SyncLogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncLogStatus::Synced => "synced",
            SyncLogStatus::Verified => "verified",
            SyncLogStatus::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "synced" => Some(SyncLogStatus::Synced),
            "verified" => Some(SyncLogStatus::Verified),
            "failed" => Some(SyncLogStatus::Failed),
            _ => None,
        }
    }
}

/// Audit record of a delivery to Core. Not authoritative sync state:
/// the chunk reference is nulled (not cascaded) when the chunk is
/// deleted, so the trail of a deleted chunk's final attempts survives.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyncLogEntry {
    pub id: i64,
    pub chunk_id: Option<Uuid>,
    pub core_node_id: String,
    pub status: SyncLogStatus,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_kind_round_trips() {
        for kind in [
            SourceKind::LegalUnit,
            SourceKind::QaEntry,
            SourceKind::TextEntry,
        ] {
            assert_eq!(SourceKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(SourceKind::parse("document"), None);
    }

    #[test]
    fn sync_state_round_trips() {
        for state in [
            SyncState::Unsynced,
            SyncState::Syncing,
            SyncState::Synced,
            SyncState::Failed,
        ] {
            assert_eq!(SyncState::parse(state.as_str()), Some(state));
        }
    }

    #[test]
    fn qa_text_labels_question_and_answer() {
        let qa = SourceContent::QaEntry(QaEntry {
            id: Uuid::new_v4(),
            question: "شرایط فسخ چیست؟".into(),
            answer: "طبق ماده 10.".into(),
            related_unit_ids: vec![],
            approved: true,
            tags: vec![],
        });
        let text = qa.embeddable_text();
        assert!(text.contains("پرسش:"));
        assert!(text.contains("پاسخ:"));
    }
}
