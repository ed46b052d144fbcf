//! Sync payload construction.
//!
//! A payload carries everything Core needs to index one chunk: the
//! vector, the embeddable text, and a denormalized metadata object, so
//! Core never has to call back into this system to resolve document
//! structure. Payload building is pure; orchestration decides when to
//! send.
//!
//! The metadata fingerprint covers only the fields Core filters and
//! displays on. Fields like timestamps are excluded so a no-op re-save
//! does not trigger a metadata re-delivery.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use crate::model::{Chunk, EmbeddingRecord, SourceContent};
use crate::types::PayloadError;

/// One chunk's delivery to Core: vector plus denormalized metadata.
#[derive(Clone, Debug, Serialize)]
pub struct EmbeddingPayload {
    /// Core node key; stable across re-deliveries of the same embedding.
    pub id: String,
    pub vector: Vec<f32>,
    pub text: String,
    pub document_id: String,
    pub document_type: String,
    pub chunk_index: usize,
    pub language: String,
    /// Originating system tag, always `"ingest"`.
    pub source: &'static str,
    pub created_at: DateTime<Utc>,
    /// SHA-256 over the rest of the serialized payload, recomputed on
    /// every build so the receiver can dedup redundant deliveries.
    /// Distinct from the cached metadata fingerprint.
    pub payload_hash: String,
    pub metadata: Value,
}

/// Build the full payload for one embedding.
///
/// The chunk must belong to `content`; a mismatch means the caller's
/// bookkeeping has drifted and is reported as an orphaned reference.
pub fn build_payload(
    chunk: &Chunk,
    record: &EmbeddingRecord,
    content: &SourceContent,
) -> Result<EmbeddingPayload, PayloadError> {
    if chunk.source != content.source_ref() || record.chunk_id != chunk.id {
        return Err(PayloadError::OrphanedReference(format!(
            "chunk {} does not belong to {} / embedding {}",
            chunk.id,
            content.source_ref(),
            record.id
        )));
    }

    let (document_id, document_type, language) = match content {
        SourceContent::LegalUnit(unit) => (
            unit.work_id.map(|id| id.to_string()).unwrap_or_default(),
            unit.document.doc_type.clone(),
            unit.document.language.clone(),
        ),
        SourceContent::QaEntry(qa) => (qa.id.to_string(), "qa_entry".to_string(), "fa".to_string()),
        SourceContent::TextEntry(entry) => {
            (entry.id.to_string(), "text_entry".to_string(), "fa".to_string())
        }
    };

    let mut payload = EmbeddingPayload {
        id: record.id.to_string(),
        vector: record.vector.clone(),
        text: chunk.content.clone(),
        document_id,
        document_type,
        chunk_index: chunk.chunk_index,
        language,
        source: "ingest",
        created_at: record.created_at,
        payload_hash: String::new(),
        metadata: build_metadata(chunk, record, content),
    };
    payload.payload_hash = payload_content_hash(&payload)?;
    Ok(payload)
}

/// SHA-256 over the payload's sorted-key JSON rendering, excluding the
/// hash field itself.
fn payload_content_hash(payload: &EmbeddingPayload) -> Result<String, PayloadError> {
    let mut value = serde_json::to_value(payload)?;
    if let Some(map) = value.as_object_mut() {
        map.remove("payload_hash");
    }
    let rendered = serde_json::to_string(&value)?;
    let mut hasher = Sha256::new();
    hasher.update(rendered.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

/// The non-vector metadata object attached to a Core node.
fn build_metadata(chunk: &Chunk, record: &EmbeddingRecord, content: &SourceContent) -> Value {
    let mut map = serde_json::Map::new();
    map.insert("chunk_id".into(), json!(chunk.id.to_string()));
    map.insert("chunk_index".into(), json!(chunk.chunk_index));
    map.insert("chunk_hash".into(), json!(chunk.content_hash));
    map.insert("token_count".into(), json!(chunk.token_count));
    map.insert("overlap_prev".into(), json!(chunk.overlap_prev));
    map.insert("content_type".into(), json!(chunk.source.kind.as_str()));
    map.insert("embedding_model".into(), json!(record.model_id));
    map.insert("embedding_dimension".into(), json!(record.dim));
    map.insert(
        "embedding_created_at".into(),
        json!(record.created_at.to_rfc3339()),
    );
    map.insert("tags".into(), json!(content.tags()));

    if let SourceContent::LegalUnit(unit) = content {
        map.insert("unit_id".into(), json!(unit.id.to_string()));
        map.insert("unit_type".into(), json!(unit.unit_type));
        map.insert("unit_number".into(), json!(unit.number));
        map.insert("path_label".into(), json!(unit.path_label));
        map.insert("is_active".into(), json!(unit.is_active));
        map.insert("valid_from".into(), json!(unit.valid_from));
        map.insert("valid_to".into(), json!(unit.valid_to));
        map.insert(
            "work_id".into(),
            json!(unit.work_id.map(|id| id.to_string())),
        );
        map.insert(
            "expression_id".into(),
            json!(unit.expression_id.map(|id| id.to_string())),
        );
        map.insert(
            "manifestation_id".into(),
            json!(unit.manifestation_id.map(|id| id.to_string())),
        );
        map.insert("work_title".into(), json!(unit.document.title));
        map.insert("doc_type".into(), json!(unit.document.doc_type));
        map.insert("urn".into(), json!(unit.document.urn));
        map.insert("jurisdiction".into(), json!(unit.document.jurisdiction));
        map.insert("authority".into(), json!(unit.document.authority));
        map.insert("repeal_status".into(), json!(unit.document.repeal_status));
        map.insert(
            "expression_date".into(),
            json!(unit.document.expression_date),
        );
        map.insert(
            "publication_date".into(),
            json!(unit.document.publication_date),
        );
        map.insert(
            "official_gazette".into(),
            json!(unit.document.official_gazette),
        );
        map.insert(
            "gazette_issue_no".into(),
            json!(unit.document.gazette_issue_no),
        );
    }

    if let SourceContent::QaEntry(qa) = content {
        map.insert("approved".into(), json!(qa.approved));
        map.insert(
            "related_unit_ids".into(),
            json!(
                qa.related_unit_ids
                    .iter()
                    .map(|id| id.to_string())
                    .collect::<Vec<_>>()
            ),
        );
    }

    Value::Object(map)
}

/// Fingerprint of the metadata fields Core filters on.
///
/// SHA-256 over a sorted-key JSON rendering, so the hash is independent
/// of field insertion order. Two sources whose tracked fields agree hash
/// identically even if untracked fields (timestamps, gazette details)
/// differ.
pub fn metadata_fingerprint(chunk: &Chunk, content: &SourceContent) -> String {
    let mut tracked: BTreeMap<&'static str, Value> = BTreeMap::new();
    tracked.insert("text", json!(chunk.content));
    tracked.insert("language", json!("fa"));
    let mut tags: Vec<&str> = content.tags().iter().map(String::as_str).collect();
    tags.sort_unstable();
    tracked.insert("tags", json!(tags));

    if let SourceContent::LegalUnit(unit) = content {
        tracked.insert("path_label", json!(unit.path_label));
        tracked.insert("unit_type", json!(unit.unit_type));
        tracked.insert("unit_number", json!(unit.number));
        tracked.insert("work_title", json!(unit.document.title));
        tracked.insert("doc_type", json!(unit.document.doc_type));
        tracked.insert("language", json!(unit.document.language));
        tracked.insert("jurisdiction", json!(unit.document.jurisdiction));
        tracked.insert("authority", json!(unit.document.authority));
        tracked.insert("valid_from", json!(unit.valid_from));
        tracked.insert("valid_to", json!(unit.valid_to));
        tracked.insert("is_active", json!(unit.is_active));
        tracked.insert("repeal_status", json!(unit.document.repeal_status));
    }

    // BTreeMap serializes in key order.
    let rendered = serde_json::to_string(&tracked).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(rendered.as_bytes());
    format!("{:x}", hasher.finalize())
}
