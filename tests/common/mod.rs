#![allow(dead_code)]

use std::sync::{Arc, Once};

use tempfile::TempDir;
use url::Url;
use uuid::Uuid;

use lexsync::{
    CoreConfig, DocumentMeta, IngestPipeline, InMemoryCatalog, LegalUnit, MockEmbeddingProvider,
    PipelineConfig, QaEntry, SourceContent, SqliteStore, TextEntry,
};

pub const TEST_DIMENSION: usize = 8;

static TRACING: Once = Once::new();

/// Route pipeline tracing through the test harness, honoring
/// `RUST_LOG` when set.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Fresh file-backed store; the tempdir must outlive the store.
pub async fn fresh_store() -> (SqliteStore, TempDir) {
    init_tracing();
    let dir = TempDir::new().expect("tempdir");
    let url = format!("sqlite://{}/lexsync.db", dir.path().display());
    let store = SqliteStore::connect(&url).await.expect("store connects");
    (store, dir)
}

pub fn test_pipeline_config() -> PipelineConfig {
    PipelineConfig::default()
        .with_model("mock-embedder", TEST_DIMENSION)
        .with_chunking(10, 3)
}

pub fn test_core_config(base_url: &str) -> CoreConfig {
    CoreConfig::default()
        .with_base_url(Url::parse(base_url).expect("mock server url"))
        .with_api_key("test-key")
}

pub fn test_pipeline(store: SqliteStore, catalog: Arc<InMemoryCatalog>) -> IngestPipeline {
    IngestPipeline::new(
        store,
        catalog,
        Arc::new(MockEmbeddingProvider::new(TEST_DIMENSION)),
        test_pipeline_config(),
    )
}

pub fn legal_unit(content: &str) -> LegalUnit {
    LegalUnit {
        id: Uuid::new_v4(),
        parent_id: None,
        unit_type: "article".into(),
        number: "12".into(),
        path_label: "ماده 12".into(),
        content: content.into(),
        valid_from: None,
        valid_to: None,
        is_active: true,
        work_id: Some(Uuid::new_v4()),
        expression_id: None,
        manifestation_id: None,
        document: DocumentMeta {
            title: "قانون مدنی".into(),
            doc_type: "law".into(),
            language: "fa".into(),
            urn: "urn:lex:ir:law:1307".into(),
            jurisdiction: "IR".into(),
            authority: "مجلس".into(),
            expression_date: None,
            publication_date: None,
            official_gazette: String::new(),
            gazette_issue_no: String::new(),
            repeal_status: "in_force".into(),
        },
        tags: vec!["مدنی".into()],
    }
}

pub fn qa_entry(question: &str, answer: &str) -> QaEntry {
    QaEntry {
        id: Uuid::new_v4(),
        question: question.into(),
        answer: answer.into(),
        related_unit_ids: vec![],
        approved: true,
        tags: vec![],
    }
}

pub fn text_entry(title: &str, body: &str) -> TextEntry {
    TextEntry {
        id: Uuid::new_v4(),
        title: title.into(),
        body: body.into(),
        file_ref: None,
        tags: vec![],
    }
}

/// A paragraph long enough to split into several chunks under the test
/// chunking config (budget 10, overlap 3).
pub fn long_text(sentences: usize) -> String {
    (0..sentences)
        .map(|i| format!("جمله شماره {i} درباره قرارداد و تعهدات طرفین است."))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn sample_content(sentences: usize) -> SourceContent {
    SourceContent::LegalUnit(legal_unit(&long_text(sentences)))
}
