use super::*;

use async_trait::async_trait;

use crate::KbError;
use crate::embeddings::generator::{EmbeddingConfig, EmbeddingProvider};
use crate::extraction::ExtractionOptions;
use crate::extraction::relationships::RelationshipOptions;
use crate::llm::{CompletionRequest, CompletionResponse, LanguageModel};
use crate::store::MemoryStore;

/// Provider embedding texts by keyword so searches are deterministic.
struct KeywordProvider {
    fail_marker: Option<String>,
}

impl KeywordProvider {
    fn new() -> Self {
        Self { fail_marker: None }
    }

    fn failing_on(marker: &str) -> Self {
        Self {
            fail_marker: Some(marker.to_string()),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for KeywordProvider {
    async fn embed(&self, _model: &str, texts: &[String]) -> crate::Result<Vec<Vec<f32>>> {
        if let Some(marker) = &self.fail_marker {
            if texts.iter().any(|t| t.contains(marker)) {
                return Err(KbError::Embedding("simulated outage".to_string()));
            }
        }

        Ok(texts
            .iter()
            .map(|t| {
                if t.contains("alpha") {
                    vec![1.0, 0.0, 0.0]
                } else if t.contains("beta") {
                    vec![0.0, 1.0, 0.0]
                } else {
                    vec![0.0, 0.0, 1.0]
                }
            })
            .collect())
    }
}

/// Model returning a fixed entity payload for extraction prompts.
struct FixedEntityModel;

#[async_trait]
impl LanguageModel for FixedEntityModel {
    async fn complete_json(
        &self,
        _request: &CompletionRequest,
    ) -> crate::Result<CompletionResponse> {
        Ok(CompletionResponse {
            content: r#"{"entities": [
                {"type": "company", "name": "Acme", "confidence": 0.9},
                {"type": "product", "name": "Widget", "confidence": 0.8}
            ]}"#
            .to_string(),
            tokens_used: 10,
            model: "fixed".to_string(),
            provider: "test".to_string(),
        })
    }
}

/// Model that reads entity ids out of the prompt and relates the first two,
/// plus one dangling candidate.
struct EchoRelationshipModel;

#[async_trait]
impl LanguageModel for EchoRelationshipModel {
    async fn complete_json(
        &self,
        request: &CompletionRequest,
    ) -> crate::Result<CompletionResponse> {
        let ids: Vec<&str> = request
            .user_prompt
            .lines()
            .filter_map(|line| line.split_whitespace().find_map(|w| w.strip_prefix("id=")))
            .collect();

        let content = format!(
            r#"{{"relationships": [
                {{"type": "offers", "source": "{}", "target": "{}", "confidence": 0.9}},
                {{"type": "offers", "source": "{}", "target": "ghost", "confidence": 0.9}}
            ]}}"#,
            ids[0], ids[1], ids[0]
        );

        Ok(CompletionResponse {
            content,
            tokens_used: 5,
            model: "echo".to_string(),
            provider: "test".to_string(),
        })
    }
}

fn pipeline(store: Arc<MemoryStore>, provider: Arc<dyn EmbeddingProvider>) -> IngestionPipeline {
    let config = EmbeddingConfig {
        retry_delay_ms: 0,
        ..EmbeddingConfig::default()
    };
    IngestionPipeline::new(
        store,
        EmbeddingGenerator::new(provider, config),
        EntityExtractor::new(Arc::new(FixedEntityModel), ExtractionOptions::default()),
        RelationshipExtractor::new(Arc::new(EchoRelationshipModel), RelationshipOptions::default()),
        ChunkingConfig::default(),
        "ws-test".to_string(),
    )
}

fn doc(name: &str, content: &str) -> DocumentSource {
    DocumentSource {
        name: name.to_string(),
        content: content.to_string(),
    }
}

#[tokio::test]
async fn ingest_document_completes_item() {
    let store = Arc::new(MemoryStore::new());
    let mut pipeline = pipeline(Arc::clone(&store), Arc::new(KeywordProvider::new()));

    let report = pipeline
        .ingest_document(&doc("notes.md", "Some alpha content worth indexing."))
        .await
        .expect("ingest should succeed");

    assert_eq!(report.chunk_count, 1);
    assert_eq!(report.embedded_count, 1);
    assert_eq!(report.failed_count, 0);

    let item = store
        .get_item(&report.item_id)
        .await
        .expect("get")
        .expect("present");
    assert_eq!(item.embedding_status, EmbeddingStatus::Completed);
    assert_eq!(item.embedding_count, 1);

    let chunks = store.get_chunks(&report.item_id).await.expect("chunks");
    assert_eq!(chunks.len(), 1);
    assert!(chunks[0].content.contains("alpha"));
}

#[tokio::test]
async fn empty_document_completes_with_zero_chunks() {
    let store = Arc::new(MemoryStore::new());
    let mut pipeline = pipeline(Arc::clone(&store), Arc::new(KeywordProvider::new()));

    let report = pipeline
        .ingest_document(&doc("empty.md", "   \n"))
        .await
        .expect("ingest should succeed");

    assert_eq!(report.chunk_count, 0);
    let item = store
        .get_item(&report.item_id)
        .await
        .expect("get")
        .expect("present");
    assert_eq!(item.embedding_status, EmbeddingStatus::Completed);
}

#[tokio::test]
async fn embedding_outage_marks_item_failed() {
    let store = Arc::new(MemoryStore::new());
    let mut pipeline = pipeline(
        Arc::clone(&store),
        Arc::new(KeywordProvider::failing_on("POISON")),
    );

    let report = pipeline
        .ingest_document(&doc("bad.md", "POISON content."))
        .await
        .expect("ingest itself should not error");

    assert_eq!(report.embedded_count, 0);
    assert_eq!(report.failed_count, 1);

    let item = store
        .get_item(&report.item_id)
        .await
        .expect("get")
        .expect("present");
    assert_eq!(item.embedding_status, EmbeddingStatus::Failed);
    assert!(item.error_message.is_some());
}

#[tokio::test]
async fn ingest_documents_continues_past_failures() {
    let store = Arc::new(MemoryStore::new());
    let mut pipeline = pipeline(
        Arc::clone(&store),
        Arc::new(KeywordProvider::failing_on("POISON")),
    );

    let results = pipeline
        .ingest_documents(&[
            doc("good.md", "Healthy alpha content."),
            doc("bad.md", "POISON content."),
            doc("also-good.md", "Healthy beta content."),
        ])
        .await;

    assert_eq!(results.len(), 3);
    let reports: Vec<&IngestReport> = results
        .iter()
        .map(|r| r.as_ref().expect("store-level success"))
        .collect();
    assert_eq!(reports[0].embedded_count, 1);
    assert_eq!(reports[1].embedded_count, 0);
    assert_eq!(reports[2].embedded_count, 1);

    let items = store.list_items("ws-test").await.expect("list");
    assert_eq!(items.len(), 3);
}

#[tokio::test]
async fn search_joins_matches_to_chunk_content() {
    let store = Arc::new(MemoryStore::new());
    let mut pipeline = pipeline(Arc::clone(&store), Arc::new(KeywordProvider::new()));

    pipeline
        .ingest_documents(&[
            doc("alpha.md", "This mentions alpha explicitly."),
            doc("beta.md", "This mentions beta explicitly."),
        ])
        .await;

    let hits = pipeline
        .search("tell me about alpha", 0.5, 10)
        .await
        .expect("search should succeed");

    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].document_name, "alpha.md");
    assert!(hits[0].content.contains("alpha"));
    assert!((hits[0].similarity - 1.0).abs() < 1e-6);
}

#[tokio::test]
async fn extract_knowledge_persists_entities_and_relationships() {
    let store = Arc::new(MemoryStore::new());
    let mut pipeline = pipeline(Arc::clone(&store), Arc::new(KeywordProvider::new()));

    let ingest = pipeline
        .ingest_document(&doc("about.md", "Acme offers the Widget."))
        .await
        .expect("ingest");

    let report = pipeline
        .extract_knowledge(&ingest.item_id)
        .await
        .expect("extraction should succeed");

    assert_eq!(report.entities.len(), 2);
    assert_eq!(report.relationships.len(), 1);
    // The candidate referencing an unknown id was dropped, not errored.
    assert_eq!(report.dropped_relationships, 1);
    assert_eq!(report.tokens_used, 15);

    let stored_entities = store.get_entities("ws-test").await.expect("entities");
    assert_eq!(stored_entities.len(), 2);
    let stored_relationships = store.get_relationships("ws-test").await.expect("rels");
    assert_eq!(stored_relationships.len(), 1);
    assert_eq!(
        stored_relationships[0].source_entity_id,
        stored_entities[0].id
    );
}
