#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

//! End-to-end tests for the ingestion and knowledge pipeline
//!
//! These tests run the complete flow against in-process fakes:
//! - Document ingestion from raw text to stored, embedded chunks
//! - Similarity search joined back to chunk content
//! - Entity and relationship extraction over stored chunks
//! - Graph construction, querying, and export

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use kbgraph::Result;
use kbgraph::chunking::ChunkingConfig;
use kbgraph::embeddings::generator::{EmbeddingConfig, EmbeddingGenerator, EmbeddingProvider};
use kbgraph::extraction::relationships::{RelationshipExtractor, RelationshipOptions};
use kbgraph::extraction::{EntityExtractor, ExtractionOptions};
use kbgraph::graph::export::{to_cytoscape, to_dot};
use kbgraph::graph::query::GraphQuery;
use kbgraph::graph::{GraphBuilder, GraphOptions};
use kbgraph::indexer::{DocumentSource, IngestionPipeline};
use kbgraph::llm::{CompletionRequest, CompletionResponse, LanguageModel};
use kbgraph::store::{EmbeddingStatus, KnowledgeStore, MemoryStore};

/// Embeds texts onto fixed axes by keyword so similarity is predictable.
struct KeywordProvider;

#[async_trait]
impl EmbeddingProvider for KeywordProvider {
    async fn embed(&self, _model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                if text.contains("robotics") {
                    vec![1.0, 0.0, 0.0]
                } else if text.contains("billing") {
                    vec![0.0, 1.0, 0.0]
                } else {
                    vec![0.0, 0.0, 1.0]
                }
            })
            .collect())
    }
}

/// Returns a fixed entity envelope for every extraction call.
struct EntityModel;

#[async_trait]
impl LanguageModel for EntityModel {
    async fn complete_json(&self, _request: &CompletionRequest) -> Result<CompletionResponse> {
        let body = json!({
            "entities": [
                {
                    "type": "company",
                    "name": "Acme Robotics",
                    "description": "Industrial automation vendor",
                    "confidence": 0.95
                },
                {
                    "type": "product",
                    "name": "Line Follower",
                    "confidence": 0.85
                },
                {
                    "type": "pricing",
                    "name": "Starter Plan",
                    "confidence": 0.8,
                    "amount": "$49/mo"
                }
            ],
            "summary": "Product overview"
        });
        Ok(CompletionResponse {
            content: body.to_string(),
            tokens_used: 12,
            model: "fake".to_string(),
            provider: "test".to_string(),
        })
    }
}

/// Reads entity ids out of the prompt listing and links them in order.
struct RelationshipModel;

fn listed_ids(prompt: &str) -> Vec<String> {
    prompt
        .lines()
        .filter_map(|line| {
            let rest = line.split("id=").nth(1)?;
            rest.split_whitespace().next().map(str::to_string)
        })
        .collect()
}

#[async_trait]
impl LanguageModel for RelationshipModel {
    async fn complete_json(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        let ids = listed_ids(&request.user_prompt);
        let mut relationships = Vec::new();
        if ids.len() >= 2 {
            relationships.push(json!({
                "type": "offers",
                "source": ids[0],
                "target": ids[1],
                "confidence": 0.9
            }));
        }
        if ids.len() >= 3 {
            relationships.push(json!({
                "type": "priced_at",
                "source": ids[1],
                "target": ids[2],
                "confidence": 0.85
            }));
        }
        // One dangling candidate the pipeline must drop.
        relationships.push(json!({
            "type": "mentions",
            "source": ids.first().cloned().unwrap_or_default(),
            "target": "no-such-entity",
            "confidence": 0.9
        }));

        Ok(CompletionResponse {
            content: json!({ "relationships": relationships }).to_string(),
            tokens_used: 7,
            model: "fake".to_string(),
            provider: "test".to_string(),
        })
    }
}

const WORKSPACE: &str = "ws-integration";

fn pipeline(store: Arc<MemoryStore>) -> IngestionPipeline {
    let generator = EmbeddingGenerator::new(
        Arc::new(KeywordProvider),
        EmbeddingConfig {
            dimension: 3,
            max_retries: 1,
            retry_delay_ms: 0,
            ..EmbeddingConfig::default()
        },
    );
    let entity_extractor =
        EntityExtractor::new(Arc::new(EntityModel), ExtractionOptions::default());
    let relationship_extractor =
        RelationshipExtractor::new(Arc::new(RelationshipModel), RelationshipOptions::default());

    IngestionPipeline::new(
        store as Arc<dyn KnowledgeStore>,
        generator,
        entity_extractor,
        relationship_extractor,
        ChunkingConfig::default(),
        WORKSPACE.to_string(),
    )
}

fn sources() -> Vec<DocumentSource> {
    vec![
        DocumentSource {
            name: "products.md".to_string(),
            content: "Acme builds robotics kits for factories. The robotics line ships \
                      with sensors and a controller."
                .to_string(),
        },
        DocumentSource {
            name: "billing.md".to_string(),
            content: "Our billing page explains invoices, billing cycles, and refunds."
                .to_string(),
        },
    ]
}

#[tokio::test]
async fn ingest_search_and_extract() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let mut pipeline = pipeline(Arc::clone(&store));

    let reports: Vec<_> = pipeline
        .ingest_documents(&sources())
        .await
        .into_iter()
        .collect::<Result<_>>()?;
    assert_eq!(reports.len(), 2);
    for report in &reports {
        assert!(report.chunk_count >= 1);
        assert_eq!(report.embedded_count, report.chunk_count);
        assert_eq!(report.failed_count, 0);
    }

    let items = store.list_items(WORKSPACE).await?;
    assert_eq!(items.len(), 2);
    assert!(
        items
            .iter()
            .all(|item| item.embedding_status == EmbeddingStatus::Completed)
    );

    // A robotics query must land in the robotics document.
    let hits = pipeline.search("robotics controller", 0.5, 10).await?;
    assert!(!hits.is_empty());
    assert_eq!(hits[0].document_name, "products.md");
    assert!(hits[0].similarity > 0.9);
    assert!(hits.iter().all(|hit| hit.document_name != "billing.md"));

    let knowledge = pipeline.extract_knowledge(&reports[0].item_id).await?;
    assert_eq!(knowledge.entities.len(), 3);
    assert_eq!(knowledge.relationships.len(), 2);
    assert_eq!(knowledge.dropped_relationships, 1);
    assert_eq!(knowledge.tokens_used, 19);

    let stored_entities = store.get_entities(WORKSPACE).await?;
    assert_eq!(stored_entities.len(), 3);
    let stored_relationships = store.get_relationships(WORKSPACE).await?;
    assert_eq!(stored_relationships.len(), 2);

    Ok(())
}

#[tokio::test]
async fn graph_build_query_and_export() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let mut pipeline = pipeline(Arc::clone(&store));

    let reports: Vec<_> = pipeline
        .ingest_documents(&sources())
        .await
        .into_iter()
        .collect::<Result<_>>()?;
    pipeline.extract_knowledge(&reports[0].item_id).await?;

    let builder = GraphBuilder::new(Arc::clone(&store) as Arc<dyn KnowledgeStore>);
    let graph = builder.build(WORKSPACE, &GraphOptions::default()).await?;

    assert_eq!(graph.metadata.node_count, 3);
    assert_eq!(graph.metadata.edge_count, 2);

    let company = graph
        .nodes
        .iter()
        .find(|n| n.name == "Acme Robotics")
        .expect("company node should exist");
    let pricing = graph
        .nodes
        .iter()
        .find(|n| n.name == "Starter Plan")
        .expect("pricing node should exist");

    let query = GraphQuery::new(&graph);

    // company -> product -> pricing is a connected chain.
    let path = query
        .shortest_path(&company.id, &pricing.id, 5)
        .expect("path should exist");
    assert_eq!(path.len(), 3);
    assert_eq!(path[0], company.id);
    assert_eq!(path[2], pricing.id);

    let clusters = query.clusters();
    assert_eq!(clusters.len(), 1);
    assert_eq!(clusters[0].len(), 3);

    // The product sits in the middle of the chain and has the highest degree.
    let product = graph
        .nodes
        .iter()
        .find(|n| n.name == "Line Follower")
        .expect("product node should exist");
    let centrality = query.centrality();
    assert!((centrality[&product.id] - 1.0).abs() < f32::EPSILON);
    assert!((centrality[&company.id] - 0.5).abs() < f32::EPSILON);

    let dot = to_dot(&graph);
    assert!(dot.contains("digraph knowledge_graph"));
    assert!(dot.contains("Acme Robotics"));

    let cytoscape = to_cytoscape(&graph);
    let nodes = cytoscape["elements"]["nodes"]
        .as_array()
        .expect("nodes array");
    assert_eq!(nodes.len(), 3);

    Ok(())
}
