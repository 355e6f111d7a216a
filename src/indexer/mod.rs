#[cfg(test)]
mod tests;

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::Result;
use crate::chunking::{ChunkingConfig, chunk_text};
use crate::embeddings::generator::{EmbeddingGenerator, EmbeddingInput};
use crate::extraction::relationships::{EntityRelationship, RelationshipExtractor};
use crate::extraction::{Entity, EntityExtractor};
use crate::store::{EmbeddingStatus, KnowledgeBaseItem, KnowledgeStore, SimilaritySearch};

/// A document handed to the pipeline for ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSource {
    pub name: String,
    pub content: String,
}

/// Outcome of ingesting one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub item_id: String,
    pub chunk_count: usize,
    pub embedded_count: usize,
    pub failed_count: usize,
}

/// One retrieval result joined back to its chunk content.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub chunk_id: String,
    pub document_name: String,
    pub content: String,
    pub similarity: f32,
}

/// Outcome of knowledge extraction over an ingested item.
#[derive(Debug, Clone)]
pub struct KnowledgeReport {
    pub entities: Vec<Entity>,
    pub relationships: Vec<EntityRelationship>,
    pub dropped_relationships: usize,
    pub tokens_used: u64,
}

/// Drives documents through chunking, embedding, and persistence, and runs
/// knowledge extraction over what was stored.
pub struct IngestionPipeline {
    store: Arc<dyn KnowledgeStore>,
    generator: EmbeddingGenerator,
    entity_extractor: EntityExtractor,
    relationship_extractor: RelationshipExtractor,
    chunking: ChunkingConfig,
    workspace_id: String,
}

impl IngestionPipeline {
    #[inline]
    pub fn new(
        store: Arc<dyn KnowledgeStore>,
        generator: EmbeddingGenerator,
        entity_extractor: EntityExtractor,
        relationship_extractor: RelationshipExtractor,
        chunking: ChunkingConfig,
        workspace_id: String,
    ) -> Self {
        Self {
            store,
            generator,
            entity_extractor,
            relationship_extractor,
            chunking,
            workspace_id,
        }
    }

    #[inline]
    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    /// Effectiveness counters for the embedding cache behind this pipeline.
    #[inline]
    pub fn cache_stats(&self) -> crate::embeddings::cache::CacheStats {
        self.generator.cache().stats()
    }

    /// Ingest one document: chunk it, embed the chunks, persist both, and
    /// drive the item through Pending -> Generating -> Completed | Failed.
    pub async fn ingest_document(&mut self, source: &DocumentSource) -> Result<IngestReport> {
        let item = KnowledgeBaseItem::new(&self.workspace_id, &source.name);
        let item_id = item.id.clone();
        self.store.create_item(item).await?;
        self.store
            .update_item_status(&item_id, EmbeddingStatus::Generating, 0, None)
            .await?;

        let report = match chunk_text(&source.content, &item_id, &source.name, &self.chunking) {
            Ok(report) => report,
            Err(e) => {
                self.store
                    .update_item_status(
                        &item_id,
                        EmbeddingStatus::Failed,
                        0,
                        Some(e.to_string()),
                    )
                    .await?;
                return Err(e);
            }
        };

        let chunks = report.chunks;
        debug!(
            "Chunked '{}' into {} chunks with {} strategy",
            source.name,
            chunks.len(),
            report.strategy
        );

        if chunks.is_empty() {
            self.store
                .update_item_status(&item_id, EmbeddingStatus::Completed, 0, None)
                .await?;
            return Ok(IngestReport {
                item_id,
                chunk_count: 0,
                embedded_count: 0,
                failed_count: 0,
            });
        }

        self.store.put_chunks(&item_id, &chunks).await?;

        let inputs: Vec<EmbeddingInput> = chunks
            .iter()
            .map(|c| EmbeddingInput {
                id: c.id.clone(),
                text: c.content.clone(),
            })
            .collect();
        let batch = self.generator.generate_batch(&inputs).await;

        for failure in &batch.errors {
            warn!(
                "Embedding failed for chunk '{}': {}",
                failure.id, failure.reason
            );
        }

        let embedded_count = batch.results.len();
        let failed_count = batch.errors.len();
        self.store
            .put_embeddings(&self.workspace_id, &batch.results)
            .await?;

        if embedded_count == 0 {
            self.store
                .update_item_status(
                    &item_id,
                    EmbeddingStatus::Failed,
                    0,
                    Some("no chunk could be embedded".to_string()),
                )
                .await?;
        } else {
            self.store
                .update_item_status(&item_id, EmbeddingStatus::Completed, embedded_count, None)
                .await?;
        }

        info!(
            "Ingested '{}': {} chunks, {} embedded, {} failed",
            source.name,
            chunks.len(),
            embedded_count,
            failed_count
        );

        Ok(IngestReport {
            item_id,
            chunk_count: chunks.len(),
            embedded_count,
            failed_count,
        })
    }

    /// Ingest a batch of documents, continuing past per-document failures.
    /// Results are aligned with the input order.
    pub async fn ingest_documents(
        &mut self,
        sources: &[DocumentSource],
    ) -> Vec<Result<IngestReport>> {
        let mut results = Vec::with_capacity(sources.len());
        for source in sources {
            let result = self.ingest_document(source).await;
            if let Err(e) = &result {
                error!("Failed to ingest '{}': {}", source.name, e);
            }
            results.push(result);
        }
        results
    }

    /// Embed the query and return similarity matches joined back to their
    /// chunk content.
    pub async fn search(
        &mut self,
        query: &str,
        match_threshold: f32,
        match_count: usize,
    ) -> Result<Vec<SearchHit>> {
        let query_vector = self.generator.generate("query", query).await?;

        let matches = self
            .store
            .similarity_search(&SimilaritySearch {
                workspace_id: self.workspace_id.clone(),
                query_embedding: query_vector.embedding,
                match_threshold,
                match_count,
            })
            .await?;

        let mut hits = Vec::with_capacity(matches.len());
        for m in matches {
            match self.store.get_chunk(&m.chunk_id).await? {
                Some(chunk) => hits.push(SearchHit {
                    chunk_id: m.chunk_id,
                    document_name: chunk.metadata.document_name,
                    content: chunk.content,
                    similarity: m.similarity,
                }),
                None => warn!("Similarity match '{}' has no stored chunk", m.chunk_id),
            }
        }
        Ok(hits)
    }

    /// Run entity and relationship extraction over an ingested item's chunks
    /// and persist the results.
    pub async fn extract_knowledge(&self, item_id: &str) -> Result<KnowledgeReport> {
        let chunks = self.store.get_chunks(item_id).await?;

        let extraction = self.entity_extractor.extract_entities_from_chunks(&chunks).await;
        let relationships = self
            .relationship_extractor
            .extract_relationships(&extraction.entities)
            .await;

        self.store
            .put_entities(&self.workspace_id, &extraction.entities)
            .await?;
        self.store
            .put_relationships(&self.workspace_id, &relationships.relationships)
            .await?;

        info!(
            "Extracted {} entities and {} relationships from item '{}'",
            extraction.entities.len(),
            relationships.relationships.len(),
            item_id
        );

        Ok(KnowledgeReport {
            entities: extraction.entities,
            relationships: relationships.relationships,
            dropped_relationships: relationships.dropped,
            tokens_used: extraction.tokens_used + relationships.tokens_used,
        })
    }
}
