
use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::chunking::TextChunk;
use crate::embeddings::generator::EmbeddingVector;
use crate::embeddings::vector::cosine_similarity;
use crate::extraction::Entity;
use crate::extraction::relationships::EntityRelationship;
use crate::{KbError, Result};

/// Lifecycle of a knowledge base item's embeddings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingStatus {
    Pending,
    Generating,
    Completed,
    Failed,
}

impl EmbeddingStatus {
    /// Whether moving to `next` is a legal lifecycle step. Re-entering
    /// `Generating` from `Failed` is allowed so items can be re-ingested.
    #[inline]
    pub fn can_transition_to(self, next: EmbeddingStatus) -> bool {
        matches!(
            (self, next),
            (EmbeddingStatus::Pending, EmbeddingStatus::Generating)
                | (EmbeddingStatus::Generating, EmbeddingStatus::Completed)
                | (EmbeddingStatus::Generating, EmbeddingStatus::Failed)
                | (EmbeddingStatus::Failed, EmbeddingStatus::Generating)
        )
    }
}

impl fmt::Display for EmbeddingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            EmbeddingStatus::Pending => write!(f, "pending"),
            EmbeddingStatus::Generating => write!(f, "generating"),
            EmbeddingStatus::Completed => write!(f, "completed"),
            EmbeddingStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One ingested document tracked by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeBaseItem {
    pub id: String,
    pub workspace_id: String,
    pub name: String,
    pub embedding_status: EmbeddingStatus,
    pub embedding_count: usize,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl KnowledgeBaseItem {
    #[inline]
    pub fn new(workspace_id: &str, name: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            workspace_id: workspace_id.to_string(),
            name: name.to_string(),
            embedding_status: EmbeddingStatus::Pending,
            embedding_count: 0,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Parameters for a vector similarity search.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilaritySearch {
    pub workspace_id: String,
    pub query_embedding: Vec<f32>,
    /// Matches strictly below this similarity are excluded.
    pub match_threshold: f32,
    /// Maximum number of matches returned.
    pub match_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityMatch {
    pub chunk_id: String,
    pub similarity: f32,
}

/// Persistence boundary for the knowledge base. One of the three suspension
/// points in the pipeline, so backends are free to do real I/O.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    async fn create_item(&self, item: KnowledgeBaseItem) -> Result<()>;
    async fn get_item(&self, id: &str) -> Result<Option<KnowledgeBaseItem>>;
    async fn list_items(&self, workspace_id: &str) -> Result<Vec<KnowledgeBaseItem>>;

    /// Advance an item's embedding status, enforcing the lifecycle rules.
    async fn update_item_status(
        &self,
        id: &str,
        status: EmbeddingStatus,
        embedding_count: usize,
        error_message: Option<String>,
    ) -> Result<()>;

    /// Delete an item along with its chunks and embeddings.
    async fn delete_item(&self, id: &str) -> Result<()>;

    async fn put_chunks(&self, item_id: &str, chunks: &[TextChunk]) -> Result<()>;
    async fn get_chunks(&self, item_id: &str) -> Result<Vec<TextChunk>>;
    async fn get_chunk(&self, chunk_id: &str) -> Result<Option<TextChunk>>;

    async fn put_embeddings(&self, workspace_id: &str, embeddings: &[EmbeddingVector])
    -> Result<()>;
    async fn similarity_search(&self, search: &SimilaritySearch) -> Result<Vec<SimilarityMatch>>;

    async fn put_entities(&self, workspace_id: &str, entities: &[Entity]) -> Result<()>;
    async fn get_entities(&self, workspace_id: &str) -> Result<Vec<Entity>>;

    async fn put_relationships(
        &self,
        workspace_id: &str,
        relationships: &[EntityRelationship],
    ) -> Result<()>;
    async fn get_relationships(&self, workspace_id: &str) -> Result<Vec<EntityRelationship>>;
}

#[derive(Default)]
struct MemoryStoreInner {
    items: HashMap<String, KnowledgeBaseItem>,
    chunks: HashMap<String, TextChunk>,
    item_chunks: HashMap<String, Vec<String>>,
    /// chunk id -> (workspace id, vector)
    embeddings: HashMap<String, (String, Vec<f32>)>,
    entities: HashMap<String, Vec<Entity>>,
    relationships: HashMap<String, Vec<EntityRelationship>>,
}

/// In-process store used by the CLI and by tests. All state lives behind a
/// single lock; methods never hold it across an await point.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

impl MemoryStore {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner
            .read()
            .map_err(|_| KbError::Store("store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner
            .write()
            .map_err(|_| KbError::Store("store lock poisoned".to_string()))
    }
}

#[async_trait]
impl KnowledgeStore for MemoryStore {
    async fn create_item(&self, item: KnowledgeBaseItem) -> Result<()> {
        let mut inner = self.write()?;
        if inner.items.contains_key(&item.id) {
            return Err(KbError::Store(format!("item '{}' already exists", item.id)));
        }
        debug!("Creating knowledge base item '{}' ({})", item.name, item.id);
        inner.items.insert(item.id.clone(), item);
        Ok(())
    }

    async fn get_item(&self, id: &str) -> Result<Option<KnowledgeBaseItem>> {
        Ok(self.read()?.items.get(id).cloned())
    }

    async fn list_items(&self, workspace_id: &str) -> Result<Vec<KnowledgeBaseItem>> {
        let inner = self.read()?;
        let mut items: Vec<KnowledgeBaseItem> = inner
            .items
            .values()
            .filter(|i| i.workspace_id == workspace_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(items)
    }

    async fn update_item_status(
        &self,
        id: &str,
        status: EmbeddingStatus,
        embedding_count: usize,
        error_message: Option<String>,
    ) -> Result<()> {
        let mut inner = self.write()?;
        let item = inner
            .items
            .get_mut(id)
            .ok_or_else(|| KbError::Store(format!("item '{}' not found", id)))?;

        if !item.embedding_status.can_transition_to(status) {
            return Err(KbError::Store(format!(
                "invalid status transition {} -> {} for item '{}'",
                item.embedding_status, status, id
            )));
        }

        debug!(
            "Item '{}' status {} -> {} ({} embeddings)",
            id, item.embedding_status, status, embedding_count
        );
        item.embedding_status = status;
        item.embedding_count = embedding_count;
        item.error_message = error_message;
        item.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_item(&self, id: &str) -> Result<()> {
        let mut inner = self.write()?;
        if inner.items.remove(id).is_none() {
            return Err(KbError::Store(format!("item '{}' not found", id)));
        }
        if let Some(chunk_ids) = inner.item_chunks.remove(id) {
            for chunk_id in chunk_ids {
                inner.chunks.remove(&chunk_id);
                inner.embeddings.remove(&chunk_id);
            }
        }
        Ok(())
    }

    async fn put_chunks(&self, item_id: &str, chunks: &[TextChunk]) -> Result<()> {
        let mut inner = self.write()?;
        let ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();
        for chunk in chunks {
            inner.chunks.insert(chunk.id.clone(), chunk.clone());
        }
        inner.item_chunks.insert(item_id.to_string(), ids);
        Ok(())
    }

    async fn get_chunks(&self, item_id: &str) -> Result<Vec<TextChunk>> {
        let inner = self.read()?;
        let ids = inner.item_chunks.get(item_id).cloned().unwrap_or_default();
        Ok(ids
            .iter()
            .filter_map(|id| inner.chunks.get(id).cloned())
            .collect())
    }

    async fn get_chunk(&self, chunk_id: &str) -> Result<Option<TextChunk>> {
        Ok(self.read()?.chunks.get(chunk_id).cloned())
    }

    async fn put_embeddings(
        &self,
        workspace_id: &str,
        embeddings: &[EmbeddingVector],
    ) -> Result<()> {
        let mut inner = self.write()?;
        for embedding in embeddings {
            inner.embeddings.insert(
                embedding.id.clone(),
                (workspace_id.to_string(), embedding.embedding.clone()),
            );
        }
        Ok(())
    }

    async fn similarity_search(&self, search: &SimilaritySearch) -> Result<Vec<SimilarityMatch>> {
        let inner = self.read()?;
        let mut matches = Vec::new();

        for (chunk_id, (workspace_id, embedding)) in &inner.embeddings {
            if workspace_id != &search.workspace_id {
                continue;
            }
            match cosine_similarity(&search.query_embedding, embedding) {
                Ok(similarity) if similarity >= search.match_threshold => {
                    matches.push(SimilarityMatch {
                        chunk_id: chunk_id.clone(),
                        similarity,
                    });
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("Skipping embedding for chunk '{}': {}", chunk_id, e);
                }
            }
        }

        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        matches.truncate(search.match_count);
        Ok(matches)
    }

    async fn put_entities(&self, workspace_id: &str, entities: &[Entity]) -> Result<()> {
        let mut inner = self.write()?;
        inner
            .entities
            .entry(workspace_id.to_string())
            .or_default()
            .extend(entities.iter().cloned());
        Ok(())
    }

    async fn get_entities(&self, workspace_id: &str) -> Result<Vec<Entity>> {
        Ok(self
            .read()?
            .entities
            .get(workspace_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn put_relationships(
        &self,
        workspace_id: &str,
        relationships: &[EntityRelationship],
    ) -> Result<()> {
        let mut inner = self.write()?;
        inner
            .relationships
            .entry(workspace_id.to_string())
            .or_default()
            .extend(relationships.iter().cloned());
        Ok(())
    }

    async fn get_relationships(&self, workspace_id: &str) -> Result<Vec<EntityRelationship>> {
        Ok(self
            .read()?
            .relationships
            .get(workspace_id)
            .cloned()
            .unwrap_or_default())
    }
}
