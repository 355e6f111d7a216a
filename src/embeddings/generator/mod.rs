
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::chunking::estimate_token_count;
use crate::embeddings::cache::EmbeddingCache;
use crate::{KbError, Result};

/// Maximum number of texts sent to the embedding service in one call.
const MAX_SERVICE_BATCH: usize = 100;
/// Approximate characters per token, used for truncation budgets.
const CHARS_PER_TOKEN: usize = 4;

/// A fixed-dimensional vector representing text semantics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingVector {
    pub id: String,
    pub embedding: Vec<f32>,
    pub token_count: usize,
    pub model: String,
}

/// One text to embed, keyed by caller-supplied id (typically a chunk id).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingInput {
    pub id: String,
    pub text: String,
}

/// A per-input failure recorded in a batch report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingFailure {
    pub id: String,
    pub reason: String,
}

/// Best-effort result of a batch embedding run: partial success with
/// explicit per-input failure accounting.
#[derive(Debug, Clone)]
pub struct BatchEmbeddingReport {
    pub results: Vec<EmbeddingVector>,
    pub errors: Vec<EmbeddingFailure>,
    pub total_tokens: u64,
    pub processing_time: Duration,
    pub estimated_cost: f64,
}

/// Configuration for embedding generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model: String,
    /// Expected vector dimensionality for the model
    pub dimension: u32,
    /// Inputs estimated above this are truncated, not rejected
    pub max_input_tokens: usize,
    pub max_retries: u32,
    /// Base delay for linear retry backoff (`delay * attempt`)
    pub retry_delay_ms: u64,
    pub cost_per_1k_tokens: f64,
}

impl Default for EmbeddingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            model: "text-embedding-3-small".to_string(),
            dimension: 1536,
            max_input_tokens: 8192,
            max_retries: 3,
            retry_delay_ms: 1000,
            cost_per_1k_tokens: 0.00002,
        }
    }
}

/// External embedding service boundary. The only suspension point in the
/// embedding pipeline.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed up to [`MAX_SERVICE_BATCH`] texts, returning one vector per
    /// input in the same order.
    async fn embed(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbedDatum {
    index: usize,
    embedding: Vec<f32>,
}

/// Embedding client for OpenAI-compatible `/embeddings` endpoints.
#[derive(Debug, Clone)]
pub struct OpenAiEmbeddingClient {
    base_url: Url,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiEmbeddingClient {
    #[inline]
    pub fn new(base_url: Url, api_key: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| KbError::Embedding(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url,
            api_key,
            client,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingClient {
    async fn embed(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = self
            .base_url
            .join("embeddings")
            .map_err(|e| KbError::Embedding(format!("Failed to build embeddings URL: {}", e)))?;

        debug!("Requesting {} embeddings from {}", texts.len(), url);

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&EmbedRequest { model, input: texts })
            .send()
            .await
            .map_err(|e| KbError::Embedding(format!("Embedding request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(KbError::Embedding(format!(
                "Embedding service returned {}: {}",
                status, body
            )));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| KbError::Embedding(format!("Failed to parse embedding response: {}", e)))?;

        if parsed.data.len() != texts.len() {
            return Err(KbError::Embedding(format!(
                "Embedding count mismatch: requested {}, received {}",
                texts.len(),
                parsed.data.len()
            )));
        }

        let mut data = parsed.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

/// Generates embeddings through a provider, consulting a bounded TTL cache
/// before every service call.
pub struct EmbeddingGenerator {
    provider: Arc<dyn EmbeddingProvider>,
    cache: EmbeddingCache,
    config: EmbeddingConfig,
}

impl EmbeddingGenerator {
    #[inline]
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: EmbeddingConfig) -> Self {
        Self {
            provider,
            cache: EmbeddingCache::default(),
            config,
        }
    }

    #[inline]
    pub fn with_cache(mut self, cache: EmbeddingCache) -> Self {
        self.cache = cache;
        self
    }

    #[inline]
    pub fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }

    #[inline]
    pub fn config(&self) -> &EmbeddingConfig {
        &self.config
    }

    /// Truncate text to the model's input budget. Truncation, not rejection,
    /// is the policy for oversized inputs.
    fn truncate_to_budget<'a>(&self, text: &'a str) -> std::borrow::Cow<'a, str> {
        let estimate = estimate_token_count(text);
        if estimate <= self.config.max_input_tokens {
            return std::borrow::Cow::Borrowed(text);
        }

        let budget = self.config.max_input_tokens * CHARS_PER_TOKEN;
        warn!(
            "Truncating embedding input from ~{} to {} tokens",
            estimate, self.config.max_input_tokens
        );
        std::borrow::Cow::Owned(text.chars().take(budget).collect())
    }

    /// Generate a single embedding, using the cache when possible.
    #[inline]
    pub async fn generate(&mut self, id: &str, text: &str) -> Result<EmbeddingVector> {
        let text = self.truncate_to_budget(text);
        let token_count = estimate_token_count(&text);

        if let Some(embedding) = self.cache.get(&text, &self.config.model) {
            debug!("Embedding cache hit for input '{}'", id);
            return Ok(EmbeddingVector {
                id: id.to_string(),
                embedding,
                token_count,
                model: self.config.model.clone(),
            });
        }

        let texts = vec![text.clone().into_owned()];
        let mut embeddings = self.embed_with_retry(&texts).await?;
        let embedding = embeddings
            .pop()
            .ok_or_else(|| KbError::Embedding("Embedding service returned no vector".to_string()))?;

        self.cache.set(&text, &self.config.model, embedding.clone());

        Ok(EmbeddingVector {
            id: id.to_string(),
            embedding,
            token_count,
            model: self.config.model.clone(),
        })
    }

    /// Generate embeddings for a batch of inputs.
    ///
    /// Empty inputs are rejected up front without a service call. Remaining
    /// inputs are grouped into sub-batches of at most 100 and processed
    /// sequentially; a sub-batch that exhausts its retries records an error
    /// for each of its inputs while other sub-batches proceed, so the report
    /// is always a best-effort partial result.
    #[inline]
    pub async fn generate_batch(&mut self, inputs: &[EmbeddingInput]) -> BatchEmbeddingReport {
        let started = Instant::now();
        let mut slots: Vec<Option<EmbeddingVector>> = vec![None; inputs.len()];
        let mut errors = Vec::new();
        let mut total_tokens: u64 = 0;

        // Pre-pass: reject empty inputs and resolve cache hits.
        let mut pending: Vec<(usize, String)> = Vec::new();
        for (i, input) in inputs.iter().enumerate() {
            if input.text.trim().is_empty() {
                errors.push(EmbeddingFailure {
                    id: input.id.clone(),
                    reason: "Empty text content".to_string(),
                });
                continue;
            }

            let text = self.truncate_to_budget(&input.text).into_owned();
            if let Some(embedding) = self.cache.get(&text, &self.config.model) {
                slots[i] = Some(EmbeddingVector {
                    id: input.id.clone(),
                    embedding,
                    token_count: estimate_token_count(&text),
                    model: self.config.model.clone(),
                });
            } else {
                pending.push((i, text));
            }
        }

        // Sub-batches run sequentially to keep retry backoff and cost
        // accounting deterministic.
        for sub_batch in pending.chunks(MAX_SERVICE_BATCH) {
            let texts: Vec<String> = sub_batch.iter().map(|(_, t)| t.clone()).collect();

            match self.embed_with_retry(&texts).await {
                Ok(embeddings) => {
                    for ((slot, text), embedding) in sub_batch.iter().zip(embeddings) {
                        let token_count = estimate_token_count(text);
                        total_tokens += token_count as u64;
                        self.cache.set(text, &self.config.model, embedding.clone());
                        slots[*slot] = Some(EmbeddingVector {
                            id: inputs[*slot].id.clone(),
                            embedding,
                            token_count,
                            model: self.config.model.clone(),
                        });
                    }
                }
                Err(e) => {
                    warn!(
                        "Embedding sub-batch of {} inputs failed after retries: {}",
                        sub_batch.len(),
                        e
                    );
                    for (slot, _) in sub_batch {
                        errors.push(EmbeddingFailure {
                            id: inputs[*slot].id.clone(),
                            reason: e.to_string(),
                        });
                    }
                }
            }
        }

        let results: Vec<EmbeddingVector> = slots.into_iter().flatten().collect();
        let estimated_cost = total_tokens as f64 / 1000.0 * self.config.cost_per_1k_tokens;

        debug!(
            "Batch embedding run: {} succeeded, {} failed, ~{} tokens",
            results.len(),
            errors.len(),
            total_tokens
        );

        BatchEmbeddingReport {
            results,
            errors,
            total_tokens,
            processing_time: started.elapsed(),
            estimated_cost,
        }
    }

    /// Call the provider with bounded, linearly increasing retry delays.
    async fn embed_with_retry(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut last_error = None;

        for attempt in 1..=self.config.max_retries.max(1) {
            match self.provider.embed(&self.config.model, texts).await {
                Ok(embeddings) => return Ok(embeddings),
                Err(e) => {
                    warn!(
                        "Embedding call failed (attempt {}/{}): {}",
                        attempt, self.config.max_retries, e
                    );
                    last_error = Some(e);

                    if attempt < self.config.max_retries {
                        let delay =
                            Duration::from_millis(self.config.retry_delay_ms * u64::from(attempt));
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| KbError::Embedding("Embedding call failed".to_string())))
    }
}
