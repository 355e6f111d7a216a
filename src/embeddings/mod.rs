pub mod cache;
pub mod generator;
pub mod vector;

pub use cache::{CacheStats, EmbeddingCache};
pub use generator::{
    BatchEmbeddingReport, EmbeddingConfig, EmbeddingFailure, EmbeddingGenerator, EmbeddingInput,
    EmbeddingProvider, EmbeddingVector, OpenAiEmbeddingClient,
};
pub use vector::{cosine_similarity, magnitude, normalize};
