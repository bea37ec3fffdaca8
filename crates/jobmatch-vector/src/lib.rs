//! jobmatch vector crate - embedding services, refresh pipeline, vector
//! index, and the two-stage recommender.
//!
//! Provides the embedding service trait with a remote (OpenAI-compatible)
//! backend and a deterministic mock, the incremental embedding refresh
//! pipeline, an inner-product vector index with atomic persistence, and
//! candidate generation plus re-ranking over the posting store.

pub mod embedding;
pub mod index;
pub mod recommend;
pub mod refresh;

pub use embedding::{
    DynEmbeddingService, EmbeddingService, MockEmbedding, OpenAiEmbedding, RetryPolicy,
};
pub use index::{SearchHit, SharedIndex, VectorIndex};
pub use recommend::{Recommender, Reranker, SimilarityOrderReranker};
pub use refresh::{RefreshOutcome, RefreshPipeline};
