//! Two-stage recommendation over the posting corpus.
//!
//! Stage 1 embeds an input document (e.g. a resume) and pulls candidates
//! from the vector index. Stage 2 fetches the candidates' full postings and
//! hands them to a [`Reranker`], the extension point for richer scoring
//! (cross-encoding, attribute filters). The default reranker keeps the
//! similarity order and drops nothing.

use std::sync::Arc;

use tracing::debug;

use jobmatch_core::error::{JobMatchError, Result};
use jobmatch_core::types::{Posting, PostingId};
use jobmatch_storage::PostingStore;

use crate::embedding::{DynEmbeddingService, EmbeddingService};
use crate::index::{SearchHit, SharedIndex};

/// Second-stage scoring over a candidate shortlist.
///
/// Implementations must produce a deterministic total order (equal scores
/// tie-break on ascending id) and must not drop candidates except through a
/// documented filter.
pub trait Reranker: Send + Sync {
    fn rerank(
        &self,
        document: &str,
        candidates: &[SearchHit],
        postings: &[Posting],
    ) -> Result<Vec<SearchHit>>;
}

/// Default reranker: passes the first-stage similarity order through
/// unchanged (score descending, ascending id on ties). Applies no filter.
#[derive(Debug, Clone, Default)]
pub struct SimilarityOrderReranker;

impl Reranker for SimilarityOrderReranker {
    fn rerank(
        &self,
        _document: &str,
        candidates: &[SearchHit],
        _postings: &[Posting],
    ) -> Result<Vec<SearchHit>> {
        let mut ranked = candidates.to_vec();
        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(ranked)
    }
}

/// Orchestrates candidate generation and re-ranking.
pub struct Recommender {
    embedder: Box<dyn DynEmbeddingService>,
    index: SharedIndex,
    store: Arc<dyn PostingStore>,
    reranker: Box<dyn Reranker>,
    candidate_k: usize,
}

impl Recommender {
    /// Create a recommender with the default similarity-order reranker.
    pub fn new(
        embedder: impl EmbeddingService + 'static,
        index: SharedIndex,
        store: Arc<dyn PostingStore>,
        candidate_k: usize,
    ) -> Self {
        Self::with_reranker(
            embedder,
            index,
            store,
            candidate_k,
            Box::new(SimilarityOrderReranker),
        )
    }

    /// Create a recommender with a custom second-stage reranker.
    pub fn with_reranker(
        embedder: impl EmbeddingService + 'static,
        index: SharedIndex,
        store: Arc<dyn PostingStore>,
        candidate_k: usize,
        reranker: Box<dyn Reranker>,
    ) -> Self {
        Self {
            embedder: Box::new(embedder),
            index,
            store,
            reranker,
            candidate_k: candidate_k.max(1),
        }
    }

    /// Stage 1: embed the document and pull the top `k` candidates from the
    /// vector index.
    ///
    /// An embedding failure is fatal for this call (`EmbeddingUnavailable`)
    /// and yields no partial result; it affects no shared state.
    pub async fn generate_candidates(&self, document: &str, k: usize) -> Result<Vec<SearchHit>> {
        let vector = self
            .embedder
            .embed_boxed(document)
            .await
            .map_err(|e| JobMatchError::EmbeddingUnavailable(e.to_string()))?;

        self.index.query(&vector, k)
    }

    /// Stage 2: fetch the candidates' postings and delegate to the
    /// reranker. An empty candidate list is a no-op, not an error.
    pub fn rerank(&self, document: &str, candidates: &[SearchHit]) -> Result<Vec<SearchHit>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<PostingId> = candidates.iter().map(|hit| hit.id).collect();
        let postings = self.store.get_by_ids(&ids)?;
        debug!(
            candidates = candidates.len(),
            fetched = postings.len(),
            "Re-ranking candidates"
        );

        self.reranker.rerank(document, candidates, &postings)
    }

    /// End-to-end recommendation: candidate generation, then re-ranking.
    pub async fn recommend(&self, document: &str) -> Result<Vec<SearchHit>> {
        let candidates = self
            .generate_candidates(document, self.candidate_k)
            .await?;
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        self.rerank(document, &candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use jobmatch_core::cancel::CancelToken;
    use jobmatch_storage::{Database, PostingRepository};

    use crate::embedding::MockEmbedding;
    use crate::index::VectorIndex;
    use crate::refresh::RefreshPipeline;

    /// Embedding service that always fails.
    struct UnavailableEmbedding;

    impl EmbeddingService for UnavailableEmbedding {
        async fn embed(&self, _text: &str) -> std::result::Result<Vec<f32>, JobMatchError> {
            Err(JobMatchError::Embedding("endpoint down".to_string()))
        }

        fn dimensions(&self) -> usize {
            384
        }
    }

    /// Reranker that orders by ascending id, ignoring scores.
    struct IdOrderReranker;

    impl Reranker for IdOrderReranker {
        fn rerank(
            &self,
            _document: &str,
            candidates: &[SearchHit],
            _postings: &[Posting],
        ) -> Result<Vec<SearchHit>> {
            let mut ranked = candidates.to_vec();
            ranked.sort_by_key(|hit| hit.id);
            Ok(ranked)
        }
    }

    /// A store with embedded postings and a built shared index.
    async fn fixture() -> (Arc<PostingRepository>, SharedIndex) {
        let repo = Arc::new(PostingRepository::new(Arc::new(
            Database::in_memory().unwrap(),
        )));
        for (job, title) in [
            ("j1", "Rust systems engineer"),
            ("j2", "Frontend developer"),
            ("j3", "Database administrator"),
        ] {
            repo.insert(&Posting {
                job_id: Some(job.to_string()),
                title: Some(title.to_string()),
                description: Some(format!("{} role description", title)),
                ..Default::default()
            })
            .unwrap();
        }

        let pipeline = RefreshPipeline::new(repo.clone(), Arc::new(MockEmbedding::new()), 2);
        pipeline.run(10, 10, &CancelToken::new()).await.unwrap();

        let shared = SharedIndex::new();
        shared
            .install(VectorIndex::build_from_store(repo.as_ref(), 10, &CancelToken::new()).unwrap())
            .unwrap();
        (repo, shared)
    }

    #[tokio::test]
    async fn test_recommend_returns_ranked_hits() {
        let (repo, shared) = fixture().await;
        let recommender = Recommender::new(MockEmbedding::new(), shared, repo, 2);

        let hits = recommender.recommend("rust systems resume").await.unwrap();
        assert_eq!(hits.len(), 2);
        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test]
    async fn test_recommend_embedding_failure_is_fatal_and_partial_free() {
        let (repo, shared) = fixture().await;
        let recommender = Recommender::new(UnavailableEmbedding, shared, repo, 5);

        let result = recommender.recommend("any resume").await;
        assert!(matches!(
            result,
            Err(JobMatchError::EmbeddingUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_generate_candidates_unbuilt_index() {
        let repo = Arc::new(PostingRepository::new(Arc::new(
            Database::in_memory().unwrap(),
        )));
        let recommender = Recommender::new(MockEmbedding::new(), SharedIndex::new(), repo, 5);

        let result = recommender.generate_candidates("resume", 5).await;
        assert!(matches!(result, Err(JobMatchError::IndexNotBuilt)));
    }

    #[tokio::test]
    async fn test_rerank_empty_candidates_is_noop() {
        let (repo, shared) = fixture().await;
        let recommender = Recommender::new(MockEmbedding::new(), shared, repo, 5);

        let ranked = recommender.rerank("resume", &[]).unwrap();
        assert!(ranked.is_empty());
    }

    #[tokio::test]
    async fn test_rerank_keeps_all_candidates() {
        let (repo, shared) = fixture().await;
        let recommender = Recommender::new(MockEmbedding::new(), shared, repo, 3);

        let candidates = recommender
            .generate_candidates("generic resume text", 3)
            .await
            .unwrap();
        let ranked = recommender.rerank("generic resume text", &candidates).unwrap();
        assert_eq!(ranked.len(), candidates.len());

        let mut expected: Vec<PostingId> = candidates.iter().map(|h| h.id).collect();
        let mut got: Vec<PostingId> = ranked.iter().map(|h| h.id).collect();
        expected.sort_unstable();
        got.sort_unstable();
        assert_eq!(got, expected);
    }

    #[tokio::test]
    async fn test_custom_reranker_is_used() {
        let (repo, shared) = fixture().await;
        let recommender = Recommender::with_reranker(
            MockEmbedding::new(),
            shared,
            repo,
            3,
            Box::new(IdOrderReranker),
        );

        let ranked = recommender.recommend("resume").await.unwrap();
        let ids: Vec<PostingId> = ranked.iter().map(|h| h.id).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
    }

    #[tokio::test]
    async fn test_similarity_order_reranker_tiebreaks_on_id() {
        let reranker = SimilarityOrderReranker;
        let candidates = vec![
            SearchHit { id: 7, score: 0.5 },
            SearchHit { id: 3, score: 0.5 },
            SearchHit { id: 1, score: 0.9 },
        ];
        let ranked = reranker.rerank("doc", &candidates, &[]).unwrap();
        let ids: Vec<PostingId> = ranked.iter().map(|h| h.id).collect();
        assert_eq!(ids, vec![1, 3, 7]);
    }

    #[tokio::test]
    async fn test_stage_one_respects_k() {
        let (repo, shared) = fixture().await;
        let recommender = Recommender::new(MockEmbedding::new(), shared, repo, 5);

        let candidates = recommender.generate_candidates("resume", 1).await.unwrap();
        assert_eq!(candidates.len(), 1);

        // More than the corpus size returns the whole corpus.
        let candidates = recommender.generate_candidates("resume", 50).await.unwrap();
        assert_eq!(candidates.len(), 3);
    }
}
