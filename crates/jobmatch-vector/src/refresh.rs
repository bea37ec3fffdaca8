//! Incremental embedding refresh pipeline.
//!
//! Drains postings that lack an embedding, calls the embedding service for
//! each, and writes results back in bounded transactions. One posting's
//! failure never aborts the run: failed postings simply stay unembedded and
//! are picked up by a later run. Safe to re-run at any time; concurrent runs
//! against the same store must be serialized by the caller.

use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{info, warn};

use jobmatch_core::cancel::CancelToken;
use jobmatch_core::error::{JobMatchError, Result};
use jobmatch_core::types::{Embedding, Posting, PostingId};
use jobmatch_storage::PostingStore;

use crate::embedding::DynEmbeddingService;

/// Counters reported by a refresh run.
///
/// `processed` counts only postings whose embedding was durably committed
/// during this run. `failed` counts postings skipped because their
/// embedding call or their commit failed; all of them remain unembedded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshOutcome {
    pub processed: usize,
    pub failed: usize,
}

/// The embedding refresh pipeline.
///
/// Embedding calls within a batch run concurrently on a bounded worker
/// pool; commits are issued serially from this task, preserving the
/// `commit_every` durability contract.
pub struct RefreshPipeline {
    store: Arc<dyn PostingStore>,
    embedder: Arc<dyn DynEmbeddingService>,
    workers: usize,
}

impl RefreshPipeline {
    pub fn new(
        store: Arc<dyn PostingStore>,
        embedder: Arc<dyn DynEmbeddingService>,
        workers: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            workers: workers.max(1),
        }
    }

    /// Embed every posting currently lacking an embedding.
    ///
    /// `batch_size` bounds how many postings are fetched and held in memory
    /// at once; `commit_every` bounds how many successful embeddings may be
    /// lost to a crash. Scans advance past everything fetched (keyset), so
    /// failing postings cannot stall the run; the fetch coming back empty
    /// terminates it. Cancellation is checked between batches and never
    /// rolls back committed progress.
    pub async fn run(
        &self,
        batch_size: usize,
        commit_every: usize,
        cancel: &CancelToken,
    ) -> Result<RefreshOutcome> {
        if batch_size == 0 {
            return Err(JobMatchError::Config(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if commit_every == 0 {
            return Err(JobMatchError::Config(
                "commit_every must be at least 1".to_string(),
            ));
        }

        let mut outcome = RefreshOutcome::default();
        let mut after_id: PostingId = 0;

        loop {
            if cancel.is_cancelled() {
                info!(
                    processed = outcome.processed,
                    "Refresh cancelled; committed progress is retained"
                );
                break;
            }

            let batch = self.store.scan_unembedded(after_id, batch_size)?;
            let Some(last) = batch.last() else {
                break;
            };
            after_id = last.id;

            let (embedded, embed_failures) = self.embed_batch(&batch).await;
            outcome.failed += embed_failures;

            for chunk in embedded.chunks(commit_every) {
                match self.store.update_embeddings(chunk) {
                    Ok(()) => {
                        outcome.processed += chunk.len();
                        info!(processed = outcome.processed, "Embedding refresh progress");
                    }
                    Err(e) => {
                        // Only this chunk rolled back; earlier commits stand
                        // and the affected postings stay unembedded.
                        outcome.failed += chunk.len();
                        warn!(error = %e, rows = chunk.len(), "Commit failed; skipping batch");
                    }
                }
            }
        }

        info!(
            processed = outcome.processed,
            failed = outcome.failed,
            "Embedding refresh finished"
        );
        Ok(outcome)
    }

    /// Embed one fetched batch with at most `self.workers` calls in flight.
    ///
    /// Returns successes sorted by posting id (deterministic commit order)
    /// and the count of per-record failures.
    async fn embed_batch(&self, batch: &[Posting]) -> (Vec<(PostingId, Embedding)>, usize) {
        let mut results: Vec<(PostingId, Embedding)> = Vec::with_capacity(batch.len());
        let mut failed = 0usize;
        let mut tasks: JoinSet<(PostingId, Result<Vec<f32>>)> = JoinSet::new();

        for posting in batch {
            while tasks.len() >= self.workers {
                if let Some(joined) = tasks.join_next().await {
                    collect(joined, &mut results, &mut failed);
                }
            }

            let embedder = Arc::clone(&self.embedder);
            let id = posting.id;
            let text = posting.embedding_text();
            tasks.spawn(async move {
                let result = embedder.embed_boxed(&text).await;
                (id, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            collect(joined, &mut results, &mut failed);
        }

        results.sort_unstable_by_key(|(id, _)| *id);
        (results, failed)
    }
}

fn collect(
    joined: std::result::Result<(PostingId, Result<Vec<f32>>), tokio::task::JoinError>,
    results: &mut Vec<(PostingId, Embedding)>,
    failed: &mut usize,
) {
    match joined {
        Ok((id, Ok(vector))) => results.push((id, Embedding::new(vector))),
        Ok((id, Err(e))) => {
            *failed += 1;
            warn!(posting_id = id, error = %e, "Embedding failed; posting stays unembedded");
        }
        Err(e) => {
            *failed += 1;
            warn!(error = %e, "Embedding task panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use jobmatch_core::error::JobMatchError;
    use jobmatch_storage::{Database, PostingRepository};

    use crate::embedding::{EmbeddingService, MockEmbedding};

    /// Embedding service that fails for any text containing "poison".
    struct PoisonEmbedding {
        inner: MockEmbedding,
    }

    impl PoisonEmbedding {
        fn new() -> Self {
            Self {
                inner: MockEmbedding::new(),
            }
        }
    }

    impl EmbeddingService for PoisonEmbedding {
        async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, JobMatchError> {
            if text.contains("poison") {
                return Err(JobMatchError::Embedding("simulated failure".to_string()));
            }
            self.inner.embed(text).await
        }

        fn dimensions(&self) -> usize {
            EmbeddingService::dimensions(&self.inner)
        }
    }

    /// Store whose nth `update_embeddings` call fails, everything else
    /// delegating to a real repository.
    struct FlakyStore {
        inner: PostingRepository,
        commits: AtomicUsize,
        fail_on_commit: usize,
    }

    impl FlakyStore {
        fn new(inner: PostingRepository, fail_on_commit: usize) -> Self {
            Self {
                inner,
                commits: AtomicUsize::new(0),
                fail_on_commit,
            }
        }
    }

    impl PostingStore for FlakyStore {
        fn scan_unembedded(
            &self,
            after_id: PostingId,
            limit: usize,
        ) -> std::result::Result<Vec<Posting>, JobMatchError> {
            self.inner.scan_unembedded(after_id, limit)
        }

        fn scan_embedded_page(
            &self,
            after_id: PostingId,
            limit: usize,
        ) -> std::result::Result<Vec<Posting>, JobMatchError> {
            self.inner.scan_embedded_page(after_id, limit)
        }

        fn get_by_id(
            &self,
            id: PostingId,
        ) -> std::result::Result<Option<Posting>, JobMatchError> {
            self.inner.get_by_id(id)
        }

        fn get_by_ids(
            &self,
            ids: &[PostingId],
        ) -> std::result::Result<Vec<Posting>, JobMatchError> {
            self.inner.get_by_ids(ids)
        }

        fn update_embeddings(
            &self,
            batch: &[(PostingId, Embedding)],
        ) -> std::result::Result<(), JobMatchError> {
            let call = self.commits.fetch_add(1, Ordering::SeqCst) + 1;
            if call == self.fail_on_commit {
                return Err(JobMatchError::Storage("simulated commit failure".to_string()));
            }
            self.inner.update_embeddings(batch)
        }

        fn count(&self) -> std::result::Result<u64, JobMatchError> {
            self.inner.count()
        }

        fn count_embedded(&self) -> std::result::Result<u64, JobMatchError> {
            self.inner.count_embedded()
        }
    }

    fn repo_with_postings(titles: &[&str]) -> Arc<PostingRepository> {
        let repo = PostingRepository::new(Arc::new(Database::in_memory().unwrap()));
        for (i, title) in titles.iter().enumerate() {
            repo.insert(&Posting {
                job_id: Some(format!("job-{}", i)),
                title: Some(title.to_string()),
                description: Some(format!("Description for {}", title)),
                ..Default::default()
            })
            .unwrap();
        }
        Arc::new(repo)
    }

    fn pipeline(store: Arc<dyn PostingStore>) -> RefreshPipeline {
        RefreshPipeline::new(store, Arc::new(MockEmbedding::new()), 2)
    }

    #[tokio::test]
    async fn test_refresh_processes_all_postings() {
        let repo = repo_with_postings(&["a", "b", "c", "d", "e"]);
        let p = pipeline(repo.clone());

        let outcome = p.run(2, 2, &CancelToken::new()).await.unwrap();
        assert_eq!(outcome.processed, 5);
        assert_eq!(outcome.failed, 0);
        assert_eq!(repo.count_embedded().unwrap(), 5);
    }

    #[tokio::test]
    async fn test_refresh_is_idempotent() {
        let repo = repo_with_postings(&["a", "b", "c"]);
        let p = pipeline(repo.clone());

        let first = p.run(10, 10, &CancelToken::new()).await.unwrap();
        assert_eq!(first.processed, 3);

        let second = p.run(10, 10, &CancelToken::new()).await.unwrap();
        assert_eq!(second.processed, 0);
        assert_eq!(second.failed, 0);
    }

    #[tokio::test]
    async fn test_single_record_failure_does_not_abort_batch() {
        // Five postings; the third one's text trips the embedder.
        let repo = repo_with_postings(&["one", "two", "poison three", "four", "five"]);
        let p = RefreshPipeline::new(repo.clone(), Arc::new(PoisonEmbedding::new()), 2);

        let outcome = p.run(5, 5, &CancelToken::new()).await.unwrap();
        assert_eq!(outcome.processed, 4);
        assert_eq!(outcome.failed, 1);
        assert_eq!(repo.count_embedded().unwrap(), 4);

        let remaining = repo.scan_unembedded(0, 10).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].title.as_deref(), Some("poison three"));

        // A later run with a working embedder picks it up.
        let retry = pipeline(repo.clone());
        let outcome = retry.run(5, 5, &CancelToken::new()).await.unwrap();
        assert_eq!(outcome.processed, 1);
        assert_eq!(repo.count_embedded().unwrap(), 5);
    }

    #[tokio::test]
    async fn test_commit_failure_drops_only_in_flight_chunk() {
        let repo = PostingRepository::new(Arc::new(Database::in_memory().unwrap()));
        for i in 0..4 {
            repo.insert(&Posting {
                job_id: Some(format!("job-{}", i)),
                title: Some(format!("Title {}", i)),
                ..Default::default()
            })
            .unwrap();
        }
        let flaky = Arc::new(FlakyStore::new(repo, 1));
        let p = pipeline(flaky.clone());

        // Four successes, committed in chunks of two; the first commit fails.
        let outcome = p.run(4, 2, &CancelToken::new()).await.unwrap();
        assert_eq!(outcome.processed, 2);
        assert_eq!(outcome.failed, 2);
        assert_eq!(flaky.count_embedded().unwrap(), 2);

        // The dropped chunk is still unembedded and a rerun completes it.
        let outcome = p.run(4, 2, &CancelToken::new()).await.unwrap();
        assert_eq!(outcome.processed, 2);
        assert_eq!(flaky.count_embedded().unwrap(), 4);
    }

    #[tokio::test]
    async fn test_empty_text_counts_as_failure() {
        let repo = PostingRepository::new(Arc::new(Database::in_memory().unwrap()));
        repo.insert(&Posting {
            job_id: Some("has-text".to_string()),
            title: Some("Engineer".to_string()),
            ..Default::default()
        })
        .unwrap();
        repo.insert(&Posting {
            job_id: Some("no-text".to_string()),
            ..Default::default()
        })
        .unwrap();
        let repo = Arc::new(repo);

        let p = pipeline(repo.clone());
        let outcome = p.run(10, 10, &CancelToken::new()).await.unwrap();
        assert_eq!(outcome.processed, 1);
        assert_eq!(outcome.failed, 1);
    }

    #[tokio::test]
    async fn test_refresh_rejects_invalid_arguments() {
        let repo = repo_with_postings(&["a"]);
        let p = pipeline(repo);

        assert!(matches!(
            p.run(0, 1, &CancelToken::new()).await,
            Err(JobMatchError::Config(_))
        ));
        assert!(matches!(
            p.run(1, 0, &CancelToken::new()).await,
            Err(JobMatchError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_refresh_cancellation_stops_before_work() {
        let repo = repo_with_postings(&["a", "b"]);
        let p = pipeline(repo.clone());

        let cancel = CancelToken::new();
        cancel.cancel();

        let outcome = p.run(10, 10, &cancel).await.unwrap();
        assert_eq!(outcome.processed, 0);
        assert_eq!(repo.count_embedded().unwrap(), 0);
    }
}
