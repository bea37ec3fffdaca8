//! Vector index over normalized posting embeddings.
//!
//! The index is derived data: built from the record store in one pass,
//! queried with inner-product similarity, persisted as a self-describing
//! artifact, and replaced wholesale on rebuild. Exact brute-force search —
//! O(n) per query — which keeps the contract simple and is fast enough for
//! corpora in the hundreds of thousands.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::info;

use jobmatch_core::cancel::CancelToken;
use jobmatch_core::error::JobMatchError;
use jobmatch_core::types::PostingId;
use jobmatch_storage::PostingStore;

/// Artifact format version. Bump on any incompatible layout change.
const FORMAT_VERSION: u32 = 1;

/// A single hit returned from a similarity query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// The posting the vector belongs to.
    pub id: PostingId,
    /// Cosine similarity (inner product of unit vectors), in [-1, 1].
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    id: PostingId,
    vector: Vec<f32>,
}

/// On-disk representation. Self-describing: dimension and count are
/// readable without touching the record store.
#[derive(Debug, Serialize, Deserialize)]
struct IndexArtifact {
    version: u32,
    dimension: usize,
    count: usize,
    built_at: String,
    entries: Vec<IndexEntry>,
}

/// An immutable similarity index over L2-normalized embeddings.
///
/// Immutability is what makes the concurrency story trivial: queries need
/// no locking, and a rebuild produces a fresh instance that [`SharedIndex`]
/// swaps in atomically.
#[derive(Debug)]
pub struct VectorIndex {
    dimension: usize,
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    /// Build an index from every embedded posting in the store.
    ///
    /// Streams the corpus in pages of `page_size` so large corpora never
    /// materialize fully. Fails with `EmptyCorpus` when no embedded posting
    /// exists, `DimensionMismatch` when embeddings disagree on length, and
    /// `DegenerateVector` when a stored embedding has zero norm. The
    /// cancellation token is checked between pages.
    pub fn build_from_store(
        store: &dyn PostingStore,
        page_size: usize,
        cancel: &CancelToken,
    ) -> Result<Self, JobMatchError> {
        if page_size == 0 {
            return Err(JobMatchError::Config(
                "page_size must be at least 1".to_string(),
            ));
        }

        let mut dimension: Option<usize> = None;
        let mut entries: Vec<IndexEntry> = Vec::new();
        let mut after_id: PostingId = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(JobMatchError::Cancelled);
            }

            let page = store.scan_embedded_page(after_id, page_size)?;
            if page.is_empty() {
                break;
            }
            after_id = page.last().map(|p| p.id).unwrap_or(after_id);

            for posting in page {
                let embedding = posting.embedding.as_ref().ok_or_else(|| {
                    JobMatchError::Storage(format!(
                        "Embedded scan returned posting {} without an embedding",
                        posting.id
                    ))
                })?;

                let expected = *dimension.get_or_insert(embedding.dim());
                if embedding.dim() != expected {
                    return Err(JobMatchError::DimensionMismatch {
                        expected,
                        actual: embedding.dim(),
                    });
                }

                let vector = l2_normalize(embedding.as_slice()).ok_or_else(|| {
                    JobMatchError::DegenerateVector(format!("posting {}", posting.id))
                })?;

                entries.push(IndexEntry {
                    id: posting.id,
                    vector,
                });
            }
        }

        let dimension = dimension.ok_or(JobMatchError::EmptyCorpus)?;
        info!(count = entries.len(), dimension, "Vector index built");

        Ok(Self { dimension, entries })
    }

    /// Find the top `k` postings by cosine similarity to `vector`.
    ///
    /// The query vector is normalized before comparison. Results are sorted
    /// by descending score; equal scores tie-break on ascending id. Fewer
    /// than `k` entries in the index returns all of them.
    pub fn query(&self, vector: &[f32], k: usize) -> Result<Vec<SearchHit>, JobMatchError> {
        if k == 0 {
            return Err(JobMatchError::Search("k must be at least 1".to_string()));
        }
        if vector.len() != self.dimension {
            return Err(JobMatchError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        let query = l2_normalize(vector)
            .ok_or_else(|| JobMatchError::DegenerateVector("query vector".to_string()))?;

        let mut hits: Vec<SearchHit> = self
            .entries
            .iter()
            .map(|entry| SearchHit {
                id: entry.id,
                score: dot(&query, &entry.vector),
            })
            .collect();

        hits.sort_unstable_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(k);

        Ok(hits)
    }

    /// Number of vectors in the index.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Vector dimension the index was built with.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Persist the index, replacing any prior artifact atomically.
    ///
    /// Writes to a temporary sibling path and renames over the target, so a
    /// concurrent reader sees either the old artifact or the new one, never
    /// a partial write.
    pub fn save(&self, path: &Path) -> Result<(), JobMatchError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let artifact = IndexArtifact {
            version: FORMAT_VERSION,
            dimension: self.dimension,
            count: self.entries.len(),
            built_at: chrono::Utc::now().to_rfc3339(),
            entries: self.entries.clone(),
        };

        let tmp = tmp_path(path);
        std::fs::write(&tmp, serde_json::to_vec(&artifact)?)?;
        std::fs::rename(&tmp, path)?;

        info!(path = %path.display(), count = artifact.count, "Index artifact written");
        Ok(())
    }

    /// Load a previously saved index without consulting the record store.
    ///
    /// Fails with `UnsupportedFormat` if the artifact carries an unknown
    /// format version.
    pub fn load(path: &Path) -> Result<Self, JobMatchError> {
        let raw = std::fs::read_to_string(path)?;

        // Check the version before committing to the full layout, so an
        // artifact from a newer format fails cleanly instead of as a parse
        // error.
        let value: serde_json::Value = serde_json::from_str(&raw)?;
        let version = value
            .get("version")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| {
                JobMatchError::Serialization("Index artifact has no version field".to_string())
            })?;
        if version != FORMAT_VERSION as u64 {
            return Err(JobMatchError::UnsupportedFormat {
                version: version as u32,
            });
        }

        let artifact: IndexArtifact = serde_json::from_value(value)?;
        if artifact.entries.len() != artifact.count {
            return Err(JobMatchError::Serialization(format!(
                "Index artifact declares {} entries but contains {}",
                artifact.count,
                artifact.entries.len()
            )));
        }
        for entry in &artifact.entries {
            if entry.vector.len() != artifact.dimension {
                return Err(JobMatchError::DimensionMismatch {
                    expected: artifact.dimension,
                    actual: entry.vector.len(),
                });
            }
        }
        if artifact.entries.is_empty() {
            return Err(JobMatchError::EmptyCorpus);
        }

        Ok(Self {
            dimension: artifact.dimension,
            entries: artifact.entries,
        })
    }
}

/// Shared handle over the current index, supporting atomic replacement.
///
/// Readers clone an `Arc` to the current index and query it lock-free; a
/// rebuild installs a new instance under a brief write lock. Queries
/// in flight keep the old index alive until they finish.
#[derive(Debug, Clone, Default)]
pub struct SharedIndex {
    inner: Arc<RwLock<Option<Arc<VectorIndex>>>>,
}

impl SharedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// The currently installed index, or `IndexNotBuilt`.
    pub fn current(&self) -> Result<Arc<VectorIndex>, JobMatchError> {
        let guard = self
            .inner
            .read()
            .map_err(|e| JobMatchError::Storage(format!("Index lock poisoned: {}", e)))?;
        guard.clone().ok_or(JobMatchError::IndexNotBuilt)
    }

    /// Install a freshly built or loaded index, replacing the previous one.
    pub fn install(&self, index: VectorIndex) -> Result<(), JobMatchError> {
        let mut guard = self
            .inner
            .write()
            .map_err(|e| JobMatchError::Storage(format!("Index lock poisoned: {}", e)))?;
        *guard = Some(Arc::new(index));
        Ok(())
    }

    /// Query the current index. See [`VectorIndex::query`].
    pub fn query(&self, vector: &[f32], k: usize) -> Result<Vec<SearchHit>, JobMatchError> {
        self.current()?.query(vector, k)
    }

    /// Rebuild from the store, persist the artifact, and swap the new index
    /// in. Queries against the previous index proceed throughout; on any
    /// failure both the previous in-memory index and the on-disk artifact
    /// are left intact. Returns the entry count of the new index.
    pub fn rebuild(
        &self,
        store: &dyn PostingStore,
        page_size: usize,
        artifact_path: &Path,
        cancel: &CancelToken,
    ) -> Result<usize, JobMatchError> {
        let index = VectorIndex::build_from_store(store, page_size, cancel)?;
        index.save(artifact_path)?;
        let count = index.len();
        self.install(index)?;
        Ok(count)
    }

    /// Load a persisted artifact and install it (process restart without a
    /// rebuild).
    pub fn load_artifact(&self, path: &Path) -> Result<usize, JobMatchError> {
        let index = VectorIndex::load(path)?;
        let count = index.len();
        self.install(index)?;
        Ok(count)
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".tmp");
    PathBuf::from(os)
}

/// Scale a vector to unit Euclidean length. Returns None for zero or
/// non-finite norms.
fn l2_normalize(values: &[f32]) -> Option<Vec<f32>> {
    let norm: f64 = values.iter().map(|v| (*v as f64).powi(2)).sum::<f64>().sqrt();
    if norm == 0.0 || !norm.is_finite() {
        return None;
    }
    Some(values.iter().map(|v| (*v as f64 / norm) as f32).collect())
}

fn dot(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum()
}
