use thiserror::Error;

/// Top-level error type for the jobmatch system.
///
/// String-carrying variants wrap opaque subsystem failures (storage, the
/// remote embedding API); structured variants cover the index and pipeline
/// precondition failures that callers are expected to match on.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum JobMatchError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Import error: {0}")]
    Import(String),

    /// A single embedding call failed. The refresh pipeline swallows this at
    /// record granularity; it never aborts a batch.
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// The embedding function is unavailable for a recommendation request.
    /// Fatal for that call only; shared state is untouched.
    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("Search error: {0}")]
    Search(String),

    #[error("No embedded postings available to build an index")]
    EmptyCorpus,

    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Degenerate (zero-norm) vector: {0}")]
    DegenerateVector(String),

    #[error("Vector index has not been built")]
    IndexNotBuilt,

    #[error("Unsupported index artifact format version {version}")]
    UnsupportedFormat { version: u32 },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for JobMatchError {
    fn from(err: toml::de::Error) -> Self {
        JobMatchError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for JobMatchError {
    fn from(err: toml::ser::Error) -> Self {
        JobMatchError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for JobMatchError {
    fn from(err: serde_json::Error) -> Self {
        JobMatchError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for jobmatch operations.
pub type Result<T> = std::result::Result<T, JobMatchError>;
