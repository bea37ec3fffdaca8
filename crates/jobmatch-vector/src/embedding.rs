//! Embedding service trait and implementations.
//!
//! - `OpenAiEmbedding` calls an OpenAI-compatible `/embeddings` endpoint
//!   over HTTP. Retry and timeout live here, behind the trait: the rest of
//!   the system only ever sees success or a single opaque failure.
//! - `MockEmbedding` provides deterministic hash-based unit vectors for
//!   testing.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use jobmatch_core::config::EmbeddingConfig;
use jobmatch_core::error::JobMatchError;

/// Service for generating text embeddings.
///
/// Implementations convert text into fixed-dimensional vectors. Used by the
/// refresh pipeline (indexing postings) and the recommender (embedding query
/// documents).
pub trait EmbeddingService: Send + Sync {
    /// Generate an embedding vector for the given text.
    fn embed(
        &self,
        text: &str,
    ) -> impl std::future::Future<Output = Result<Vec<f32>, JobMatchError>> + Send;

    /// Return the dimensionality of vectors produced by this service.
    fn dimensions(&self) -> usize;
}

/// Object-safe version of [`EmbeddingService`] for dynamic dispatch.
///
/// Because `EmbeddingService::embed` returns `impl Future` it is not
/// object-safe. This trait uses a boxed future instead, allowing
/// `Box<dyn DynEmbeddingService>` to be stored in structs without generics.
/// A blanket implementation covers every `EmbeddingService`.
pub trait DynEmbeddingService: Send + Sync {
    /// Generate an embedding vector for the given text (boxed future).
    fn embed_boxed<'a>(
        &'a self,
        text: &'a str,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Vec<f32>, JobMatchError>> + Send + 'a>,
    >;

    /// Return the dimensionality of vectors produced by this service.
    fn dimensions(&self) -> usize;
}

impl<T: EmbeddingService> DynEmbeddingService for T {
    fn embed_boxed<'a>(
        &'a self,
        text: &'a str,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Vec<f32>, JobMatchError>> + Send + 'a>,
    > {
        Box::pin(self.embed(text))
    }

    fn dimensions(&self) -> usize {
        EmbeddingService::dimensions(self)
    }
}

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Retry policy for remote embedding calls: bounded attempts with a
/// linearly increasing delay between them.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay to sleep after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

// ---------------------------------------------------------------------------
// OpenAiEmbedding - remote OpenAI-compatible embeddings endpoint
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: [&'a str; 1],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Embedding service backed by an OpenAI-compatible `/embeddings` endpoint.
///
/// The base URL is configurable so compatibility gateways work too. All
/// failures (network, rate limit, timeout, malformed response) collapse into
/// one opaque `Embedding` error after the retry budget is exhausted; callers
/// do not distinguish retryable from fatal.
pub struct OpenAiEmbedding {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dimensions: usize,
    timeout: Duration,
    retry: RetryPolicy,
}

impl std::fmt::Debug for OpenAiEmbedding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiEmbedding")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

impl OpenAiEmbedding {
    /// Build from configuration. The API key is read from the environment
    /// variable named in the config.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, JobMatchError> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            JobMatchError::Config(format!(
                "Embedding API key environment variable {} is not set",
                config.api_key_env
            ))
        })?;

        Ok(Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            dimensions: config.dimension,
            timeout: Duration::from_secs(config.timeout_secs),
            retry: RetryPolicy::new(
                config.max_attempts,
                Duration::from_millis(config.retry_delay_ms),
            ),
        })
    }

    async fn request(&self, text: &str) -> Result<Vec<f32>, JobMatchError> {
        let body = EmbeddingRequest {
            model: &self.model,
            input: [text],
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| JobMatchError::Embedding(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(JobMatchError::Embedding(format!(
                "Embedding API error ({}): {}",
                status, error_text
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| JobMatchError::Embedding(format!("Malformed response: {}", e)))?;

        let vector = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| JobMatchError::Embedding("Response contained no embedding".to_string()))?;

        if vector.len() != self.dimensions {
            return Err(JobMatchError::Embedding(format!(
                "Response vector has {} dimensions, expected {}",
                vector.len(),
                self.dimensions
            )));
        }

        Ok(vector)
    }
}

impl EmbeddingService for OpenAiEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, JobMatchError> {
        if text.trim().is_empty() {
            return Err(JobMatchError::Embedding(
                "Cannot embed empty text".to_string(),
            ));
        }

        let mut last_error =
            JobMatchError::Embedding("No embedding attempt was made".to_string());

        for attempt in 1..=self.retry.max_attempts() {
            match tokio::time::timeout(self.timeout, self.request(text)).await {
                Ok(Ok(vector)) => return Ok(vector),
                Ok(Err(e)) => last_error = e,
                Err(_) => {
                    last_error = JobMatchError::Embedding(format!(
                        "Embedding call timed out after {:?}",
                        self.timeout
                    ))
                }
            }

            if attempt < self.retry.max_attempts() {
                let delay = self.retry.delay_after(attempt);
                debug!(attempt, ?delay, error = %last_error, "Embedding attempt failed, retrying");
                tokio::time::sleep(delay).await;
            }
        }

        Err(JobMatchError::Embedding(format!(
            "Failed after {} attempts: {}",
            self.retry.max_attempts(),
            last_error
        )))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

// ---------------------------------------------------------------------------
// MockEmbedding - deterministic hash-based vectors for testing
// ---------------------------------------------------------------------------

/// Mock embedding service that returns deterministic 384-dimensional unit
/// vectors derived from a hash of the input text. Identical inputs always
/// produce identical outputs.
#[derive(Debug, Clone, Default)]
pub struct MockEmbedding;

impl MockEmbedding {
    pub fn new() -> Self {
        Self
    }

    fn hash_to_vector(text: &str) -> Vec<f32> {
        let mut result = Vec::with_capacity(384);
        for i in 0..384 {
            let mut hasher = DefaultHasher::new();
            text.hash(&mut hasher);
            i.hash(&mut hasher);
            let h = hasher.finish();
            let val = ((h as f64) / (u64::MAX as f64)) * 2.0 - 1.0;
            result.push(val as f32);
        }

        // Unit-length, like the production service's output.
        let norm: f32 = result.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for val in &mut result {
                *val /= norm;
            }
        }

        result
    }
}

impl EmbeddingService for MockEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, JobMatchError> {
        if text.trim().is_empty() {
            return Err(JobMatchError::Embedding(
                "Cannot embed empty text".to_string(),
            ));
        }
        Ok(Self::hash_to_vector(text))
    }

    fn dimensions(&self) -> usize {
        384
    }
}
