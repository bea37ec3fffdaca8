use serde::{Deserialize, Serialize};

use crate::error::{JobMatchError, Result};

/// Identifier of a posting row. Assigned by the record store, immutable.
pub type PostingId = i64;

/// A fixed-dimension embedding vector with an explicit dimension tag.
///
/// The tag is redundant with `values.len()` in memory but travels with the
/// vector through storage, where blob length alone cannot be trusted.
/// Construction validates the two agree, so every `Embedding` in the system
/// is internally consistent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    dim: usize,
    values: Vec<f32>,
}

impl Embedding {
    /// Wrap a raw vector, taking its length as the dimension.
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            dim: values.len(),
            values,
        }
    }

    /// Reconstruct from a dimension tag and values, validating agreement.
    pub fn from_parts(dim: usize, values: Vec<f32>) -> Result<Self> {
        if values.len() != dim {
            return Err(JobMatchError::DimensionMismatch {
                expected: dim,
                actual: values.len(),
            });
        }
        Ok(Self { dim, values })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    pub fn into_values(self) -> Vec<f32> {
        self.values
    }
}

/// A job posting as stored in the record store.
///
/// Field set mirrors the posting CSV columns. All attributes except `id` are
/// optional; the importer leaves blank columns as `None`. The embedding
/// transitions `None` -> `Some` exactly once, written only by the refresh
/// pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Posting {
    pub id: PostingId,
    pub job_id: Option<String>,
    pub company_name: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub skills_desc: Option<String>,
    pub work_type: Option<String>,
    pub formatted_work_type: Option<String>,
    pub formatted_experience_level: Option<String>,
    pub remote_allowed: Option<String>,
    pub pay_period: Option<String>,
    pub currency: Option<String>,
    pub compensation_type: Option<String>,
    pub min_salary: Option<f64>,
    pub med_salary: Option<f64>,
    pub max_salary: Option<f64>,
    pub normalized_salary: Option<f64>,
    pub views: Option<i64>,
    pub applies: Option<i64>,
    pub job_posting_url: Option<String>,
    pub application_url: Option<String>,
    pub listed_time: Option<String>,
    pub expiry: Option<String>,
    pub zip_code: Option<String>,
    pub embedding: Option<Embedding>,
}

impl Posting {
    /// The text fed to the embedding function for this posting.
    ///
    /// Title, description, and skills joined with blank lines; absent fields
    /// are omitted. Returns an empty string when no text field is populated,
    /// which the embedding service rejects (the posting then stays
    /// unembedded).
    pub fn embedding_text(&self) -> String {
        let mut parts: Vec<&str> = Vec::with_capacity(3);
        if let Some(ref title) = self.title {
            if !title.trim().is_empty() {
                parts.push(title);
            }
        }
        if let Some(ref description) = self.description {
            if !description.trim().is_empty() {
                parts.push(description);
            }
        }
        if let Some(ref skills) = self.skills_desc {
            if !skills.trim().is_empty() {
                parts.push(skills);
            }
        }
        parts.join("\n\n")
    }

    pub fn is_embedded(&self) -> bool {
        self.embedding.is_some()
    }
}
