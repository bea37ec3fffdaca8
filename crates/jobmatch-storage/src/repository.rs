//! Posting repository: scans, lookups, and batched embedding updates.
//!
//! [`PostingStore`] is the seam the pipeline and index crates program
//! against; [`PostingRepository`] is the SQLite implementation. Embeddings
//! live in a `BLOB` column of little-endian f32 values with the dimension
//! in a sibling column.

use std::sync::Arc;

use rusqlite::OptionalExtension;

use jobmatch_core::error::JobMatchError;
use jobmatch_core::types::{Embedding, Posting, PostingId};

use crate::db::Database;

/// Record-store operations consumed by the refresh pipeline, index build,
/// and recommender. Implemented by [`PostingRepository`]; tests substitute
/// doubles for failure injection.
pub trait PostingStore: Send + Sync {
    /// Fetch up to `limit` postings without an embedding, with `id >
    /// after_id`, ordered by id. Keyset pagination: within one pipeline run
    /// the caller advances `after_id` past everything fetched, so postings
    /// whose embedding call failed are not refetched until the next run.
    fn scan_unembedded(&self, after_id: PostingId, limit: usize)
        -> Result<Vec<Posting>, JobMatchError>;

    /// Fetch up to `limit` embedded postings with `id > after_id`, ordered
    /// by id. Used by index build as a bounded streaming scan.
    fn scan_embedded_page(
        &self,
        after_id: PostingId,
        limit: usize,
    ) -> Result<Vec<Posting>, JobMatchError>;

    fn get_by_id(&self, id: PostingId) -> Result<Option<Posting>, JobMatchError>;

    /// Batch lookup. Missing ids are silently omitted; results are ordered
    /// by id.
    fn get_by_ids(&self, ids: &[PostingId]) -> Result<Vec<Posting>, JobMatchError>;

    /// Persist a batch of embeddings in a single transaction. A failure
    /// rolls back the whole batch and nothing else. Rows that already carry
    /// an embedding are left untouched.
    fn update_embeddings(&self, batch: &[(PostingId, Embedding)]) -> Result<(), JobMatchError>;

    fn count(&self) -> Result<u64, JobMatchError>;

    fn count_embedded(&self) -> Result<u64, JobMatchError>;
}

const POSTING_COLUMNS: &str = "id, job_id, company_name, title, description, location, \
     skills_desc, work_type, formatted_work_type, formatted_experience_level, remote_allowed, \
     pay_period, currency, compensation_type, min_salary, med_salary, max_salary, \
     normalized_salary, views, applies, job_posting_url, application_url, listed_time, expiry, \
     zip_code, embedding, embedding_dim";

/// SQLite-backed posting repository.
pub struct PostingRepository {
    db: Arc<Database>,
}

impl PostingRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a posting, returning the assigned id. `posting.id` is ignored.
    pub fn insert(&self, posting: &Posting) -> Result<PostingId, JobMatchError> {
        self.db.with_conn(|conn| {
            insert_posting(conn, posting)
                .map_err(|e| JobMatchError::Storage(format!("Failed to insert posting: {}", e)))?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Insert a batch of postings in one transaction, skipping rows that
    /// violate the `job_id` uniqueness constraint. Returns the number of
    /// rows actually inserted.
    pub fn insert_batch(&self, postings: &[Posting]) -> Result<usize, JobMatchError> {
        self.db.with_tx(|tx| {
            let mut inserted = 0;
            for posting in postings {
                match insert_posting(tx, posting) {
                    Ok(()) => inserted += 1,
                    Err(e) => {
                        tracing::debug!(job_id = ?posting.job_id, error = %e, "Skipping posting");
                    }
                }
            }
            Ok(inserted)
        })
    }
}

impl PostingStore for PostingRepository {
    fn scan_unembedded(
        &self,
        after_id: PostingId,
        limit: usize,
    ) -> Result<Vec<Posting>, JobMatchError> {
        self.query_page("embedding IS NULL", after_id, limit)
    }

    fn scan_embedded_page(
        &self,
        after_id: PostingId,
        limit: usize,
    ) -> Result<Vec<Posting>, JobMatchError> {
        self.query_page("embedding IS NOT NULL", after_id, limit)
    }

    fn get_by_id(&self, id: PostingId) -> Result<Option<Posting>, JobMatchError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM postings WHERE id = ?1",
                    POSTING_COLUMNS
                ))
                .map_err(|e| JobMatchError::Storage(e.to_string()))?;

            let result = stmt
                .query_row(rusqlite::params![id], |row| Ok(row_to_posting(row)))
                .optional()
                .map_err(|e| JobMatchError::Storage(e.to_string()))?;

            match result {
                Some(posting) => Ok(Some(posting?)),
                None => Ok(None),
            }
        })
    }

    fn get_by_ids(&self, ids: &[PostingId]) -> Result<Vec<Posting>, JobMatchError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        self.db.with_conn(|conn| {
            let placeholders = vec!["?"; ids.len()].join(", ");
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM postings WHERE id IN ({}) ORDER BY id",
                    POSTING_COLUMNS, placeholders
                ))
                .map_err(|e| JobMatchError::Storage(e.to_string()))?;

            let rows = stmt
                .query_map(rusqlite::params_from_iter(ids.iter()), |row| {
                    Ok(row_to_posting(row))
                })
                .map_err(|e| JobMatchError::Storage(e.to_string()))?;

            let mut postings = Vec::new();
            for row in rows {
                postings.push(row.map_err(|e| JobMatchError::Storage(e.to_string()))??);
            }
            Ok(postings)
        })
    }

    fn update_embeddings(&self, batch: &[(PostingId, Embedding)]) -> Result<(), JobMatchError> {
        if batch.is_empty() {
            return Ok(());
        }

        self.db.with_tx(|tx| {
            let mut stmt = tx
                .prepare(
                    "UPDATE postings SET embedding = ?1, embedding_dim = ?2
                     WHERE id = ?3 AND embedding IS NULL",
                )
                .map_err(|e| JobMatchError::Storage(e.to_string()))?;

            for (id, embedding) in batch {
                stmt.execute(rusqlite::params![
                    encode_embedding(embedding),
                    embedding.dim() as i64,
                    id,
                ])
                .map_err(|e| {
                    JobMatchError::Storage(format!("Failed to write embedding for {}: {}", id, e))
                })?;
            }
            Ok(())
        })
    }

    fn count(&self) -> Result<u64, JobMatchError> {
        self.count_where("1 = 1")
    }

    fn count_embedded(&self) -> Result<u64, JobMatchError> {
        self.count_where("embedding IS NOT NULL")
    }
}

impl PostingRepository {
    fn query_page(
        &self,
        predicate: &str,
        after_id: PostingId,
        limit: usize,
    ) -> Result<Vec<Posting>, JobMatchError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM postings WHERE {} AND id > ?1 ORDER BY id LIMIT ?2",
                    POSTING_COLUMNS, predicate
                ))
                .map_err(|e| JobMatchError::Storage(e.to_string()))?;

            let rows = stmt
                .query_map(rusqlite::params![after_id, limit as i64], |row| {
                    Ok(row_to_posting(row))
                })
                .map_err(|e| JobMatchError::Storage(e.to_string()))?;

            let mut postings = Vec::new();
            for row in rows {
                postings.push(row.map_err(|e| JobMatchError::Storage(e.to_string()))??);
            }
            Ok(postings)
        })
    }

    fn count_where(&self, predicate: &str) -> Result<u64, JobMatchError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row(
                    &format!("SELECT COUNT(*) FROM postings WHERE {}", predicate),
                    [],
                    |row| row.get(0),
                )
                .map_err(|e| JobMatchError::Storage(e.to_string()))?;
            Ok(count as u64)
        })
    }
}

fn insert_posting(conn: &rusqlite::Connection, posting: &Posting) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO postings (
            job_id, company_name, title, description, location, skills_desc, work_type,
            formatted_work_type, formatted_experience_level, remote_allowed, pay_period,
            currency, compensation_type, min_salary, med_salary, max_salary,
            normalized_salary, views, applies, job_posting_url, application_url,
            listed_time, expiry, zip_code, embedding, embedding_dim
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                   ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26)",
        rusqlite::params![
            posting.job_id,
            posting.company_name,
            posting.title,
            posting.description,
            posting.location,
            posting.skills_desc,
            posting.work_type,
            posting.formatted_work_type,
            posting.formatted_experience_level,
            posting.remote_allowed,
            posting.pay_period,
            posting.currency,
            posting.compensation_type,
            posting.min_salary,
            posting.med_salary,
            posting.max_salary,
            posting.normalized_salary,
            posting.views,
            posting.applies,
            posting.job_posting_url,
            posting.application_url,
            posting.listed_time,
            posting.expiry,
            posting.zip_code,
            posting.embedding.as_ref().map(encode_embedding),
            posting.embedding.as_ref().map(|e| e.dim() as i64),
        ],
    )?;
    Ok(())
}

fn row_to_posting(row: &rusqlite::Row<'_>) -> Result<Posting, JobMatchError> {
    let sql = |e: rusqlite::Error| JobMatchError::Storage(e.to_string());

    let blob: Option<Vec<u8>> = row.get("embedding").map_err(sql)?;
    let dim: Option<i64> = row.get("embedding_dim").map_err(sql)?;
    let embedding = match (blob, dim) {
        (Some(blob), Some(dim)) => Some(decode_embedding(&blob, dim as usize)?),
        (None, None) => None,
        _ => {
            return Err(JobMatchError::Storage(
                "Embedding blob and dimension tag out of sync".to_string(),
            ))
        }
    };

    Ok(Posting {
        id: row.get("id").map_err(sql)?,
        job_id: row.get("job_id").map_err(sql)?,
        company_name: row.get("company_name").map_err(sql)?,
        title: row.get("title").map_err(sql)?,
        description: row.get("description").map_err(sql)?,
        location: row.get("location").map_err(sql)?,
        skills_desc: row.get("skills_desc").map_err(sql)?,
        work_type: row.get("work_type").map_err(sql)?,
        formatted_work_type: row.get("formatted_work_type").map_err(sql)?,
        formatted_experience_level: row.get("formatted_experience_level").map_err(sql)?,
        remote_allowed: row.get("remote_allowed").map_err(sql)?,
        pay_period: row.get("pay_period").map_err(sql)?,
        currency: row.get("currency").map_err(sql)?,
        compensation_type: row.get("compensation_type").map_err(sql)?,
        min_salary: row.get("min_salary").map_err(sql)?,
        med_salary: row.get("med_salary").map_err(sql)?,
        max_salary: row.get("max_salary").map_err(sql)?,
        normalized_salary: row.get("normalized_salary").map_err(sql)?,
        views: row.get("views").map_err(sql)?,
        applies: row.get("applies").map_err(sql)?,
        job_posting_url: row.get("job_posting_url").map_err(sql)?,
        application_url: row.get("application_url").map_err(sql)?,
        listed_time: row.get("listed_time").map_err(sql)?,
        expiry: row.get("expiry").map_err(sql)?,
        zip_code: row.get("zip_code").map_err(sql)?,
        embedding,
    })
}

/// Encode an embedding as a little-endian f32 blob.
fn encode_embedding(embedding: &Embedding) -> Vec<u8> {
    let mut blob = Vec::with_capacity(embedding.dim() * 4);
    for v in embedding.as_slice() {
        blob.extend_from_slice(&v.to_le_bytes());
    }
    blob
}

/// Decode a little-endian f32 blob against its dimension tag.
fn decode_embedding(blob: &[u8], dim: usize) -> Result<Embedding, JobMatchError> {
    if blob.len() != dim * 4 {
        return Err(JobMatchError::Storage(format!(
            "Embedding blob of {} bytes does not match dimension {}",
            blob.len(),
            dim
        )));
    }
    let values = blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Embedding::from_parts(dim, values)
}
