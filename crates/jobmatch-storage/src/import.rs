//! One-shot CSV bulk import for postings.
//!
//! Columns are matched by header name; missing and extra columns are
//! tolerated. Numeric fields use lenient coercion (thousands separators
//! stripped, integers accepted in float notation, blanks and NA markers
//! treated as absent). When no normalized salary is given it is infilled
//! from the salary bounds.

use std::collections::HashMap;
use std::path::Path;

use tracing::{info, warn};

use jobmatch_core::error::{JobMatchError, Result};
use jobmatch_core::types::Posting;

use crate::repository::PostingRepository;

/// Import postings from a CSV file, committing in batches of `commit_every`
/// rows. Rows with a duplicate `job_id` are skipped. Returns the number of
/// rows inserted.
pub fn import_postings_from_csv(
    repo: &PostingRepository,
    csv_path: &Path,
    commit_every: usize,
) -> Result<usize> {
    if commit_every == 0 {
        return Err(JobMatchError::Import(
            "commit_every must be at least 1".to_string(),
        ));
    }

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(csv_path)
        .map_err(|e| JobMatchError::Import(format!("Failed to open {}: {}", csv_path.display(), e)))?;

    let mut inserted = 0usize;
    let mut malformed = 0usize;
    let mut pending: Vec<Posting> = Vec::with_capacity(commit_every);

    for row in reader.deserialize::<HashMap<String, String>>() {
        let fields = match row {
            Ok(fields) => fields,
            Err(e) => {
                malformed += 1;
                warn!(error = %e, "Skipping malformed CSV row");
                continue;
            }
        };

        pending.push(row_to_posting(&fields));

        if pending.len() >= commit_every {
            inserted += flush(repo, &mut pending);
            info!(inserted, "Import progress");
        }
    }
    inserted += flush(repo, &mut pending);

    info!(inserted, malformed, "CSV import finished");
    Ok(inserted)
}

fn flush(repo: &PostingRepository, pending: &mut Vec<Posting>) -> usize {
    if pending.is_empty() {
        return 0;
    }
    let batch = std::mem::take(pending);
    match repo.insert_batch(&batch) {
        Ok(count) => count,
        Err(e) => {
            warn!(error = %e, rows = batch.len(), "Import batch failed; continuing");
            0
        }
    }
}

fn row_to_posting(fields: &HashMap<String, String>) -> Posting {
    let min_salary = parse_float(fields.get("min_salary"));
    let med_salary = parse_float(fields.get("med_salary"));
    let max_salary = parse_float(fields.get("max_salary"));

    // Prefer the median; fall back to the midpoint, then either bound.
    let normalized_salary = match (med_salary, min_salary, max_salary) {
        (Some(med), _, _) => Some(med),
        (None, Some(lo), Some(hi)) => Some((lo + hi) / 2.0),
        (None, Some(lo), None) => Some(lo),
        (None, None, Some(hi)) => Some(hi),
        (None, None, None) => None,
    };

    Posting {
        id: 0,
        job_id: text(fields, "job_id"),
        company_name: text(fields, "company_name"),
        title: text(fields, "title"),
        description: text(fields, "description"),
        location: text(fields, "location"),
        skills_desc: text(fields, "skills_desc"),
        work_type: text(fields, "work_type"),
        formatted_work_type: text(fields, "formatted_work_type"),
        formatted_experience_level: text(fields, "formatted_experience_level"),
        remote_allowed: text(fields, "remote_allowed"),
        pay_period: text(fields, "pay_period"),
        currency: text(fields, "currency"),
        compensation_type: text(fields, "compensation_type"),
        min_salary,
        med_salary,
        max_salary,
        normalized_salary,
        views: parse_int(fields.get("views")),
        applies: parse_int(fields.get("applies")),
        job_posting_url: text(fields, "job_posting_url"),
        application_url: text(fields, "application_url"),
        listed_time: text(fields, "listed_time"),
        expiry: text(fields, "expiry"),
        zip_code: text(fields, "zip_code"),
        embedding: None,
    }
}

fn is_na(value: &str) -> bool {
    value.is_empty() || value == "NA" || value == "None"
}

fn text(fields: &HashMap<String, String>, key: &str) -> Option<String> {
    fields
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !is_na(v))
        .map(String::from)
}

fn parse_float(value: Option<&String>) -> Option<f64> {
    let v = value.map(|v| v.trim())?;
    if is_na(v) {
        return None;
    }
    v.replace(',', "").parse::<f64>().ok()
}

fn parse_int(value: Option<&String>) -> Option<i64> {
    parse_float(value).map(|f| f as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Arc;

    use crate::db::Database;
    use crate::repository::PostingStore;

    fn make_repo() -> PostingRepository {
        PostingRepository::new(Arc::new(Database::in_memory().unwrap()))
    }

    fn write_csv(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_import_basic_rows() {
        let repo = make_repo();
        let csv = write_csv(
            "job_id,title,description,min_salary,max_salary,med_salary,views\n\
             a1,Engineer,Builds things,\"90,000\",\"120,000\",,12.0\n\
             a2,Analyst,Counts things,,,75000,NA\n",
        );

        let count = import_postings_from_csv(&repo, csv.path(), 10).unwrap();
        assert_eq!(count, 2);

        let postings = repo.scan_unembedded(0, 10).unwrap();
        let engineer = postings
            .iter()
            .find(|p| p.job_id.as_deref() == Some("a1"))
            .unwrap();
        assert_eq!(engineer.min_salary, Some(90_000.0));
        assert_eq!(engineer.max_salary, Some(120_000.0));
        // No median: midpoint infill.
        assert_eq!(engineer.normalized_salary, Some(105_000.0));
        assert_eq!(engineer.views, Some(12));

        let analyst = postings
            .iter()
            .find(|p| p.job_id.as_deref() == Some("a2"))
            .unwrap();
        assert_eq!(analyst.normalized_salary, Some(75_000.0));
        assert_eq!(analyst.views, None);
    }

    #[test]
    fn test_import_single_bound_infill() {
        let repo = make_repo();
        let csv = write_csv(
            "job_id,title,min_salary,max_salary\n\
             lo,OnlyMin,50000,\n\
             hi,OnlyMax,,80000\n\
             none,Neither,,\n",
        );

        import_postings_from_csv(&repo, csv.path(), 10).unwrap();
        let postings = repo.scan_unembedded(0, 10).unwrap();

        let by_job = |job: &str| {
            postings
                .iter()
                .find(|p| p.job_id.as_deref() == Some(job))
                .unwrap()
        };
        assert_eq!(by_job("lo").normalized_salary, Some(50_000.0));
        assert_eq!(by_job("hi").normalized_salary, Some(80_000.0));
        assert_eq!(by_job("none").normalized_salary, None);
    }

    #[test]
    fn test_import_skips_duplicate_job_ids() {
        let repo = make_repo();
        let csv = write_csv(
            "job_id,title\n\
             dup,First\n\
             dup,Second\n\
             uniq,Third\n",
        );

        let count = import_postings_from_csv(&repo, csv.path(), 10).unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_import_tolerates_missing_and_extra_columns() {
        let repo = make_repo();
        let csv = write_csv(
            "job_id,title,unknown_column\n\
             x1,Whatever,ignored\n",
        );

        let count = import_postings_from_csv(&repo, csv.path(), 10).unwrap();
        assert_eq!(count, 1);

        let posting = repo.scan_unembedded(0, 10).unwrap().remove(0);
        assert_eq!(posting.title.as_deref(), Some("Whatever"));
        assert!(posting.description.is_none());
    }

    #[test]
    fn test_import_commits_in_batches() {
        let repo = make_repo();
        let mut content = String::from("job_id,title\n");
        for i in 0..7 {
            content.push_str(&format!("j{},Title {}\n", i, i));
        }
        let csv = write_csv(&content);

        // commit_every smaller than the row count exercises multiple flushes.
        let count = import_postings_from_csv(&repo, csv.path(), 3).unwrap();
        assert_eq!(count, 7);
        assert_eq!(repo.count().unwrap(), 7);
    }

    #[test]
    fn test_import_rejects_zero_commit_every() {
        let repo = make_repo();
        let csv = write_csv("job_id,title\n");
        assert!(import_postings_from_csv(&repo, csv.path(), 0).is_err());
    }
}
