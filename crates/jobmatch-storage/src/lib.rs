//! jobmatch storage crate - SQLite-backed record store for job postings.
//!
//! Provides a WAL-mode SQLite database with migrations, the posting
//! repository (scan/lookup/batch-update, including the embedding column),
//! and the CSV bulk-import path.

pub mod db;
pub mod import;
pub mod migrations;
pub mod repository;

pub use db::Database;
pub use import::import_postings_from_csv;
pub use repository::{PostingRepository, PostingStore};
