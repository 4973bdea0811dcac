//! Ibound Store
//!
//! This crate provides the storage trait and the SQLite implementation for
//! study results. Every finished (target, strategy) job is appended as one
//! [`OutcomeRecord`]; the full [`SearchOutcome`] is kept as a JSON column so
//! that reports can be rebuilt without re-reading logs.
//!
//! Appends come from a single writer task and each append is one transaction.
//!
//! [`SearchOutcome`]: ibound_aggregate::SearchOutcome

mod sqlite;
mod types;

pub use sqlite::SqliteStore;
pub use types::{OutcomeRecord, StudyListing};

use async_trait::async_trait;
use ibound_aggregate::SearchOutcome;

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// The requested record was not found.
  #[error("not found: {0}")]
  NotFound(String),

  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),

  /// Applying the embedded migrations failed.
  #[error("migration error: {0}")]
  Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Storage trait for study outcomes.
#[async_trait]
pub trait Store: Send + Sync {
  /// Append one outcome of a study and return its record id.
  async fn append(&self, study: &str, outcome: &SearchOutcome) -> Result<i64, Error>;

  /// Get a record by id.
  async fn get(&self, outcome_id: i64) -> Result<OutcomeRecord, Error>;

  /// All records of a study, oldest first.
  async fn list(&self, study: &str) -> Result<Vec<OutcomeRecord>, Error>;

  /// The newest outcome of every (target, strategy) of a study.
  async fn latest_outcomes(&self, study: &str) -> Result<Vec<SearchOutcome>, Error>;

  /// Every study with at least one record.
  async fn list_studies(&self) -> Result<Vec<StudyListing>, Error>;
}
