use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use ibound_aggregate::SearchOutcome;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::types::Json;
use tracing::debug;

use crate::types::{OutcomeRecord, StudyListing};
use crate::{Error, Store};

const SELECT_OUTCOMES: &str = "SELECT outcome_id, study, target, strategy, complete, found_bug, \
   schedules_to_first_bug, total_schedules, outcome, recorded_at FROM outcomes";

/// SQLite-backed outcome store.
#[derive(Clone)]
pub struct SqliteStore {
  pool: SqlitePool,
}

impl SqliteStore {
  /// Open (or create) the database file and apply migrations.
  pub async fn open(path: &Path) -> Result<Self, Error> {
    let options = SqliteConnectOptions::new()
      .filename(path)
      .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
      .max_connections(4)
      .connect_with(options)
      .await?;
    Self::from_pool(pool).await
  }

  /// In-memory database, mainly for tests.
  pub async fn in_memory() -> Result<Self, Error> {
    // A single connection keeps every query on the same in-memory database.
    let pool = SqlitePoolOptions::new()
      .max_connections(1)
      .connect("sqlite::memory:")
      .await?;
    Self::from_pool(pool).await
  }

  pub async fn from_pool(pool: SqlitePool) -> Result<Self, Error> {
    sqlx::migrate!("./migrations").run(&pool).await?;
    Ok(Self { pool })
  }

  pub fn pool(&self) -> &SqlitePool {
    &self.pool
  }
}

#[async_trait]
impl Store for SqliteStore {
  async fn append(&self, study: &str, outcome: &SearchOutcome) -> Result<i64, Error> {
    let mut tx = self.pool.begin().await?;

    let result = sqlx::query(
      "INSERT INTO outcomes (study, target, strategy, complete, found_bug, \
       schedules_to_first_bug, total_schedules, outcome, recorded_at) \
       VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(study)
    .bind(outcome.target().as_str())
    .bind(outcome.label())
    .bind(outcome.is_complete())
    .bind(outcome.found_bug())
    .bind(outcome.schedules_to_first_bug().map(|n| n as i64))
    .bind(outcome.total_schedules() as i64)
    .bind(Json(outcome))
    .bind(Utc::now())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    let outcome_id = result.last_insert_rowid();
    debug!(study, outcome_id, target = %outcome.target(), "outcome stored");
    Ok(outcome_id)
  }

  async fn get(&self, outcome_id: i64) -> Result<OutcomeRecord, Error> {
    sqlx::query_as::<_, OutcomeRecord>(&format!("{} WHERE outcome_id = ?", SELECT_OUTCOMES))
      .bind(outcome_id)
      .fetch_optional(&self.pool)
      .await?
      .ok_or_else(|| Error::NotFound(format!("outcome {}", outcome_id)))
  }

  async fn list(&self, study: &str) -> Result<Vec<OutcomeRecord>, Error> {
    let records = sqlx::query_as::<_, OutcomeRecord>(&format!(
      "{} WHERE study = ? ORDER BY outcome_id",
      SELECT_OUTCOMES
    ))
    .bind(study)
    .fetch_all(&self.pool)
    .await?;
    Ok(records)
  }

  async fn latest_outcomes(&self, study: &str) -> Result<Vec<SearchOutcome>, Error> {
    let records = sqlx::query_as::<_, OutcomeRecord>(&format!(
      "{} WHERE outcome_id IN (SELECT MAX(outcome_id) FROM outcomes WHERE study = ? \
       GROUP BY target, strategy) ORDER BY target, strategy",
      SELECT_OUTCOMES
    ))
    .bind(study)
    .fetch_all(&self.pool)
    .await?;
    Ok(records.into_iter().map(|r| r.outcome.0).collect())
  }

  async fn list_studies(&self) -> Result<Vec<StudyListing>, Error> {
    let studies = sqlx::query_as::<_, StudyListing>(
      "SELECT study, COUNT(*) AS outcomes, MAX(recorded_at) AS last_recorded_at \
       FROM outcomes GROUP BY study ORDER BY study",
    )
    .fetch_all(&self.pool)
    .await?;
    Ok(studies)
  }
}
