use chrono::{DateTime, Utc};
use ibound_aggregate::SearchOutcome;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;

/// One stored outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct OutcomeRecord {
  pub outcome_id: i64,
  pub study: String,
  pub target: String,
  pub strategy: String,
  pub complete: bool,
  pub found_bug: bool,
  pub schedules_to_first_bug: Option<i64>,
  pub total_schedules: i64,
  pub outcome: Json<SearchOutcome>,
  pub recorded_at: DateTime<Utc>,
}

/// A study and how many outcomes it has stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct StudyListing {
  pub study: String,
  pub outcomes: i64,
  pub last_recorded_at: DateTime<Utc>,
}
