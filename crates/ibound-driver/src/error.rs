use std::path::PathBuf;

use ibound_aggregate::{AggregateError, SearchOutcome};
use ibound_executor::ExecutionError;

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
  /// Cancelled from outside. Carries what was collected so far.
  #[error("interrupted while running {}", .0.label())]
  Interrupted(Box<SearchOutcome>),

  #[error("execution failed: {0}")]
  Execution(#[from] ExecutionError),

  #[error("aggregation failed: {0}")]
  Aggregate(#[from] AggregateError),

  #[error("artifact error: {0}")]
  Artifact(#[from] ibound_artifact::Error),

  #[error("store error: {0}")]
  Store(#[from] ibound_store::Error),

  #[error("{path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("task failed: {0}")]
  Join(#[from] tokio::task::JoinError),
}
