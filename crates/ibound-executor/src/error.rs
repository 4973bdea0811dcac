//! Execution errors.

use std::path::PathBuf;

/// Errors that prevent an engine invocation from producing a result.
///
/// A non-zero exit, a timeout or an interruption are not errors: they are
/// reported through [`ExecutionResult`](crate::ExecutionResult).
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
  /// The engine process could not be started.
  #[error("failed to spawn engine '{program}': {source}")]
  Spawn {
    program: PathBuf,
    #[source]
    source: std::io::Error,
  },

  /// The log artifact could not be created or appended to.
  #[error("log artifact {path}: {source}")]
  Log {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  /// Waiting on the engine process failed.
  #[error("failed to wait on engine: {0}")]
  Wait(#[source] std::io::Error),

  /// The working directory could not be prepared.
  #[error("working directory {path}: {source}")]
  WorkingDir {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  /// Preserving a divergent output artifact failed.
  #[error("artifact error: {0}")]
  Artifact(#[from] ibound_artifact::Error),
}
