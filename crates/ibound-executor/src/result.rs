//! Execution result.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Outcome of one engine invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
  /// Exit code; absent when the process was terminated by a signal.
  pub exit_status: Option<i32>,
  /// Log artifact holding the combined stdout/stderr of the engine.
  pub log_path: PathBuf,
  /// Wall-clock time from spawn to reap.
  pub elapsed: Duration,
  pub timed_out: bool,
  pub interrupted: bool,
  /// Result of the determinism check; `None` when no comparison applied.
  pub output_mismatch: Option<bool>,
}

impl ExecutionResult {
  /// Whether the engine ran to completion with a zero exit code.
  pub fn succeeded(&self) -> bool {
    self.exit_status == Some(0) && !self.timed_out && !self.interrupted
  }
}
