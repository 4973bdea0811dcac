use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to parse study definition: {0}")]
  Parse(#[from] serde_json::Error),

  #[error("failed to read {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid target list line {line_no}: '{line}'")]
  InvalidTargetLine { line_no: usize, line: String },

  #[error("invalid study definition: {0}")]
  Invalid(String),
}
