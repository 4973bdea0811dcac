use std::path::PathBuf;

/// Errors raised while aggregating logs.
///
/// Everything except [`AggregateError::Io`] means the upstream data cannot be
/// trusted and the family must not be tabulated.
#[derive(Debug, thiserror::Error)]
pub enum AggregateError {
  #[error("bound levels must be contiguous from 0: expected bound {expected}, found {found}")]
  BoundGap { expected: u32, found: u32 },

  #[error("bound {bound} is not exhausted although bound {previous} was")]
  ExhaustedFlip { previous: u32, bound: u32 },

  #[error("chunks are not contiguous: expected start index {expected}, found {found}")]
  ChunkGap { expected: u64, found: u64 },

  #[error("race profiler logs cannot be tabulated")]
  RaceProfilerLog,

  #[error("failed to read log {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}
