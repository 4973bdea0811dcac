//! Artifact naming.
//!
//! Log files keep the naming scheme the result tables are built from:
//!
//! ```text
//! 2013-08-30-00-07-07--chess--WorkStealQueue--db--3--.txt
//! <timestamp>        --<suite>--<test>     --<label>--<value>--.txt
//! ```
//!
//! where `<value>` is the bound for bounded strategies and
//! `param,seed,start_index` for randomized chunks.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use ibound_config::{Strategy, StrategyKind, TargetId};

/// Fixed diagnostic name of a preserved divergent output artifact.
pub const DIVERGENT_OUTPUT_NAME: &str = "output.divergent.txt";

/// Persisted search-state files the engine reads and writes between levels.
pub const SEARCH_STATE_FILES: [&str; 4] = ["search.db", "program.db", "race.db", "static_info.db"];

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

/// The parsed name of a log artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactName {
  pub timestamp: String,
  pub target: TargetId,
  pub label: String,
  pub value: String,
}

impl ArtifactName {
  pub fn new(target: &TargetId, strategy: &Strategy, start_index: u64, at: DateTime<Utc>) -> Self {
    Self {
      timestamp: at.format(TIMESTAMP_FORMAT).to_string(),
      target: target.clone(),
      label: strategy.label().to_string(),
      value: strategy.artifact_value(start_index),
    }
  }

  pub fn file_name(&self) -> String {
    format!(
      "{}--{}--{}--{}--.txt",
      self.timestamp, self.target, self.label, self.value
    )
  }

  /// Parse a log file name. Names with or without the trailing `--` are
  /// accepted.
  pub fn parse(file_name: &str) -> Option<Self> {
    let stem = file_name.strip_suffix(".txt")?;
    let stem = stem.strip_suffix("--").unwrap_or(stem);
    let parts: Vec<&str> = stem.split("--").collect();
    if parts.len() != 5 || parts.iter().any(|p| p.is_empty()) {
      return None;
    }

    Some(Self {
      timestamp: parts[0].to_string(),
      target: TargetId::new(parts[1], parts[2]),
      label: parts[3].to_string(),
      value: parts[4].to_string(),
    })
  }

  pub fn kind(&self) -> Option<StrategyKind> {
    StrategyKind::from_label(&self.label)
  }

  /// First component of the value: the bound, PCT depth, or race pass.
  pub fn bound(&self) -> Option<u32> {
    self.value.split(',').next()?.parse().ok()
  }

  /// Start index of a randomized chunk; zero for everything else.
  pub fn start_index(&self) -> u64 {
    self
      .value
      .split(',')
      .nth(2)
      .and_then(|s| s.parse().ok())
      .unwrap_or(0)
  }
}

/// Where every artifact of a study lives.
///
/// Keys are relative to the durable results store; scratch paths are local
/// working directories owned by exactly one (target, strategy) job.
#[derive(Debug, Clone)]
pub struct ArtifactLayout {
  scratch_root: PathBuf,
}

impl ArtifactLayout {
  pub fn new(scratch_root: impl Into<PathBuf>) -> Self {
    Self {
      scratch_root: scratch_root.into(),
    }
  }

  pub fn log_key(name: &ArtifactName) -> String {
    format!("logs/{}", name.file_name())
  }

  /// Key under which a divergent output is preserved for inspection.
  pub fn divergent_output_key(name: &ArtifactName) -> String {
    format!(
      "divergent/{}--{}--{}/{}",
      name.target, name.label, name.value, DIVERGENT_OUTPUT_NAME
    )
  }

  /// Key of the directory holding the search state produced at `bound`.
  pub fn state_dir_key(target: &TargetId, strategy_label: &str, bound: u32) -> String {
    format!("state/{}--{}--{}", target, strategy_label, bound)
  }

  /// Key of one persisted search-state file produced at `bound`.
  pub fn state_key(target: &TargetId, strategy_label: &str, bound: u32, file: &str) -> String {
    format!("{}/{}", Self::state_dir_key(target, strategy_label, bound), file)
  }

  /// Working directory of one (target, strategy) job.
  pub fn scratch_dir(&self, target: &TargetId, strategy_label: &str) -> PathBuf {
    self
      .scratch_root
      .join(format!("{}--{}", target, strategy_label))
  }

  /// Directory the engine writes its search state into.
  pub fn state_out_dir(scratch_dir: &Path) -> PathBuf {
    scratch_dir.join("state-out")
  }
}
