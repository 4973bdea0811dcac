//! Study definitions.
//!
//! A study is the unit the CLI runs: one engine, a list of targets and the
//! strategies every target is searched with.
//!
//! # Example
//!
//! ```json
//! {
//!   "name": "chess-suite",
//!   "engine": { "program": "./run.sh" },
//!   "targets_file": "tests.txt",
//!   "strategies": [
//!     { "kind": "delay_bound" },
//!     { "kind": "preemption_bound", "max_bound": 5 },
//!     { "kind": "pct", "depth": 3, "chunks": 10 },
//!     { "kind": "random", "seed": 0, "chunks": 10 }
//!   ],
//!   "schedule_budget": 10000,
//!   "timeout_secs": 600,
//!   "workers": 4
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::execution::{DetectorFlags, EngineCommand, RunSettings};
use crate::strategy::{BoundFamily, StrategyKind};
use crate::target::{Target, parse_target_list};

fn default_timeout_secs() -> u64 {
  600
}

fn default_schedule_budget() -> u64 {
  10_000
}

fn default_workers() -> usize {
  1
}

fn default_num_threads() -> u32 {
  2
}

fn default_chunks() -> u32 {
  1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyDef {
  pub name: String,
  pub engine: EngineCommand,
  #[serde(default)]
  pub targets: Vec<Target>,
  /// Target list in `suite test maxThreads maxSteps` format, relative to the study file.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub targets_file: Option<PathBuf>,
  pub strategies: Vec<StrategyPlan>,
  /// Wall-clock limit for a single engine invocation.
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
  /// Maximum number of schedules per (target, strategy).
  #[serde(default = "default_schedule_budget")]
  pub schedule_budget: u64,
  /// Number of (target, strategy) jobs run concurrently.
  #[serde(default = "default_workers")]
  pub workers: usize,
  #[serde(default = "default_num_threads")]
  pub num_threads: u32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub cpu: Option<u32>,
  #[serde(default)]
  pub detectors: DetectorFlags,
  /// Output artifact compared across deterministic replays.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub output_file: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub results_dir: Option<PathBuf>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub scratch_dir: Option<PathBuf>,
}

/// How one strategy is run for every target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyPlan {
  /// Iterative preemption bounding.
  PreemptionBound {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_bound: Option<u32>,
  },
  /// Iterative delay bounding.
  DelayBound {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_bound: Option<u32>,
  },
  Exhaustive,
  Pct {
    depth: u32,
    #[serde(default)]
    seed: u64,
    #[serde(default = "default_chunks")]
    chunks: u32,
  },
  Random {
    #[serde(default)]
    seed: u64,
    #[serde(default = "default_chunks")]
    chunks: u32,
  },
  RaceProfile {
    #[serde(default = "default_chunks")]
    passes: u32,
  },
}

impl StrategyPlan {
  pub fn kind(&self) -> StrategyKind {
    match self {
      StrategyPlan::PreemptionBound { .. } => StrategyKind::PreemptionBound,
      StrategyPlan::DelayBound { .. } => StrategyKind::DelayBound,
      StrategyPlan::Exhaustive => StrategyKind::Exhaustive,
      StrategyPlan::Pct { .. } => StrategyKind::Pct,
      StrategyPlan::Random { .. } => StrategyKind::Random,
      StrategyPlan::RaceProfile { .. } => StrategyKind::RaceProfile,
    }
  }

  /// The bound family and its optional ceiling, for iterative plans.
  pub fn family(&self) -> Option<(BoundFamily, Option<u32>)> {
    match self {
      StrategyPlan::PreemptionBound { max_bound } => Some((BoundFamily::Preemption, *max_bound)),
      StrategyPlan::DelayBound { max_bound } => Some((BoundFamily::Delay, *max_bound)),
      _ => None,
    }
  }

  /// Human-readable label used in reports.
  pub fn label(&self) -> String {
    match self {
      StrategyPlan::PreemptionBound { .. } => "IPB".to_string(),
      StrategyPlan::DelayBound { .. } => "IDB".to_string(),
      StrategyPlan::Exhaustive => "DFS".to_string(),
      StrategyPlan::Pct { depth, .. } => format!("PCT d={}", depth),
      StrategyPlan::Random { .. } => "Rand".to_string(),
      StrategyPlan::RaceProfile { .. } => "Race".to_string(),
    }
  }
}

impl StudyDef {
  pub fn from_json(content: &str) -> Result<Self, ConfigError> {
    let study: StudyDef = serde_json::from_str(content)?;
    study.validate()?;
    Ok(study)
  }

  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    Self::from_json(&content)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.strategies.is_empty() {
      return Err(ConfigError::Invalid("study has no strategies".to_string()));
    }
    if self.schedule_budget == 0 {
      return Err(ConfigError::Invalid("schedule_budget must be positive".to_string()));
    }
    if self.workers == 0 {
      return Err(ConfigError::Invalid("workers must be positive".to_string()));
    }
    if self.timeout_secs == 0 {
      return Err(ConfigError::Invalid("timeout_secs must be positive".to_string()));
    }

    let mut labels = std::collections::HashSet::new();
    for plan in &self.strategies {
      let chunks = match plan {
        StrategyPlan::Pct { chunks, .. } | StrategyPlan::Random { chunks, .. } => *chunks,
        StrategyPlan::RaceProfile { passes } => *passes,
        _ => 1,
      };
      if chunks == 0 {
        return Err(ConfigError::Invalid(format!(
          "strategy '{}' needs at least one chunk",
          plan.label()
        )));
      }
      if !labels.insert(plan.label()) {
        return Err(ConfigError::Invalid(format!(
          "strategy '{}' listed twice",
          plan.label()
        )));
      }
    }

    Ok(())
  }

  pub fn run_settings(&self) -> RunSettings {
    RunSettings {
      engine: self.engine.clone(),
      timeout: Duration::from_secs(self.timeout_secs),
      schedule_budget: self.schedule_budget,
      num_threads: self.num_threads,
      cpu: self.cpu,
      detectors: self.detectors,
      output_file: self.output_file.clone(),
    }
  }

  /// Inline targets followed by the targets of `targets_file`, resolved
  /// relative to `base_dir`.
  pub fn resolve_targets(&self, base_dir: &Path) -> Result<Vec<Target>, ConfigError> {
    let mut targets = self.targets.clone();

    if let Some(file) = &self.targets_file {
      let path = base_dir.join(file);
      let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
      })?;
      targets.extend(parse_target_list(&content)?);
    }

    let mut seen = std::collections::HashSet::new();
    for target in &targets {
      if !seen.insert(target.id()) {
        return Err(ConfigError::Invalid(format!("target '{}' listed twice", target.id())));
      }
    }

    Ok(targets)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const STUDY: &str = r#"{
    "name": "smoke",
    "engine": { "program": "./run.sh", "args": ["--quiet"] },
    "targets": [{ "suite": "chess", "name": "WSQ" }],
    "strategies": [
      { "kind": "delay_bound" },
      { "kind": "preemption_bound", "max_bound": 4 },
      { "kind": "pct", "depth": 3, "chunks": 10 },
      { "kind": "random" }
    ]
  }"#;

  #[test]
  fn test_study_defaults() {
    let study = StudyDef::from_json(STUDY).unwrap();
    assert_eq!(study.timeout_secs, 600);
    assert_eq!(study.schedule_budget, 10_000);
    assert_eq!(study.workers, 1);
    assert_eq!(
      study.strategies[2],
      StrategyPlan::Pct {
        depth: 3,
        seed: 0,
        chunks: 10
      }
    );
    assert_eq!(study.strategies[3], StrategyPlan::Random { seed: 0, chunks: 1 });
    assert_eq!(
      study.strategies[1].family(),
      Some((BoundFamily::Preemption, Some(4)))
    );
  }

  #[test]
  fn test_study_rejects_duplicate_strategy() {
    let json = r#"{
      "name": "dup",
      "engine": { "program": "./run.sh" },
      "strategies": [{ "kind": "exhaustive" }, { "kind": "exhaustive" }]
    }"#;
    assert!(matches!(StudyDef::from_json(json), Err(ConfigError::Invalid(_))));
  }

  #[test]
  fn test_study_rejects_zero_chunks() {
    let json = r#"{
      "name": "zero",
      "engine": { "program": "./run.sh" },
      "strategies": [{ "kind": "random", "chunks": 0 }]
    }"#;
    assert!(StudyDef::from_json(json).is_err());
  }

  #[test]
  fn test_labels() {
    assert_eq!(StrategyPlan::Pct { depth: 2, seed: 0, chunks: 1 }.label(), "PCT d=2");
    assert_eq!(StrategyPlan::DelayBound { max_bound: None }.label(), "IDB");
  }
}
