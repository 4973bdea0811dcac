use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// A benchmark program the engine can run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
  /// Benchmark suite, e.g. "chess" or "radbench"
  pub suite: String,
  /// Test name within the suite
  pub name: String,
  /// Maximum number of threads the test spawns, forwarded to the engine.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub max_threads: Option<u32>,
  /// Maximum number of scheduling steps, forwarded to the engine.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub max_steps: Option<u64>,
  /// Per-target schedule budget, overriding the study default.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub schedule_budget: Option<u64>,
}

impl Target {
  pub fn new(suite: impl Into<String>, name: impl Into<String>) -> Self {
    Self {
      suite: suite.into(),
      name: name.into(),
      max_threads: None,
      max_steps: None,
      schedule_budget: None,
    }
  }

  pub fn id(&self) -> TargetId {
    TargetId::new(&self.suite, &self.name)
  }
}

/// Stable identifier of a target: `suite--name`.
///
/// Suites given as partial paths have their separators replaced so the id is
/// always usable as a file name component.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(String);

impl TargetId {
  pub fn new(suite: &str, name: &str) -> Self {
    Self(format!("{}--{}", suite.replace(['/', '\\'], "-"), name))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// Split back into `(suite, name)`.
  pub fn parts(&self) -> Option<(&str, &str)> {
    self.0.split_once("--")
  }
}

impl fmt::Display for TargetId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for TargetId {
  fn from(value: &str) -> Self {
    Self(value.to_string())
  }
}

/// Parse a target list.
///
/// Each non-empty line that does not start with `#` has the form
/// `suite test [maxThreads [maxSteps]]`.
pub fn parse_target_list(content: &str) -> Result<Vec<Target>, ConfigError> {
  let mut targets = Vec::new();

  for (idx, raw) in content.lines().enumerate() {
    let line = raw.trim();
    if line.is_empty() || line.starts_with('#') {
      continue;
    }

    let invalid = || ConfigError::InvalidTargetLine {
      line_no: idx + 1,
      line: line.to_string(),
    };

    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 2 || fields.len() > 4 {
      return Err(invalid());
    }

    let mut target = Target::new(fields[0], fields[1]);
    if let Some(v) = fields.get(2) {
      target.max_threads = Some(v.parse().map_err(|_| invalid())?);
    }
    if let Some(v) = fields.get(3) {
      target.max_steps = Some(v.parse().map_err(|_| invalid())?);
    }
    targets.push(target);
  }

  Ok(targets)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_target_list() {
    let content = "# suite test threads steps\n\nchess WorkStealQueue 3 500\nradbench bug4\n";
    let targets = parse_target_list(content).unwrap();

    assert_eq!(targets.len(), 2);
    assert_eq!(targets[0].id().as_str(), "chess--WorkStealQueue");
    assert_eq!(targets[0].max_threads, Some(3));
    assert_eq!(targets[0].max_steps, Some(500));
    assert_eq!(targets[1].max_threads, None);
  }

  #[test]
  fn test_parse_target_list_rejects_bad_numbers() {
    let err = parse_target_list("chess Queue many 10").unwrap_err();
    assert!(matches!(err, ConfigError::InvalidTargetLine { line_no: 1, .. }));
  }

  #[test]
  fn test_target_id_flattens_paths() {
    let id = TargetId::new("CS/reorder", "reorder_3_bad");
    assert_eq!(id.as_str(), "CS-reorder--reorder_3_bad");
    assert_eq!(id.parts(), Some(("CS-reorder", "reorder_3_bad")));
  }
}
