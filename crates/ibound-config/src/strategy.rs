use std::fmt;

use serde::{Deserialize, Serialize};

/// A search strategy understood by the execution engine.
///
/// Each variant carries exactly the parameters it needs, so a seed can only
/// exist on the randomized strategies and a bound only on the bounded ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Strategy {
  /// Unbounded depth-first search over all schedules.
  Exhaustive,
  /// Schedules with at most `bound` preemptions.
  PreemptionBound { bound: u32 },
  /// Schedules with at most `bound` delays.
  DelayBound { bound: u32 },
  /// Probabilistic concurrency testing with bug depth `depth`.
  Pct { depth: u32, seed: u64 },
  /// Uniformly random scheduling.
  Random { seed: u64 },
  /// Race-profiling pass that seeds the race detector for later runs.
  RaceProfile,
}

/// The strategy variant without its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
  Exhaustive,
  PreemptionBound,
  DelayBound,
  Pct,
  Random,
  RaceProfile,
}

impl Strategy {
  pub fn kind(&self) -> StrategyKind {
    match self {
      Strategy::Exhaustive => StrategyKind::Exhaustive,
      Strategy::PreemptionBound { .. } => StrategyKind::PreemptionBound,
      Strategy::DelayBound { .. } => StrategyKind::DelayBound,
      Strategy::Pct { .. } => StrategyKind::Pct,
      Strategy::Random { .. } => StrategyKind::Random,
      Strategy::RaceProfile => StrategyKind::RaceProfile,
    }
  }

  /// The bound of a bounded strategy.
  pub fn bound(&self) -> Option<u32> {
    match self {
      Strategy::PreemptionBound { bound } | Strategy::DelayBound { bound } => Some(*bound),
      _ => None,
    }
  }

  /// The bound family this strategy belongs to, if any.
  pub fn family(&self) -> Option<BoundFamily> {
    match self {
      Strategy::PreemptionBound { .. } => Some(BoundFamily::Preemption),
      Strategy::DelayBound { .. } => Some(BoundFamily::Delay),
      _ => None,
    }
  }

  /// Whether two identical invocations are expected to replay the same
  /// schedules and therefore produce byte-identical output.
  pub fn is_replay_deterministic(&self) -> bool {
    self.kind().is_replay_deterministic()
  }

  /// Short label used in artifact file names.
  pub fn label(&self) -> &'static str {
    self.kind().label()
  }

  /// Value component of artifact file names.
  ///
  /// Bounded strategies use the bound; randomized ones encode
  /// `param,seed,start_index` so that chunks of one run never collide.
  pub fn artifact_value(&self, start_index: u64) -> String {
    match self {
      Strategy::Exhaustive => "0".to_string(),
      Strategy::PreemptionBound { bound } | Strategy::DelayBound { bound } => bound.to_string(),
      Strategy::Pct { depth, seed } => format!("{},{},{}", depth, seed, start_index),
      Strategy::Random { seed } => format!("0,{},{}", seed, start_index),
      Strategy::RaceProfile => start_index.to_string(),
    }
  }

  /// Engine parameters selecting this strategy.
  pub(crate) fn engine_params(&self) -> Vec<(&'static str, String)> {
    match self {
      Strategy::Exhaustive => vec![
        ("mode", "chess".to_string()),
        ("pb", "0".to_string()),
        ("delay_bound", "0".to_string()),
        ("bound", "0".to_string()),
      ],
      Strategy::PreemptionBound { bound } => vec![
        ("mode", "chess".to_string()),
        ("pb", "1".to_string()),
        ("delay_bound", "0".to_string()),
        ("bound", bound.to_string()),
      ],
      Strategy::DelayBound { bound } => vec![
        ("mode", "chess".to_string()),
        ("pb", "1".to_string()),
        ("delay_bound", "1".to_string()),
        ("bound", bound.to_string()),
      ],
      Strategy::Pct { depth, seed } => vec![
        ("mode", "pct".to_string()),
        ("bug_depth", depth.to_string()),
        ("seed", seed.to_string()),
      ],
      Strategy::Random { seed } => vec![("mode", "random".to_string()), ("seed", seed.to_string())],
      Strategy::RaceProfile => vec![("mode", "race".to_string())],
    }
  }
}

impl StrategyKind {
  pub fn is_replay_deterministic(self) -> bool {
    matches!(
      self,
      StrategyKind::Exhaustive | StrategyKind::PreemptionBound | StrategyKind::DelayBound
    )
  }

  pub fn label(self) -> &'static str {
    match self {
      StrategyKind::Exhaustive => "dfs",
      StrategyKind::PreemptionBound => "pb",
      StrategyKind::DelayBound => "db",
      StrategyKind::Pct => "pct",
      StrategyKind::Random => "random",
      StrategyKind::RaceProfile => "0race",
    }
  }

  pub fn from_label(label: &str) -> Option<Self> {
    match label {
      "dfs" => Some(StrategyKind::Exhaustive),
      "pb" => Some(StrategyKind::PreemptionBound),
      "db" => Some(StrategyKind::DelayBound),
      "pct" => Some(StrategyKind::Pct),
      "random" => Some(StrategyKind::Random),
      "0race" => Some(StrategyKind::RaceProfile),
      _ => None,
    }
  }
}

/// A strategy class parameterized by a single increasing integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundFamily {
  Preemption,
  Delay,
}

impl BoundFamily {
  pub const ALL: [BoundFamily; 2] = [BoundFamily::Preemption, BoundFamily::Delay];

  /// The strategy for this family at the given bound.
  pub fn strategy_at(self, bound: u32) -> Strategy {
    match self {
      BoundFamily::Preemption => Strategy::PreemptionBound { bound },
      BoundFamily::Delay => Strategy::DelayBound { bound },
    }
  }

  pub fn kind(self) -> StrategyKind {
    match self {
      BoundFamily::Preemption => StrategyKind::PreemptionBound,
      BoundFamily::Delay => StrategyKind::DelayBound,
    }
  }

  pub fn label(self) -> &'static str {
    self.kind().label()
  }
}

impl fmt::Display for BoundFamily {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.label())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_strategy_serialization_is_tagged() {
    let json = serde_json::to_value(Strategy::Pct { depth: 3, seed: 7 }).unwrap();
    assert_eq!(json, serde_json::json!({"kind": "pct", "depth": 3, "seed": 7}));

    let parsed: Strategy = serde_json::from_value(serde_json::json!({"kind": "exhaustive"})).unwrap();
    assert_eq!(parsed, Strategy::Exhaustive);
  }

  #[test]
  fn test_only_bounded_and_dfs_are_deterministic() {
    assert!(Strategy::Exhaustive.is_replay_deterministic());
    assert!(Strategy::DelayBound { bound: 2 }.is_replay_deterministic());
    assert!(Strategy::PreemptionBound { bound: 0 }.is_replay_deterministic());
    assert!(!Strategy::Random { seed: 1 }.is_replay_deterministic());
    assert!(!Strategy::Pct { depth: 2, seed: 1 }.is_replay_deterministic());
  }

  #[test]
  fn test_family_strategy_carries_bound() {
    for family in BoundFamily::ALL {
      assert_eq!(family.strategy_at(4).family(), Some(family));
      assert_eq!(family.strategy_at(4).bound(), Some(4));
    }
  }

  #[test]
  fn test_delay_bound_engine_params() {
    let params = Strategy::DelayBound { bound: 3 }.engine_params();
    assert!(params.contains(&("delay_bound", "1".to_string())));
    assert!(params.contains(&("bound", "3".to_string())));
    assert!(!params.iter().any(|(k, _)| *k == "seed"));
  }

  #[test]
  fn test_artifact_values_keep_chunks_apart() {
    let pct = Strategy::Pct { depth: 2, seed: 0 };
    assert_ne!(pct.artifact_value(0), pct.artifact_value(100));
    assert_eq!(Strategy::DelayBound { bound: 5 }.artifact_value(0), "5");
  }
}
