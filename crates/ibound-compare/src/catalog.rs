//! Outcomes keyed by (target, strategy).

use std::collections::{BTreeMap, BTreeSet};

use ibound_aggregate::SearchOutcome;
use ibound_config::{Strategy, StudyDef, TargetId};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::CompareError;

/// What one strategy achieved on one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRow {
  pub target: TargetId,
  /// Report label: `IPB`, `IDB`, `DFS`, `PCT d=<k>`, `Rand` or `Race`.
  pub strategy: String,
  pub found_bug: bool,
  /// `None` when no bug was found within the budget.
  pub schedules_to_first_bug: Option<u64>,
  pub total_schedules: u64,
  pub total_buggy: u64,
  pub schedule_budget: u64,
  /// Expected schedules to a bug for sampling strategies: budget divided by
  /// the number of buggy schedules.
  pub predicted_to_bug: Option<f64>,
  pub complete: bool,
}

impl From<&SearchOutcome> for OutcomeRow {
  fn from(outcome: &SearchOutcome) -> Self {
    let predicted_to_bug = match outcome {
      SearchOutcome::Flat(s) if matches!(s.strategy, Strategy::Pct { .. } | Strategy::Random { .. }) => {
        s.result.predicted_to_bug(s.schedule_budget)
      }
      _ => None,
    };

    Self {
      target: outcome.target().clone(),
      strategy: outcome.label(),
      found_bug: outcome.found_bug(),
      schedules_to_first_bug: outcome.schedules_to_first_bug(),
      total_schedules: outcome.total_schedules(),
      total_buggy: outcome.total_buggy(),
      schedule_budget: outcome.schedule_budget(),
      predicted_to_bug,
      complete: outcome.is_complete(),
    }
  }
}

/// The strategies of a study and their outcome on every target.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
  /// Labels in the order they were planned or first seen.
  strategies: Vec<String>,
  targets: BTreeSet<TargetId>,
  rows: BTreeMap<(TargetId, String), OutcomeRow>,
}

impl Catalog {
  pub fn new() -> Self {
    Self::default()
  }

  /// An empty catalog listing the strategies a study plans to run.
  pub fn for_study(study: &StudyDef) -> Self {
    Self {
      strategies: study.strategies.iter().map(|plan| plan.label()).collect(),
      ..Self::default()
    }
  }

  pub fn from_outcomes<'a>(
    outcomes: impl IntoIterator<Item = &'a SearchOutcome>,
  ) -> Result<Self, CompareError> {
    let mut catalog = Self::new();
    for outcome in outcomes {
      catalog.insert(outcome)?;
    }
    Ok(catalog)
  }

  /// Add one outcome. A second outcome for the same (target, strategy) is
  /// rejected.
  pub fn insert(&mut self, outcome: &SearchOutcome) -> Result<(), CompareError> {
    let row = OutcomeRow::from(outcome);
    let key = (row.target.clone(), row.strategy.clone());
    if self.rows.contains_key(&key) {
      warn!(target_id = %row.target, strategy = %row.strategy, "duplicate outcome rejected");
      return Err(CompareError::Duplicate {
        target: row.target,
        strategy: row.strategy,
      });
    }

    if !self.strategies.contains(&row.strategy) {
      self.strategies.push(row.strategy.clone());
    }
    self.targets.insert(row.target.clone());
    self.rows.insert(key, row);
    Ok(())
  }

  /// Count a target as part of the universe even if nothing ran on it.
  pub fn add_target(&mut self, target: TargetId) {
    self.targets.insert(target);
  }

  pub fn strategies(&self) -> &[String] {
    &self.strategies
  }

  pub fn has_strategy(&self, strategy: &str) -> bool {
    self.strategies.iter().any(|s| s == strategy)
  }

  /// Every target of the catalog.
  pub fn targets(&self) -> &BTreeSet<TargetId> {
    &self.targets
  }

  pub fn get(&self, target: &TargetId, strategy: &str) -> Option<&OutcomeRow> {
    self.rows.get(&(target.clone(), strategy.to_string()))
  }

  /// Rows ordered by target, then by strategy order.
  pub fn rows(&self) -> impl Iterator<Item = &OutcomeRow> {
    self.targets.iter().flat_map(move |target| {
      self
        .strategies
        .iter()
        .filter_map(move |strategy| self.get(target, strategy))
    })
  }

  pub fn is_empty(&self) -> bool {
    self.rows.is_empty()
  }
}
