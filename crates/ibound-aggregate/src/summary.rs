//! Per-(target, family) search summary.

use ibound_config::{BoundFamily, Strategy, TargetId};
use serde::{Deserialize, Serialize};

use crate::error::AggregateError;
use crate::fold::{FlatResult, IterativeResult, fold_iterative};
use crate::log::LevelResult;

/// Why a bound family stopped widening.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StopReason {
  /// Cancelled from outside; the summary is partial.
  Interrupted,
  /// The cumulative schedule count reached the budget.
  BudgetReached,
  /// The run at `bound` hit the wall-clock timeout.
  Timeout { bound: u32 },
  /// A level added no new schedules.
  Saturated,
  /// The engine reported that no more executions remain.
  Exhausted,
  /// The configured highest bound was reached.
  MaxBound,
  /// A corrupted level followed another corrupted level or one that added
  /// no new schedules.
  Stalled { bound: u32 },
}

impl StopReason {
  /// Whether the family ran to a natural end.
  pub fn is_complete(&self) -> bool {
    !matches!(
      self,
      StopReason::Interrupted | StopReason::Timeout { .. } | StopReason::Stalled { .. }
    )
  }
}

/// Accumulated results of one bound family on one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkSearchSummary {
  pub target: TargetId,
  pub family: BoundFamily,
  pub schedule_budget: u64,
  pub levels: Vec<LevelResult>,
  pub iterative: Vec<IterativeResult>,
  /// First bound at which a new buggy schedule appeared.
  pub first_buggy_bound: Option<u32>,
  /// Some level was cut short by the schedule budget.
  pub budget_curtailed: bool,
  /// Number of levels completed below the budget.
  pub bound_reached: u32,
  pub max_threads: u32,
  pub max_enabled_threads: u32,
  pub max_scheduling_points: u64,
  pub stop_reason: Option<StopReason>,
}

impl BenchmarkSearchSummary {
  pub fn new(target: TargetId, family: BoundFamily, schedule_budget: u64) -> Self {
    Self {
      target,
      family,
      schedule_budget,
      levels: Vec::new(),
      iterative: Vec::new(),
      first_buggy_bound: None,
      budget_curtailed: false,
      bound_reached: 0,
      max_threads: 0,
      max_enabled_threads: 0,
      max_scheduling_points: 0,
      stop_reason: None,
    }
  }

  /// Build a summary from already-parsed levels.
  pub fn from_levels(
    target: TargetId,
    family: BoundFamily,
    schedule_budget: u64,
    levels: Vec<LevelResult>,
  ) -> Result<Self, AggregateError> {
    let mut summary = Self::new(target, family, schedule_budget);
    summary.iterative = fold_iterative(&levels, Some(schedule_budget))?;
    summary.levels = levels;
    summary.refresh();
    Ok(summary)
  }

  /// Append the next level and return its cumulative result.
  pub fn push_level(&mut self, level: LevelResult) -> Result<&IterativeResult, AggregateError> {
    let expected = self.levels.len() as u32;
    if level.bound != expected {
      return Err(AggregateError::BoundGap {
        expected,
        found: level.bound,
      });
    }

    let mut levels = self.levels.clone();
    levels.push(level);
    self.iterative = fold_iterative(&levels, Some(self.schedule_budget))?;
    self.levels = levels;
    self.refresh();

    // fold_iterative yields one result per level.
    Ok(&self.iterative[expected as usize])
  }

  fn refresh(&mut self) {
    self.first_buggy_bound = self
      .iterative
      .iter()
      .find(|r| r.iterative_num_before_buggy.is_some())
      .map(|r| r.bound);
    self.budget_curtailed = self.iterative.iter().any(|r| r.budget_reached);

    self.bound_reached = 0;
    self.max_threads = 0;
    self.max_enabled_threads = 0;
    self.max_scheduling_points = 0;
    for (level, it) in self.levels.iter().zip(&self.iterative) {
      if it.iterative_num_schedules < self.schedule_budget && !it.corrupted {
        self.bound_reached = level.bound + 1;
        self.max_threads = self.max_threads.max(level.max_threads);
        self.max_enabled_threads = self.max_enabled_threads.max(level.max_enabled_threads);
        self.max_scheduling_points = self.max_scheduling_points.max(level.max_scheduling_points);
      }
    }
  }

  /// Decide whether the family stops after its latest level, and why.
  ///
  /// Checks run in priority order; `None` means the next bound should run.
  pub fn stop_after_last_level(&self, max_bound: Option<u32>) -> Option<StopReason> {
    let level = self.levels.last()?;
    let current = self.iterative.last()?;

    if level.interrupted {
      return Some(StopReason::Interrupted);
    }
    if current.iterative_num_schedules >= self.schedule_budget {
      return Some(StopReason::BudgetReached);
    }
    if level.timed_out {
      return Some(StopReason::Timeout { bound: level.bound });
    }
    let previous = self
      .iterative
      .len()
      .checked_sub(2)
      .map(|i| &self.iterative[i]);
    if current.corrupted {
      // Level 0 has no predecessor to compare against.
      if previous.is_some_and(|p| p.corrupted || p.new_schedules == 0) {
        return Some(StopReason::Stalled { bound: level.bound });
      }
    } else {
      if current.iterative_num_schedules == previous.map_or(0, |p| p.iterative_num_schedules) {
        return Some(StopReason::Saturated);
      }
      if level.exhausted {
        return Some(StopReason::Exhausted);
      }
    }
    if max_bound.is_some_and(|max| level.bound >= max) {
      return Some(StopReason::MaxBound);
    }
    None
  }

  pub fn finalize(&mut self, reason: StopReason) {
    self.stop_reason = Some(reason);
  }

  pub fn is_complete(&self) -> bool {
    self.stop_reason.is_some_and(|r| r.is_complete())
  }

  pub fn last_iterative(&self) -> Option<&IterativeResult> {
    self.iterative.last()
  }

  /// Cumulative schedules to the first bug, if the bug was found within
  /// the budget.
  pub fn schedules_to_first_bug(&self) -> Option<u64> {
    let first = self
      .iterative
      .iter()
      .find(|r| r.iterative_num_before_buggy.is_some())?;
    if first.iterative_num_schedules < self.schedule_budget {
      first.iterative_num_before_buggy
    } else {
      None
    }
  }

  /// Whether the engine had not yet exhausted the space at the first buggy
  /// level.
  pub fn first_buggy_level_hit_limit(&self) -> Option<bool> {
    let bound = self.first_buggy_bound?;
    self.levels.get(bound as usize).map(LevelResult::hit_limit)
  }

  /// Levels whose output differed from the family's baseline.
  pub fn mismatched_bounds(&self) -> Vec<u32> {
    self
      .levels
      .iter()
      .filter(|l| l.output_mismatch == Some(true))
      .map(|l| l.bound)
      .collect()
  }

  /// Levels marked suspect by a non-zero exit.
  pub fn suspect_bounds(&self) -> Vec<u32> {
    self
      .levels
      .iter()
      .filter(|l| l.suspect)
      .map(|l| l.bound)
      .collect()
  }
}

/// Result of one strategy that runs outside a bound family on one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatSummary {
  pub target: TargetId,
  /// The strategy with its parameters; start indices are per chunk and not
  /// part of it.
  pub strategy: Strategy,
  pub schedule_budget: u64,
  pub result: FlatResult,
  /// Cancelled before every chunk ran.
  pub interrupted: bool,
}

impl FlatSummary {
  /// Schedules to the first bug, if one was found within the budget.
  pub fn schedules_to_first_bug(&self) -> Option<u64> {
    self
      .result
      .num_before_buggy
      .filter(|&n| n <= self.schedule_budget)
  }
}

/// What one (target, strategy) job produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SearchOutcome {
  Family(BenchmarkSearchSummary),
  Flat(FlatSummary),
}

impl SearchOutcome {
  pub fn target(&self) -> &TargetId {
    match self {
      SearchOutcome::Family(s) => &s.target,
      SearchOutcome::Flat(s) => &s.target,
    }
  }

  /// Report label of the strategy: `IPB`, `IDB`, `DFS`, `PCT d=<k>`, `Rand`
  /// or `Race`.
  pub fn label(&self) -> String {
    match self {
      SearchOutcome::Family(s) => match s.family {
        BoundFamily::Preemption => "IPB".to_string(),
        BoundFamily::Delay => "IDB".to_string(),
      },
      SearchOutcome::Flat(s) => match s.strategy {
        Strategy::Exhaustive | Strategy::PreemptionBound { .. } | Strategy::DelayBound { .. } => {
          "DFS".to_string()
        }
        Strategy::Pct { depth, .. } => format!("PCT d={}", depth),
        Strategy::Random { .. } => "Rand".to_string(),
        Strategy::RaceProfile => "Race".to_string(),
      },
    }
  }

  pub fn schedule_budget(&self) -> u64 {
    match self {
      SearchOutcome::Family(s) => s.schedule_budget,
      SearchOutcome::Flat(s) => s.schedule_budget,
    }
  }

  /// Schedules to the first bug within the budget; `None` means not found.
  pub fn schedules_to_first_bug(&self) -> Option<u64> {
    match self {
      SearchOutcome::Family(s) => s.schedules_to_first_bug(),
      SearchOutcome::Flat(s) => s.schedules_to_first_bug(),
    }
  }

  pub fn found_bug(&self) -> bool {
    self.schedules_to_first_bug().is_some()
  }

  pub fn total_schedules(&self) -> u64 {
    match self {
      SearchOutcome::Family(s) => s.last_iterative().map_or(0, |r| r.iterative_num_schedules),
      SearchOutcome::Flat(s) => s.result.num_schedules,
    }
  }

  pub fn total_buggy(&self) -> u64 {
    match self {
      SearchOutcome::Family(s) => s.last_iterative().map_or(0, |r| r.iterative_num_buggy),
      SearchOutcome::Flat(s) => s.result.num_buggy,
    }
  }

  /// Whether the job ran to its natural end.
  pub fn is_complete(&self) -> bool {
    match self {
      SearchOutcome::Family(s) => s.is_complete(),
      SearchOutcome::Flat(s) => !s.interrupted,
    }
  }
}
