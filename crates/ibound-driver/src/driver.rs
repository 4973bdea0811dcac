//! Bound iteration and flat runs.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ibound_aggregate::{
  BenchmarkSearchSummary, FlatResult, FlatSummary, LevelResult, SearchOutcome, StopReason, merge_chunks,
};
use ibound_artifact::{ArtifactLayout, ArtifactName, FsStore, SEARCH_STATE_FILES, Store};
use ibound_config::{
  BoundFamily, ExecutionConfig, RunSettings, SearchStatePaths, Strategy, StrategyPlan, Target, TargetId,
};
use ibound_executor::{ExecutionRequest, ExecutionResult, Executor, OutputBaseline};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::DriverError;

/// One bound family on one target.
#[derive(Debug, Clone)]
pub struct FamilyRequest {
  pub target: Target,
  pub family: BoundFamily,
  pub schedule_budget: u64,
  pub timeout_per_run: Duration,
  /// Highest bound to run; unbounded when `None`.
  pub max_bound: Option<u32>,
}

/// One non-bound strategy on one target.
#[derive(Debug, Clone)]
pub struct FlatRequest {
  pub target: Target,
  pub strategy: Strategy,
  pub schedule_budget: u64,
  pub timeout_per_run: Duration,
  /// Invocations the budget is split over. Race profiling runs this many
  /// passes instead.
  pub chunks: u32,
}

/// Runs strategies on targets through an [`Executor`].
pub struct Driver {
  executor: Arc<dyn Executor>,
  artifacts: Arc<FsStore>,
  layout: ArtifactLayout,
  settings: RunSettings,
}

impl Driver {
  /// Create a driver.
  ///
  /// # Arguments
  /// * `executor` - Runs one engine invocation
  /// * `artifacts` - Durable store for logs and search state
  /// * `layout` - Scratch directory layout
  /// * `settings` - Study-wide engine settings
  pub fn new(
    executor: Arc<dyn Executor>,
    artifacts: Arc<FsStore>,
    layout: ArtifactLayout,
    settings: RunSettings,
  ) -> Self {
    Self {
      executor,
      artifacts,
      layout,
      settings,
    }
  }

  pub fn settings(&self) -> &RunSettings {
    &self.settings
  }

  /// Run whatever a study plan asks for on one target.
  pub async fn run_plan(
    &self,
    target: &Target,
    plan: &StrategyPlan,
    cancel: CancellationToken,
  ) -> Result<SearchOutcome, DriverError> {
    let schedule_budget = target.schedule_budget.unwrap_or(self.settings.schedule_budget);
    let timeout_per_run = self.settings.timeout;

    let family_request = |family, max_bound| FamilyRequest {
      target: target.clone(),
      family,
      schedule_budget,
      timeout_per_run,
      max_bound,
    };
    let (strategy, chunks) = match *plan {
      StrategyPlan::PreemptionBound { max_bound } => {
        let request = family_request(BoundFamily::Preemption, max_bound);
        return Ok(SearchOutcome::Family(self.run_family(request, cancel).await?));
      }
      StrategyPlan::DelayBound { max_bound } => {
        let request = family_request(BoundFamily::Delay, max_bound);
        return Ok(SearchOutcome::Family(self.run_family(request, cancel).await?));
      }
      StrategyPlan::Exhaustive => (Strategy::Exhaustive, 1),
      StrategyPlan::Pct { depth, seed, chunks } => (Strategy::Pct { depth, seed }, chunks),
      StrategyPlan::Random { seed, chunks } => (Strategy::Random { seed }, chunks),
      StrategyPlan::RaceProfile { passes } => (Strategy::RaceProfile, passes),
    };

    let request = FlatRequest {
      target: target.clone(),
      strategy,
      schedule_budget,
      timeout_per_run,
      chunks,
    };
    Ok(SearchOutcome::Flat(self.run_flat(request, cancel).await?))
  }

  /// Widen the bound from 0 until a stopping rule fires.
  ///
  /// Returns [`DriverError::Interrupted`] with the partial summary when
  /// cancelled.
  #[instrument(
    name = "run_family",
    skip(self, request, cancel),
    fields(target = %request.target.id(), family = %request.family)
  )]
  pub async fn run_family(
    &self,
    request: FamilyRequest,
    cancel: CancellationToken,
  ) -> Result<BenchmarkSearchSummary, DriverError> {
    let target_id = request.target.id();
    let label = request.family.label();
    let scratch = self.layout.scratch_dir(&target_id, label);
    let settings = self.settings_for(request.timeout_per_run);

    let mut summary = BenchmarkSearchSummary::new(target_id.clone(), request.family, request.schedule_budget);
    let mut baseline: Option<OutputBaseline> = None;
    let mut state_input: Option<PathBuf> = None;
    let mut bound = 0u32;

    loop {
      if cancel.is_cancelled() {
        summary.finalize(StopReason::Interrupted);
        return Err(DriverError::Interrupted(Box::new(SearchOutcome::Family(summary))));
      }

      let strategy = request.family.strategy_at(bound);
      let config = ExecutionConfig::for_strategy(request.target.clone(), strategy, &settings, &scratch)
        .with_schedule_budget(request.schedule_budget)
        .with_search_state(SearchStatePaths {
          input: state_input.clone(),
          output: Some(ArtifactLayout::state_out_dir(&scratch)),
        });
      let name = ArtifactName::new(&target_id, &strategy, 0, Utc::now());

      info!(bound, "level_started");
      let (result, level) = self
        .run_level(&config, &name, bound, baseline.as_ref(), &cancel)
        .await?;

      if baseline.is_none() && result.succeeded() && !level.is_corrupted() {
        baseline = OutputBaseline::capture(&config).await?;
        if baseline.is_some() {
          debug!(bound, "captured output baseline");
        }
      }

      if !result.interrupted {
        if let Some(dir) = self.relocate_state(&target_id, label, bound, &scratch).await? {
          state_input = Some(dir);
        }
      }

      let current = summary.push_level(level)?;
      info!(
        bound,
        iterative_num_schedules = current.iterative_num_schedules,
        iterative_num_buggy = current.iterative_num_buggy,
        new_schedules = current.new_schedules,
        "level_completed"
      );

      if let Some(reason) = summary.stop_after_last_level(request.max_bound) {
        info!(bound, reason = ?reason, "family stopped");
        summary.finalize(reason);
        if reason == StopReason::Interrupted {
          return Err(DriverError::Interrupted(Box::new(SearchOutcome::Family(summary))));
        }
        return Ok(summary);
      }

      bound += 1;
    }
  }

  /// Run a strategy outside a bound family, split into contiguous chunks.
  #[instrument(
    name = "run_flat",
    skip(self, request, cancel),
    fields(target = %request.target.id(), strategy = request.strategy.label())
  )]
  pub async fn run_flat(
    &self,
    request: FlatRequest,
    cancel: CancellationToken,
  ) -> Result<FlatSummary, DriverError> {
    let target_id = request.target.id();
    let scratch = self
      .layout
      .scratch_dir(&target_id, &scratch_label(&request.strategy));
    let settings = self.settings_for(request.timeout_per_run);

    if request.strategy == Strategy::RaceProfile {
      return self.run_race_passes(request, &settings, &scratch, cancel).await;
    }

    let chunks = match request.strategy {
      Strategy::Exhaustive => 1,
      _ => u64::from(request.chunks.max(1)),
    };
    let budget = request.schedule_budget;
    let start_of = |i: u64| i * budget / chunks;

    let mut levels: Vec<(u64, LevelResult)> = Vec::with_capacity(chunks as usize);
    let mut interrupted = false;

    for i in 0..chunks {
      if cancel.is_cancelled() {
        interrupted = true;
        break;
      }

      let start = start_of(i);
      let limit = start_of(i + 1) - start;
      let config = ExecutionConfig::for_strategy(request.target.clone(), request.strategy, &settings, &scratch)
        .with_start_index(start)
        .with_schedule_budget(limit);
      let name = ArtifactName::new(&target_id, &request.strategy, start, Utc::now());

      info!(chunk = i, start_index = start, limit, "chunk_started");
      let (result, level) = self.run_level(&config, &name, 0, None, &cancel).await?;
      info!(
        chunk = i,
        num_schedules = level.num_schedules,
        num_buggy = level.num_buggy,
        "chunk_completed"
      );

      levels.push((start, level));
      if result.interrupted {
        interrupted = true;
        break;
      }
    }

    let summary = FlatSummary {
      target: target_id,
      strategy: request.strategy,
      schedule_budget: budget,
      result: merge_chunks(&levels)?,
      interrupted,
    };
    if interrupted {
      return Err(DriverError::Interrupted(Box::new(SearchOutcome::Flat(summary))));
    }
    Ok(summary)
  }

  /// Race profiling passes. Their logs are kept but not parsed.
  async fn run_race_passes(
    &self,
    request: FlatRequest,
    settings: &RunSettings,
    scratch: &Path,
    cancel: CancellationToken,
  ) -> Result<FlatSummary, DriverError> {
    let target_id = request.target.id();
    let mut result = FlatResult::default();
    let mut interrupted = false;

    for pass in 0..u64::from(request.chunks.max(1)) {
      if cancel.is_cancelled() {
        interrupted = true;
        break;
      }
      let config = ExecutionConfig::race_profile(request.target.clone(), settings, scratch)
        .with_start_index(pass)
        .with_schedule_budget(request.schedule_budget);
      let name = ArtifactName::new(&target_id, &Strategy::RaceProfile, pass, Utc::now());
      let log_path = self.artifacts.path_of(&ArtifactLayout::log_key(&name))?;

      info!(pass, "race_pass_started");
      let execution = self
        .executor
        .execute(
          ExecutionRequest {
            config: &config,
            artifact: &name,
            log_path,
            baseline: None,
          },
          cancel.clone(),
        )
        .await?;

      result.chunks += 1;
      result.timed_out |= execution.timed_out;
      if execution.interrupted {
        interrupted = true;
        break;
      }
    }

    let summary = FlatSummary {
      target: target_id,
      strategy: Strategy::RaceProfile,
      schedule_budget: request.schedule_budget,
      result,
      interrupted,
    };
    if interrupted {
      return Err(DriverError::Interrupted(Box::new(SearchOutcome::Flat(summary))));
    }
    Ok(summary)
  }

  /// Execute one invocation and parse its log.
  async fn run_level(
    &self,
    config: &ExecutionConfig,
    name: &ArtifactName,
    bound: u32,
    baseline: Option<&OutputBaseline>,
    cancel: &CancellationToken,
  ) -> Result<(ExecutionResult, LevelResult), DriverError> {
    let log_path = self.artifacts.path_of(&ArtifactLayout::log_key(name))?;
    let result = self
      .executor
      .execute(
        ExecutionRequest {
          config,
          artifact: name,
          log_path,
          baseline,
        },
        cancel.clone(),
      )
      .await?;

    let mut level = LevelResult::read(bound, &result.log_path).await?;
    apply_execution(&mut level, &result);

    if let Some(reason) = &level.corrupted {
      warn!(bound, reason = %reason, log = %result.log_path.display(), "log corrupted, level excluded");
    }
    if level.suspect {
      warn!(bound, exit_status = ?result.exit_status, "engine exited abnormally without exhausting the search");
    }
    if level.output_mismatch == Some(true) {
      warn!(bound, "output differs from the first run of this family");
    }

    Ok((result, level))
  }

  /// Move the search state the engine left in the scratch directory into
  /// the durable store. Returns the durable directory when anything moved.
  async fn relocate_state(
    &self,
    target: &TargetId,
    label: &str,
    bound: u32,
    scratch: &Path,
  ) -> Result<Option<PathBuf>, DriverError> {
    let out_dir = ArtifactLayout::state_out_dir(scratch);
    let mut relocated = 0;

    for file in SEARCH_STATE_FILES {
      let src = out_dir.join(file);
      let exists = tokio::fs::try_exists(&src).await.map_err(|source| DriverError::Io {
        path: src.clone(),
        source,
      })?;
      if !exists {
        continue;
      }
      let key = ArtifactLayout::state_key(target, label, bound, file);
      self.artifacts.put_file(&key, &src).await?;
      tokio::fs::remove_file(&src).await.map_err(|source| DriverError::Io {
        path: src.clone(),
        source,
      })?;
      relocated += 1;
    }

    if relocated == 0 {
      debug!(bound, "engine left no search state");
      return Ok(None);
    }
    let dir = self
      .artifacts
      .path_of(&ArtifactLayout::state_dir_key(target, label, bound))?;
    debug!(bound, files = relocated, dir = %dir.display(), "search state relocated");
    Ok(Some(dir))
  }

  fn settings_for(&self, timeout: Duration) -> RunSettings {
    RunSettings {
      timeout,
      ..self.settings.clone()
    }
  }
}

/// Fold what the controller observed into the parsed level.
fn apply_execution(level: &mut LevelResult, result: &ExecutionResult) {
  level.timed_out |= result.timed_out;
  level.interrupted |= result.interrupted;
  level.output_mismatch = result.output_mismatch;
  level.suspect = result.exit_status != Some(0) && !level.exhausted && !level.timed_out && !level.interrupted;
}

/// Scratch directory label; seeds and depths get their own directory.
fn scratch_label(strategy: &Strategy) -> String {
  match strategy {
    Strategy::Pct { depth, seed } => format!("pct-{}-{}", depth, seed),
    Strategy::Random { seed } => format!("random-{}", seed),
    other => other.label().to_string(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn execution(exit_status: Option<i32>) -> ExecutionResult {
    ExecutionResult {
      exit_status,
      log_path: PathBuf::from("/tmp/log.txt"),
      elapsed: Duration::from_millis(5),
      timed_out: false,
      interrupted: false,
      output_mismatch: None,
    }
  }

  #[test]
  fn test_nonzero_exit_marks_suspect() {
    let mut level = LevelResult::default();
    apply_execution(&mut level, &execution(Some(1)));
    assert!(level.suspect);
  }

  #[test]
  fn test_exhausted_exit_is_not_suspect() {
    let mut level = LevelResult {
      exhausted: true,
      ..LevelResult::default()
    };
    apply_execution(&mut level, &execution(Some(1)));
    assert!(!level.suspect);
  }

  #[test]
  fn test_timeout_is_not_suspect() {
    let mut level = LevelResult::default();
    let mut result = execution(None);
    result.timed_out = true;
    apply_execution(&mut level, &result);
    assert!(level.timed_out);
    assert!(!level.suspect);
  }

  #[test]
  fn test_scratch_labels_keep_seeds_apart() {
    assert_eq!(scratch_label(&Strategy::Random { seed: 3 }), "random-3");
    assert_eq!(scratch_label(&Strategy::Pct { depth: 2, seed: 0 }), "pct-2-0");
    assert_eq!(scratch_label(&Strategy::Exhaustive), "dfs");
  }
}
