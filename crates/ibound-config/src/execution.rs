//! Engine invocation configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::strategy::Strategy;
use crate::target::Target;

/// How to launch the execution engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineCommand {
  /// Engine executable (or wrapper script)
  pub program: PathBuf,
  /// Arguments placed before the target name
  #[serde(default)]
  pub args: Vec<String>,
}

/// Sub-detector toggles forwarded to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorFlags {
  pub sched_race: bool,
  pub sched_app: bool,
  pub enable_djit: bool,
  pub check_mem: bool,
  pub add_races: bool,
}

impl Default for DetectorFlags {
  fn default() -> Self {
    Self {
      sched_race: true,
      sched_app: true,
      enable_djit: false,
      check_mem: false,
      add_races: false,
    }
  }
}

/// Settings shared by every invocation of a study.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
  pub engine: EngineCommand,
  pub timeout: Duration,
  pub schedule_budget: u64,
  pub num_threads: u32,
  pub cpu: Option<u32>,
  pub detectors: DetectorFlags,
  /// Output artifact the target writes, relative to the working directory.
  pub output_file: Option<String>,
}

/// Persisted search-state locations handed to the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchStatePaths {
  /// Directory holding the state produced by the previous level.
  pub input: Option<PathBuf>,
  /// Directory the engine writes its updated state into.
  pub output: Option<PathBuf>,
}

/// Immutable description of one engine invocation.
///
/// Built once per invocation by the driver and passed by reference down to
/// the execution controller. There is one constructor per strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionConfig {
  target: Target,
  strategy: Strategy,
  timeout: Duration,
  schedule_budget: u64,
  start_index: u64,
  engine: EngineCommand,
  working_dir: PathBuf,
  num_threads: u32,
  cpu: Option<u32>,
  detectors: DetectorFlags,
  output_file: Option<String>,
  search_state: SearchStatePaths,
}

impl ExecutionConfig {
  pub fn exhaustive(target: Target, settings: &RunSettings, working_dir: impl Into<PathBuf>) -> Self {
    Self::build(target, Strategy::Exhaustive, settings, working_dir.into())
  }

  pub fn preemption_bound(
    target: Target,
    bound: u32,
    settings: &RunSettings,
    working_dir: impl Into<PathBuf>,
  ) -> Self {
    Self::build(target, Strategy::PreemptionBound { bound }, settings, working_dir.into())
  }

  pub fn delay_bound(
    target: Target,
    bound: u32,
    settings: &RunSettings,
    working_dir: impl Into<PathBuf>,
  ) -> Self {
    Self::build(target, Strategy::DelayBound { bound }, settings, working_dir.into())
  }

  pub fn pct(
    target: Target,
    depth: u32,
    seed: u64,
    settings: &RunSettings,
    working_dir: impl Into<PathBuf>,
  ) -> Self {
    Self::build(target, Strategy::Pct { depth, seed }, settings, working_dir.into())
  }

  pub fn random(
    target: Target,
    seed: u64,
    settings: &RunSettings,
    working_dir: impl Into<PathBuf>,
  ) -> Self {
    Self::build(target, Strategy::Random { seed }, settings, working_dir.into())
  }

  pub fn race_profile(target: Target, settings: &RunSettings, working_dir: impl Into<PathBuf>) -> Self {
    Self::build(target, Strategy::RaceProfile, settings, working_dir.into())
  }

  /// Build the config for an already-constructed strategy value.
  pub fn for_strategy(
    target: Target,
    strategy: Strategy,
    settings: &RunSettings,
    working_dir: impl Into<PathBuf>,
  ) -> Self {
    Self::build(target, strategy, settings, working_dir.into())
  }

  fn build(target: Target, strategy: Strategy, settings: &RunSettings, working_dir: PathBuf) -> Self {
    let schedule_budget = target.schedule_budget.unwrap_or(settings.schedule_budget);
    Self {
      target,
      strategy,
      timeout: settings.timeout,
      schedule_budget,
      start_index: 0,
      engine: settings.engine.clone(),
      working_dir,
      num_threads: settings.num_threads,
      cpu: settings.cpu,
      detectors: settings.detectors,
      output_file: settings.output_file.clone(),
      search_state: SearchStatePaths::default(),
    }
  }

  /// First schedule index of a chunked run.
  pub fn with_start_index(mut self, start_index: u64) -> Self {
    self.start_index = start_index;
    self
  }

  /// Cap the number of schedules of this invocation.
  pub fn with_schedule_budget(mut self, schedule_budget: u64) -> Self {
    self.schedule_budget = schedule_budget;
    self
  }

  pub fn with_search_state(mut self, search_state: SearchStatePaths) -> Self {
    self.search_state = search_state;
    self
  }

  pub fn target(&self) -> &Target {
    &self.target
  }

  pub fn strategy(&self) -> Strategy {
    self.strategy
  }

  pub fn timeout(&self) -> Duration {
    self.timeout
  }

  pub fn schedule_budget(&self) -> u64 {
    self.schedule_budget
  }

  pub fn start_index(&self) -> u64 {
    self.start_index
  }

  pub fn engine(&self) -> &EngineCommand {
    &self.engine
  }

  pub fn working_dir(&self) -> &Path {
    &self.working_dir
  }

  pub fn search_state(&self) -> &SearchStatePaths {
    &self.search_state
  }

  /// Absolute path of the output artifact compared across replays.
  pub fn output_path(&self) -> Option<PathBuf> {
    self.output_file.as_ref().map(|f| self.working_dir.join(f))
  }

  /// Command-line arguments: the engine's fixed args followed by the test name.
  pub fn engine_args(&self) -> Vec<String> {
    let mut args = self.engine.args.clone();
    args.push(self.target.name.clone());
    args
  }

  /// The flat list of named parameters passed to the engine.
  pub fn engine_params(&self) -> Vec<(String, String)> {
    let flag = |b: bool| String::from(if b { "1" } else { "0" });

    let mut params: Vec<(String, String)> = vec![
      ("suite".to_string(), self.target.suite.clone()),
      ("limit".to_string(), self.schedule_budget.to_string()),
      ("start_index".to_string(), self.start_index.to_string()),
      ("timeout".to_string(), self.timeout.as_secs().to_string()),
      ("num_threads".to_string(), self.num_threads.to_string()),
      ("sched_race".to_string(), flag(self.detectors.sched_race)),
      ("sched_app".to_string(), flag(self.detectors.sched_app)),
      ("enable_djit".to_string(), flag(self.detectors.enable_djit)),
      ("check_mem".to_string(), flag(self.detectors.check_mem)),
      ("add_races".to_string(), flag(self.detectors.add_races)),
      ("output".to_string(), self.output_file.clone().unwrap_or_default()),
    ];

    params.extend(
      self
        .strategy
        .engine_params()
        .into_iter()
        .map(|(k, v)| (k.to_string(), v)),
    );

    if let Some(max_threads) = self.target.max_threads {
      params.push(("max_threads".to_string(), max_threads.to_string()));
    }
    if let Some(max_steps) = self.target.max_steps {
      params.push(("max_steps".to_string(), max_steps.to_string()));
    }
    if let Some(cpu) = self.cpu {
      params.push(("cpu".to_string(), cpu.to_string()));
    }
    if let Some(input) = &self.search_state.input {
      params.push(("search_in".to_string(), input.display().to_string()));
    }
    if let Some(output) = &self.search_state.output {
      params.push(("search_out".to_string(), output.display().to_string()));
    }

    params
  }
}
