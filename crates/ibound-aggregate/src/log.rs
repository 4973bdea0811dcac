//! Engine log parsing.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::AggregateError;

/// Substrings the parser looks for. Matching is by containment, one marker
/// per line, checked in the order listed here.
pub mod markers {
  pub const RACE_PROFILER: &str = "race_pct_profiler";
  pub const ERROR: &str = "ERROR";
  /// Crash signature treated like an error report.
  pub const CRASH_SIGNATURE: &str = "WARNING: rt->scriptFilenameTable is null";
  pub const BOUND_COUNT: &str = "Number of preemptions/delays:";
  pub const ENABLED_THREADS: &str = "Max num enabled threads";
  pub const THREAD_START: &str = "HandleThreadStart";
  pub const SCHEDULING_POINTS: &str = "Number of important scheduling points";
  pub const PCT_STEPS: &str = "PCT NUM STEPS:";
  pub const NO_MORE_EXECUTIONS: &str = "NO MORE EXECUTIONS";
  pub const TIMEOUT: &str = "TIMEOUT OCCURRED";
  pub const INTERRUPTED: &str = "PROBLEM: Interrupted";
  pub const SCHEDULE_START: &str = "Starting execution";
  pub const SCHEDULE_END: &str = "finished execution";
}

/// Statistics of one engine invocation, parsed from its log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelResult {
  /// Bound of the level; zero for invocations outside a bound family.
  pub bound: u32,
  pub num_schedules: u64,
  pub num_buggy: u64,
  /// 1-based position of the first buggy schedule, `-1` if none.
  pub first_buggy_index: i64,
  /// 1-based positions of all buggy schedules.
  pub buggy_indices: Vec<u64>,
  /// Schedules the engine marked as new for this bound.
  pub num_new: u64,
  /// 1-based positions of buggy schedules among the new ones.
  pub new_buggy_offsets: Vec<u64>,
  /// Whether any `Number of preemptions/delays` line was seen.
  pub saw_new_marker: bool,
  /// The engine reported `NO MORE EXECUTIONS`.
  pub exhausted: bool,
  pub max_threads: u32,
  pub max_enabled_threads: u32,
  pub max_scheduling_points: u64,
  pub max_pct_steps: u64,
  /// Last `finished execution <N>` counter reported by the engine.
  pub engine_counter: Option<u64>,
  pub timed_out: bool,
  pub interrupted: bool,
  /// Why the log cannot be trusted, if it cannot.
  pub corrupted: Option<String>,
  /// The engine exited non-zero without reporting exhaustion.
  pub suspect: bool,
  /// Result of the output determinism check for this run, if one applied.
  #[serde(default)]
  pub output_mismatch: Option<bool>,
}

impl LevelResult {
  /// Parse the log of an invocation at `bound`.
  ///
  /// Only a race-profiler log is rejected outright; malformed content marks
  /// the result corrupted instead.
  pub fn parse(bound: u32, log: &str) -> Result<Self, AggregateError> {
    let mut parser = Parser::new(bound);
    for line in log.lines() {
      parser.line(line)?;
    }
    Ok(parser.finish())
  }

  /// Read and parse a log file.
  pub async fn read(bound: u32, path: &Path) -> Result<Self, AggregateError> {
    let bytes = tokio::fs::read(path).await.map_err(|source| AggregateError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    Self::parse(bound, &String::from_utf8_lossy(&bytes))
  }

  /// `true` while the engine has not reported exhaustion.
  pub fn hit_limit(&self) -> bool {
    !self.exhausted
  }

  pub fn is_corrupted(&self) -> bool {
    self.corrupted.is_some()
  }

  pub fn found_bug(&self) -> bool {
    self.num_buggy > 0
  }
}

struct Parser {
  result: LevelResult,
  in_schedule: bool,
  buggy: bool,
  new: bool,
  started: u64,
}

impl Parser {
  fn new(bound: u32) -> Self {
    Self {
      result: LevelResult {
        bound,
        first_buggy_index: -1,
        ..LevelResult::default()
      },
      in_schedule: false,
      buggy: false,
      new: false,
      started: 0,
    }
  }

  fn corrupt(&mut self, reason: String) {
    if self.result.corrupted.is_none() {
      self.result.corrupted = Some(reason);
    }
  }

  fn number(&mut self, line: &str, marker: &str) -> Option<u64> {
    let value = number_after(line, marker);
    if value.is_none() {
      self.corrupt(format!("malformed marker line: {}", line.trim()));
    }
    value
  }

  fn line(&mut self, line: &str) -> Result<(), AggregateError> {
    use markers::*;

    if line.contains(RACE_PROFILER) {
      return Err(AggregateError::RaceProfilerLog);
    } else if line.contains(ERROR) || line.contains(CRASH_SIGNATURE) {
      self.buggy = true;
    } else if line.contains(BOUND_COUNT) {
      self.result.saw_new_marker = true;
      if let Some(n) = self.number(line, BOUND_COUNT) {
        if n == u64::from(self.result.bound) {
          self.new = true;
        }
      }
    } else if line.contains(ENABLED_THREADS) {
      if let Some(n) = self.number(line, ENABLED_THREADS) {
        let n = u32::try_from(n).unwrap_or(u32::MAX);
        self.result.max_enabled_threads = self.result.max_enabled_threads.max(n);
      }
    } else if line.contains(THREAD_START) {
      if let Some(n) = self.number(line, THREAD_START) {
        let n = u32::try_from(n).unwrap_or(u32::MAX);
        self.result.max_threads = self.result.max_threads.max(n);
      }
    } else if line.contains(SCHEDULING_POINTS) {
      if let Some(n) = self.number(line, SCHEDULING_POINTS) {
        self.result.max_scheduling_points = self.result.max_scheduling_points.max(n);
      }
    } else if line.contains(PCT_STEPS) {
      if let Some(n) = self.number(line, PCT_STEPS) {
        self.result.max_pct_steps = self.result.max_pct_steps.max(n);
      }
    } else if line.contains(NO_MORE_EXECUTIONS) {
      self.result.exhausted = true;
    } else if line.contains(TIMEOUT) {
      self.result.timed_out = true;
    } else if line.contains(INTERRUPTED) {
      self.result.interrupted = true;
    } else if line.contains(SCHEDULE_START) {
      self.start_schedule();
    } else if line.contains(SCHEDULE_END) {
      let counter = self.number(line, SCHEDULE_END);
      self.finish_schedule(counter);
    }
    Ok(())
  }

  fn start_schedule(&mut self) {
    self.started += 1;
    if self.result.exhausted {
      self.corrupt(format!(
        "schedule {} started after NO MORE EXECUTIONS",
        self.started
      ));
    }
    if self.in_schedule {
      self.corrupt(format!(
        "schedule {} started before schedule {} finished",
        self.started,
        self.started - 1
      ));
    }
    self.in_schedule = true;
  }

  fn finish_schedule(&mut self, counter: Option<u64>) {
    if self.result.exhausted {
      self.corrupt("schedule finished after NO MORE EXECUTIONS".to_string());
    }
    if counter.is_some() {
      self.result.engine_counter = counter;
    }

    let r = &mut self.result;
    r.num_schedules += 1;
    if self.new {
      r.num_new += 1;
    }
    if self.buggy {
      r.num_buggy += 1;
      r.buggy_indices.push(r.num_schedules);
      if r.first_buggy_index == -1 {
        r.first_buggy_index = r.num_schedules as i64;
      }
      if self.new {
        r.new_buggy_offsets.push(r.num_new);
      }
    }

    self.in_schedule = false;
    self.buggy = false;
    self.new = false;
  }

  fn finish(mut self) -> LevelResult {
    let stopped = self.result.timed_out || self.result.interrupted;
    if self.in_schedule && !stopped {
      self.corrupt(format!("schedule {} started but never finished", self.started));
    }
    self.result
  }
}

fn number_after(line: &str, marker: &str) -> Option<u64> {
  let (_, rest) = line.split_once(marker)?;
  let digits: String = rest
    .trim_start()
    .chars()
    .take_while(|c| c.is_ascii_digit())
    .collect();
  digits.parse().ok()
}
