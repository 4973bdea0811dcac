use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ibound_aggregate::{SearchOutcome, StopReason};
use ibound_artifact::{ArtifactLayout, FsStore};
use ibound_config::{
  BoundFamily, DetectorFlags, EngineCommand, ExecutionConfig, RunSettings, Strategy, StrategyPlan, Target,
};
use ibound_driver::{Driver, DriverError, FamilyRequest, FlatRequest, Job, StudyRunner};
use ibound_executor::{ExecutionError, ExecutionRequest, ExecutionResult, Executor};
use ibound_store::{SqliteStore, Store};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct Scripted {
  log: String,
  exit_status: Option<i32>,
  timed_out: bool,
  interrupted: bool,
  writes_state: bool,
  /// Contents of the output artifact the run leaves behind.
  output: Option<&'static str>,
}

fn ok(log: String) -> Scripted {
  Scripted {
    log,
    exit_status: Some(0),
    ..Scripted::default()
  }
}

#[derive(Debug, Clone)]
struct Launch {
  strategy: Strategy,
  start_index: u64,
  limit: u64,
  search_in: Option<PathBuf>,
  baseline: Option<Vec<u8>>,
}

type Script = Box<dyn Fn(&ExecutionConfig) -> Scripted + Send + Sync>;

/// Stands in for the engine: writes a scripted log and records every launch.
struct FakeEngine {
  script: Script,
  launches: Mutex<Vec<Launch>>,
}

impl FakeEngine {
  fn new(script: impl Fn(&ExecutionConfig) -> Scripted + Send + Sync + 'static) -> Arc<Self> {
    Arc::new(Self {
      script: Box::new(script),
      launches: Mutex::new(Vec::new()),
    })
  }

  fn launches(&self) -> Vec<Launch> {
    self.launches.lock().unwrap().clone()
  }
}

#[async_trait]
impl Executor for FakeEngine {
  async fn execute(
    &self,
    request: ExecutionRequest<'_>,
    _cancel: CancellationToken,
  ) -> Result<ExecutionResult, ExecutionError> {
    let config = request.config;
    self.launches.lock().unwrap().push(Launch {
      strategy: config.strategy(),
      start_index: config.start_index(),
      limit: config.schedule_budget(),
      search_in: config.search_state().input.clone(),
      baseline: request.baseline.map(|b| b.as_bytes().to_vec()),
    });
    let scripted = (self.script)(config);

    tokio::fs::create_dir_all(request.log_path.parent().unwrap()).await.unwrap();
    tokio::fs::write(&request.log_path, &scripted.log).await.unwrap();
    if scripted.writes_state {
      let out = config.search_state().output.clone().unwrap();
      tokio::fs::create_dir_all(&out).await.unwrap();
      tokio::fs::write(out.join("search.db"), b"state").await.unwrap();
    }
    let mut output_mismatch = None;
    if let Some(output) = scripted.output {
      let path = config.output_path().unwrap();
      tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
      tokio::fs::write(&path, output).await.unwrap();
      output_mismatch = request.baseline.map(|b| b.as_bytes() != output.as_bytes());
    }

    Ok(ExecutionResult {
      exit_status: scripted.exit_status,
      log_path: request.log_path,
      elapsed: Duration::from_millis(1),
      timed_out: scripted.timed_out,
      interrupted: scripted.interrupted,
      output_mismatch,
    })
  }
}

/// A log of `n` schedules without new-schedule markers.
fn schedules(n: u64, buggy_at: &[u64]) -> String {
  let mut log = String::new();
  for i in 1..=n {
    log.push_str("Starting execution\n");
    if buggy_at.contains(&i) {
      log.push_str("ERROR: assertion failed\n");
    }
    log.push_str(&format!("finished execution {}\n", i));
  }
  log
}

/// A log with `old` schedules from lower bounds followed by `new` schedules
/// at `bound`; `new_buggy` are 1-based offsets among the new ones.
fn marked(bound: u32, old: u64, new: u64, new_buggy: &[u64]) -> String {
  let mut log = String::new();
  for i in 1..=old + new {
    let is_new = i > old;
    log.push_str("Starting execution\n");
    if is_new && new_buggy.contains(&(i - old)) {
      log.push_str("ERROR: deadlock\n");
    }
    let count = if is_new { bound } else { bound.saturating_sub(1) };
    log.push_str(&format!("Number of preemptions/delays: {}\n", count));
    log.push_str(&format!("finished execution {}\n", i));
  }
  log
}

fn bound_of(config: &ExecutionConfig) -> usize {
  config.strategy().bound().unwrap() as usize
}

fn settings() -> RunSettings {
  RunSettings {
    engine: EngineCommand {
      program: PathBuf::from("/opt/engine/run.sh"),
      args: vec![],
    },
    timeout: Duration::from_secs(30),
    schedule_budget: 100,
    num_threads: 2,
    cpu: None,
    detectors: DetectorFlags::default(),
    output_file: None,
  }
}

fn driver(dir: &Path, engine: Arc<FakeEngine>) -> Driver {
  driver_with(dir, engine, settings())
}

fn driver_with(dir: &Path, engine: Arc<FakeEngine>, settings: RunSettings) -> Driver {
  Driver::new(
    engine,
    Arc::new(FsStore::new(dir.join("results"))),
    ArtifactLayout::new(dir.join("scratch")),
    settings,
  )
}

/// A log of `n` finished schedules followed by one the engine never
/// finished.
fn crashed(n: u64) -> Scripted {
  Scripted {
    log: format!("{}Starting execution\n", schedules(n, &[])),
    exit_status: Some(139),
    ..Scripted::default()
  }
}

fn family(budget: u64) -> FamilyRequest {
  FamilyRequest {
    target: Target::new("chess", "WSQ"),
    family: BoundFamily::Delay,
    schedule_budget: budget,
    timeout_per_run: Duration::from_secs(30),
    max_bound: None,
  }
}

fn launched_bounds(engine: &FakeEngine) -> Vec<u32> {
  engine
    .launches()
    .iter()
    .map(|l| l.strategy.bound().unwrap())
    .collect()
}

#[tokio::test]
async fn test_family_saturates_when_no_new_schedules() {
  let dir = tempfile::tempdir().unwrap();
  let engine = FakeEngine::new(|config| ok(schedules([3, 5, 5][bound_of(config)], &[])));

  let summary = driver(dir.path(), engine.clone())
    .run_family(family(10_000), CancellationToken::new())
    .await
    .unwrap();

  let counts: Vec<u64> = summary.iterative.iter().map(|r| r.iterative_num_schedules).collect();
  assert_eq!(counts, vec![3, 5, 5]);
  assert_eq!(summary.stop_reason, Some(StopReason::Saturated));
  assert!(summary.is_complete());
  assert_eq!(launched_bounds(&engine), vec![0, 1, 2]);
}

#[tokio::test]
async fn test_first_bug_counts_schedules_of_lower_bounds() {
  let dir = tempfile::tempdir().unwrap();
  let engine = FakeEngine::new(|config| {
    ok(match bound_of(config) {
      0 => marked(0, 0, 3, &[]),
      1 => marked(1, 3, 4, &[2]),
      _ => marked(2, 7, 0, &[]),
    })
  });

  let summary = driver(dir.path(), engine.clone())
    .run_family(family(10_000), CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(summary.first_buggy_bound, Some(1));
  assert_eq!(summary.schedules_to_first_bug(), Some(5));
  assert_eq!(summary.iterative[1].iterative_num_buggy, 1);
  assert_eq!(summary.stop_reason, Some(StopReason::Saturated));
}

#[tokio::test]
async fn test_timeout_stops_family_without_next_level() {
  let dir = tempfile::tempdir().unwrap();
  let engine = FakeEngine::new(|config| match bound_of(config) {
    0 => ok(schedules(3, &[])),
    _ => Scripted {
      log: format!("{}Starting execution\n\nTIMEOUT OCCURRED\n", schedules(4, &[])),
      exit_status: None,
      timed_out: true,
      ..Scripted::default()
    },
  });

  let summary = driver(dir.path(), engine.clone())
    .run_family(family(10_000), CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(summary.stop_reason, Some(StopReason::Timeout { bound: 1 }));
  assert!(!summary.is_complete());
  assert!(summary.levels[1].timed_out);
  assert!(summary.suspect_bounds().is_empty());
  assert_eq!(launched_bounds(&engine), vec![0, 1]);
}

#[tokio::test]
async fn test_budget_stops_before_next_level() {
  let dir = tempfile::tempdir().unwrap();
  let engine = FakeEngine::new(|config| ok(schedules([4, 9, 12][bound_of(config)], &[])));

  let summary = driver(dir.path(), engine.clone())
    .run_family(family(6), CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(summary.stop_reason, Some(StopReason::BudgetReached));
  assert_eq!(summary.last_iterative().unwrap().iterative_num_schedules, 6);
  assert!(summary.budget_curtailed);
  assert_eq!(launched_bounds(&engine), vec![0, 1]);
  assert!(engine.launches().iter().all(|l| l.limit == 6));
}

#[tokio::test]
async fn test_max_bound_ends_family() {
  let dir = tempfile::tempdir().unwrap();
  let engine = FakeEngine::new(|config| ok(schedules(2 * (bound_of(config) as u64 + 1), &[])));

  let mut request = family(10_000);
  request.max_bound = Some(2);
  let summary = driver(dir.path(), engine.clone())
    .run_family(request, CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(summary.stop_reason, Some(StopReason::MaxBound));
  assert_eq!(launched_bounds(&engine), vec![0, 1, 2]);
}

#[tokio::test]
async fn test_interrupted_level_returns_partial_summary() {
  let dir = tempfile::tempdir().unwrap();
  let engine = FakeEngine::new(|config| match bound_of(config) {
    0 => ok(schedules(3, &[1])),
    _ => Scripted {
      log: format!("{}PROBLEM: Interrupted\n", schedules(2, &[])),
      exit_status: None,
      interrupted: true,
      ..Scripted::default()
    },
  });

  let err = driver(dir.path(), engine.clone())
    .run_family(family(10_000), CancellationToken::new())
    .await
    .unwrap_err();

  let DriverError::Interrupted(partial) = err else {
    panic!("expected an interrupted error");
  };
  let SearchOutcome::Family(summary) = *partial else {
    panic!("expected a family outcome");
  };
  assert_eq!(summary.levels.len(), 2);
  assert_eq!(summary.stop_reason, Some(StopReason::Interrupted));
  assert!(!summary.is_complete());
  assert_eq!(summary.schedules_to_first_bug(), Some(1));
  assert_eq!(launched_bounds(&engine), vec![0, 1]);
}

#[tokio::test]
async fn test_cancelled_family_launches_nothing() {
  let dir = tempfile::tempdir().unwrap();
  let engine = FakeEngine::new(|_| ok(schedules(1, &[])));
  let cancel = CancellationToken::new();
  cancel.cancel();

  let err = driver(dir.path(), engine.clone())
    .run_family(family(10_000), cancel)
    .await
    .unwrap_err();

  assert!(matches!(err, DriverError::Interrupted(_)));
  assert!(engine.launches().is_empty());
}

#[tokio::test]
async fn test_nonzero_exit_marks_level_suspect_and_continues() {
  let dir = tempfile::tempdir().unwrap();
  let engine = FakeEngine::new(|config| Scripted {
    log: schedules(2, &[]),
    exit_status: Some(if bound_of(config) == 0 { 134 } else { 0 }),
    ..Scripted::default()
  });

  let summary = driver(dir.path(), engine.clone())
    .run_family(family(10_000), CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(summary.suspect_bounds(), vec![0]);
  assert_eq!(launched_bounds(&engine), vec![0, 1]);
}

#[tokio::test]
async fn test_corrupted_level_is_skipped_and_family_continues() {
  let dir = tempfile::tempdir().unwrap();
  let engine = FakeEngine::new(|config| match bound_of(config) {
    0 => ok(schedules(3, &[])),
    1 => crashed(2),
    _ => ok(schedules(7, &[])),
  });

  let summary = driver(dir.path(), engine.clone())
    .run_family(family(10_000), CancellationToken::new())
    .await
    .unwrap();

  let counts: Vec<u64> = summary.iterative.iter().map(|r| r.iterative_num_schedules).collect();
  assert_eq!(counts, vec![3, 3, 7, 7]);
  assert!(summary.iterative[1].corrupted);
  assert!(summary.levels[1].is_corrupted());
  assert_eq!(summary.iterative[2].new_schedules, 4);
  assert_eq!(summary.stop_reason, Some(StopReason::Saturated));
  assert_eq!(launched_bounds(&engine), vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn test_engine_crashing_at_every_bound_stalls_family() {
  let dir = tempfile::tempdir().unwrap();
  let engine = FakeEngine::new(|_| crashed(2));

  let summary = tokio::time::timeout(
    Duration::from_secs(10),
    driver(dir.path(), engine.clone()).run_family(family(10_000), CancellationToken::new()),
  )
  .await
  .expect("family should stop on its own")
  .unwrap();

  assert_eq!(summary.stop_reason, Some(StopReason::Stalled { bound: 1 }));
  assert!(!summary.is_complete());
  assert_eq!(summary.last_iterative().unwrap().iterative_num_schedules, 0);
  assert_eq!(launched_bounds(&engine), vec![0, 1]);
}

#[tokio::test]
async fn test_baseline_from_first_successful_level_flags_divergence() {
  let dir = tempfile::tempdir().unwrap();
  let engine = FakeEngine::new(|config| {
    let bound = bound_of(config);
    let output = ["crash", "sum=3\n", "sum=3\n", "sum=4\n", "sum=3\n"][bound];
    Scripted {
      output: Some(output),
      exit_status: Some(if bound == 0 { 134 } else { 0 }),
      ..ok(schedules([2, 4, 6, 8, 8][bound], &[]))
    }
  });
  let settings = RunSettings {
    output_file: Some("output.txt".to_string()),
    ..settings()
  };

  let summary = driver_with(dir.path(), engine.clone(), settings)
    .run_family(family(10_000), CancellationToken::new())
    .await
    .unwrap();

  let baselines: Vec<Option<Vec<u8>>> = engine.launches().into_iter().map(|l| l.baseline).collect();
  let sum3 = Some(b"sum=3\n".to_vec());
  assert_eq!(baselines, vec![None, None, sum3.clone(), sum3.clone(), sum3]);

  let mismatches: Vec<Option<bool>> = summary.levels.iter().map(|l| l.output_mismatch).collect();
  assert_eq!(mismatches, vec![None, None, Some(false), Some(true), Some(false)]);
  assert_eq!(summary.mismatched_bounds(), vec![3]);
  assert_eq!(summary.suspect_bounds(), vec![0]);
  assert_eq!(summary.stop_reason, Some(StopReason::Saturated));
}

#[tokio::test]
async fn test_search_state_is_carried_to_next_level() {
  let dir = tempfile::tempdir().unwrap();
  let engine = FakeEngine::new(|config| Scripted {
    writes_state: true,
    ..ok(schedules([2, 4, 4][bound_of(config)], &[]))
  });

  driver(dir.path(), engine.clone())
    .run_family(family(10_000), CancellationToken::new())
    .await
    .unwrap();

  let results = dir.path().join("results");
  let inputs: Vec<Option<PathBuf>> = engine.launches().into_iter().map(|l| l.search_in).collect();
  assert_eq!(
    inputs,
    vec![
      None,
      Some(results.join("state/chess--WSQ--db--0")),
      Some(results.join("state/chess--WSQ--db--1")),
    ]
  );
  assert!(results.join("state/chess--WSQ--db--2/search.db").exists());
  assert!(!dir.path().join("scratch/chess--WSQ--db/state-out/search.db").exists());
}

#[tokio::test]
async fn test_random_chunks_have_contiguous_start_indices() {
  let dir = tempfile::tempdir().unwrap();
  let engine = FakeEngine::new(|config| {
    let buggy: &[u64] = if config.start_index() == 3 { &[2] } else { &[] };
    ok(schedules(config.schedule_budget(), buggy))
  });

  let request = FlatRequest {
    target: Target::new("CS", "reorder_3_bad"),
    strategy: Strategy::Random { seed: 7 },
    schedule_budget: 10,
    timeout_per_run: Duration::from_secs(30),
    chunks: 3,
  };
  let summary = driver(dir.path(), engine.clone())
    .run_flat(request, CancellationToken::new())
    .await
    .unwrap();

  let chunks: Vec<(u64, u64)> = engine
    .launches()
    .iter()
    .map(|l| (l.start_index, l.limit))
    .collect();
  assert_eq!(chunks, vec![(0, 3), (3, 3), (6, 4)]);
  assert_eq!(summary.result.num_schedules, 10);
  assert_eq!(summary.result.chunks, 3);
  assert_eq!(summary.schedules_to_first_bug(), Some(5));
  assert!(!summary.interrupted);
}

#[tokio::test]
async fn test_exhaustive_runs_once_with_full_budget() {
  let dir = tempfile::tempdir().unwrap();
  let engine = FakeEngine::new(|_| ok(format!("{}NO MORE EXECUTIONS\n", schedules(4, &[]))));

  let outcome = driver(dir.path(), engine.clone())
    .run_plan(
      &Target::new("chess", "WSQ"),
      &StrategyPlan::Exhaustive,
      CancellationToken::new(),
    )
    .await
    .unwrap();

  assert_eq!(engine.launches().len(), 1);
  assert_eq!(engine.launches()[0].limit, 100);
  assert_eq!(outcome.label(), "DFS");
  assert_eq!(outcome.total_schedules(), 4);
  assert!(!outcome.found_bug());
}

#[tokio::test]
async fn test_study_runner_stores_every_outcome() {
  let dir = tempfile::tempdir().unwrap();
  let engine = FakeEngine::new(|config| match config.strategy() {
    Strategy::Random { .. } => ok(schedules(config.schedule_budget(), &[1])),
    _ => ok(schedules([1, 1][bound_of(config)], &[])),
  });
  let driver = Arc::new(driver(dir.path(), engine.clone()));
  let store = Arc::new(SqliteStore::in_memory().await.unwrap());

  let mut jobs = Vec::new();
  for name in ["A", "B"] {
    for plan in [
      StrategyPlan::DelayBound { max_bound: None },
      StrategyPlan::Random { seed: 0, chunks: 2 },
    ] {
      jobs.push(Job {
        target: Target::new("chess", name),
        plan,
      });
    }
  }

  let runner = StudyRunner::new(driver, store.clone(), 2);
  let report = runner.run("smoke", jobs, CancellationToken::new()).await.unwrap();

  assert_eq!(report.completed, 4);
  assert_eq!(report.failed, 0);
  assert_eq!(report.written, 4);
  let outcomes = store.latest_outcomes("smoke").await.unwrap();
  assert_eq!(outcomes.len(), 4);
  assert_eq!(outcomes.iter().filter(|o| o.found_bug()).count(), 2);
}

#[tokio::test]
async fn test_cancelled_study_skips_pending_jobs() {
  let dir = tempfile::tempdir().unwrap();
  let engine = FakeEngine::new(|_| ok(schedules(1, &[])));
  let driver = Arc::new(driver(dir.path(), engine.clone()));
  let store = Arc::new(SqliteStore::in_memory().await.unwrap());
  let cancel = CancellationToken::new();
  cancel.cancel();

  let jobs = vec![Job {
    target: Target::new("chess", "WSQ"),
    plan: StrategyPlan::Exhaustive,
  }];
  let report = StudyRunner::new(driver, store.clone(), 1)
    .run("cancelled", jobs, cancel)
    .await
    .unwrap();

  assert_eq!(report.skipped, 1);
  assert_eq!(report.written, 0);
  assert!(engine.launches().is_empty());
}
