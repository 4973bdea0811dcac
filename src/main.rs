use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ibound_aggregate::SearchOutcome;
use ibound_aggregate::tabulate::tabulate_dir;
use ibound_artifact::{ArtifactLayout, FsStore};
use ibound_compare::{Catalog, Comparator, table};
use ibound_config::{BoundFamily, StudyDef, Target};
use ibound_driver::{Driver, DriverError, FamilyRequest, Job, StudyRunner};
use ibound_executor::ExecutionController;
use ibound_store::{SqliteStore, Store};

/// ibound - incremental bounded search over concurrent programs
#[derive(Parser)]
#[command(name = "ibound")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.ibound)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  /// Number of concurrent (target, strategy) jobs
  #[arg(long, global = true)]
  workers: Option<usize>,

  /// Schedule budget per (target, strategy)
  #[arg(long, global = true)]
  budget: Option<u64>,

  /// Wall-clock timeout per engine invocation, in seconds
  #[arg(long, global = true)]
  timeout: Option<u64>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Run every strategy of a study on every target
  Run {
    /// Path to the study definition (JSON)
    study_file: PathBuf,
  },

  /// Run one bound family on one target
  Family {
    /// Path to the study definition (JSON)
    study_file: PathBuf,

    /// Target as `suite/name`
    #[arg(long)]
    target: String,

    /// Bound family
    #[arg(long, value_enum, default_value = "db")]
    family: FamilyArg,

    /// Highest bound to run
    #[arg(long)]
    max_bound: Option<u32>,
  },

  /// Rebuild summaries from a directory of existing logs
  Tabulate {
    /// Directory holding the logs
    log_dir: PathBuf,

    #[arg(long, value_enum, default_value = "json")]
    format: Format,
  },

  /// Compare the strategies of a stored study
  Compare {
    /// Study name
    study: String,

    /// Strategies to compare (report labels, e.g. IDB, Rand, "PCT d=2");
    /// all when omitted
    #[arg(long, value_delimiter = ',')]
    strategies: Vec<String>,

    /// Schedule counts at which to evaluate the cumulative curve
    #[arg(long, value_delimiter = ',')]
    points: Vec<u64>,

    #[arg(long, value_enum, default_value = "json")]
    format: Format,
  },

  /// List stored studies
  Studies,
}

#[derive(Clone, Copy, ValueEnum)]
enum FamilyArg {
  /// Iterative preemption bounding
  #[value(name = "pb", alias = "preemption")]
  Preemption,
  /// Iterative delay bounding
  #[value(name = "db", alias = "delay")]
  Delay,
}

impl From<FamilyArg> for BoundFamily {
  fn from(arg: FamilyArg) -> Self {
    match arg {
      FamilyArg::Preemption => BoundFamily::Preemption,
      FamilyArg::Delay => BoundFamily::Delay,
    }
  }
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
  Json,
  Csv,
}

struct Overrides {
  workers: Option<usize>,
  budget: Option<u64>,
  timeout: Option<u64>,
}

impl Overrides {
  fn apply(&self, study: &mut StudyDef) -> Result<()> {
    if let Some(workers) = self.workers {
      study.workers = workers;
    }
    if let Some(budget) = self.budget {
      study.schedule_budget = budget;
    }
    if let Some(timeout) = self.timeout {
      study.timeout_secs = timeout;
    }
    study.validate().context("invalid study after applying overrides")?;
    Ok(())
  }
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".ibound"),
  };
  let overrides = Overrides {
    workers: cli.workers,
    budget: cli.budget,
    timeout: cli.timeout,
  };

  let Some(command) = cli.command else {
    println!("ibound - use --help to see available commands");
    return Ok(());
  };

  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async move {
    match command {
      Commands::Run { study_file } => run_study(&study_file, &data_dir, &overrides).await,
      Commands::Family {
        study_file,
        target,
        family,
        max_bound,
      } => run_family(&study_file, &data_dir, &overrides, &target, family.into(), max_bound).await,
      Commands::Tabulate { log_dir, format } => {
        tabulate(&log_dir, overrides.budget.unwrap_or(10_000), format).await
      }
      Commands::Compare {
        study,
        strategies,
        points,
        format,
      } => compare(&data_dir, &study, &strategies, &points, format).await,
      Commands::Studies => list_studies(&data_dir).await,
    }
  })
}

/// Cancel `token` on Ctrl-C so every running engine is stopped.
fn cancel_on_ctrl_c() -> CancellationToken {
  let cancel = CancellationToken::new();
  let token = cancel.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      warn!("interrupt received, stopping running engines");
      token.cancel();
    }
  });
  cancel
}

fn load_study(study_file: &Path, overrides: &Overrides) -> Result<(StudyDef, PathBuf)> {
  let mut study = StudyDef::load(study_file)
    .with_context(|| format!("failed to load study file: {}", study_file.display()))?;
  overrides.apply(&mut study)?;
  let base_dir = study_file
    .parent()
    .map(Path::to_path_buf)
    .unwrap_or_default();
  Ok((study, base_dir))
}

async fn open_store(data_dir: &Path) -> Result<SqliteStore> {
  tokio::fs::create_dir_all(data_dir)
    .await
    .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;
  SqliteStore::open(&data_dir.join("ibound.db"))
    .await
    .context("failed to open result store")
}

fn build_driver(study: &StudyDef, base_dir: &Path, data_dir: &Path) -> Driver {
  let results_dir = match &study.results_dir {
    Some(dir) => base_dir.join(dir),
    None => data_dir.join("results").join(&study.name),
  };
  let scratch_dir = match &study.scratch_dir {
    Some(dir) => base_dir.join(dir),
    None => data_dir.join("scratch").join(&study.name),
  };
  info!(results = %results_dir.display(), scratch = %scratch_dir.display(), "artifact directories");

  let artifacts = Arc::new(FsStore::new(results_dir));
  let controller = ExecutionController::new(artifacts.clone());
  Driver::new(
    Arc::new(controller),
    artifacts,
    ArtifactLayout::new(scratch_dir),
    study.run_settings(),
  )
}

async fn run_study(study_file: &Path, data_dir: &Path, overrides: &Overrides) -> Result<()> {
  let (study, base_dir) = load_study(study_file, overrides)?;
  let targets = study
    .resolve_targets(&base_dir)
    .context("failed to resolve targets")?;
  eprintln!(
    "Loaded study: {} ({} targets, {} strategies)",
    study.name,
    targets.len(),
    study.strategies.len()
  );

  let jobs: Vec<Job> = targets
    .iter()
    .flat_map(|target| {
      study.strategies.iter().map(move |plan| Job {
        target: target.clone(),
        plan: plan.clone(),
      })
    })
    .collect();

  let store: Arc<dyn Store> = Arc::new(open_store(data_dir).await?);
  let driver = Arc::new(build_driver(&study, &base_dir, data_dir));
  let runner = StudyRunner::new(driver, store, study.workers);

  let report = runner
    .run(&study.name, jobs, cancel_on_ctrl_c())
    .await
    .context("study run failed")?;

  eprintln!(
    "Study finished: {} completed, {} interrupted, {} failed, {} skipped, {} stored",
    report.completed, report.interrupted, report.failed, report.skipped, report.written
  );
  if report.failed > 0 {
    bail!("{} jobs failed", report.failed);
  }
  Ok(())
}

async fn run_family(
  study_file: &Path,
  data_dir: &Path,
  overrides: &Overrides,
  target: &str,
  family: BoundFamily,
  max_bound: Option<u32>,
) -> Result<()> {
  let (study, base_dir) = load_study(study_file, overrides)?;
  let (suite, name) = target
    .rsplit_once('/')
    .with_context(|| format!("target '{}' must be given as suite/name", target))?;

  let wanted = Target::new(suite, name).id();
  let target = study
    .resolve_targets(&base_dir)
    .context("failed to resolve targets")?
    .into_iter()
    .find(|t| t.id() == wanted)
    .unwrap_or_else(|| Target::new(suite, name));

  let driver = build_driver(&study, &base_dir, data_dir);
  let request = FamilyRequest {
    schedule_budget: target.schedule_budget.unwrap_or(study.schedule_budget),
    timeout_per_run: Duration::from_secs(study.timeout_secs),
    target,
    family,
    max_bound,
  };

  let summary = match driver.run_family(request, cancel_on_ctrl_c()).await {
    Ok(summary) => SearchOutcome::Family(summary),
    Err(DriverError::Interrupted(partial)) => {
      warn!("family interrupted, printing partial summary");
      *partial
    }
    Err(e) => return Err(e).context("family run failed"),
  };

  println!("{}", serde_json::to_string_pretty(&summary)?);
  Ok(())
}

async fn tabulate(log_dir: &Path, budget: u64, format: Format) -> Result<()> {
  let tabulation = tabulate_dir(log_dir, budget)
    .await
    .with_context(|| format!("failed to tabulate {}", log_dir.display()))?;

  match format {
    Format::Json => println!("{}", serde_json::to_string_pretty(&tabulation)?),
    Format::Csv => {
      let outcomes: Vec<SearchOutcome> = tabulation
        .families
        .into_iter()
        .map(SearchOutcome::Family)
        .chain(tabulation.flat.into_iter().map(SearchOutcome::Flat))
        .collect();
      let catalog = Catalog::from_outcomes(&outcomes)?;
      print!("{}", table::to_csv(&catalog));
    }
  }
  Ok(())
}

async fn compare(
  data_dir: &Path,
  study: &str,
  strategies: &[String],
  points: &[u64],
  format: Format,
) -> Result<()> {
  let store = open_store(data_dir).await?;
  let outcomes = store
    .latest_outcomes(study)
    .await
    .with_context(|| format!("failed to load outcomes of study '{}'", study))?;
  if outcomes.is_empty() {
    bail!("study '{}' has no stored outcomes", study);
  }
  let catalog = Catalog::from_outcomes(&outcomes)?;

  if let Format::Csv = format {
    print!("{}", table::to_csv(&catalog));
    return Ok(());
  }

  let selected: Vec<&str> = if strategies.is_empty() {
    catalog.strategies().iter().map(String::as_str).collect()
  } else {
    strategies.iter().map(String::as_str).collect()
  };

  let comparator = Comparator::new(&catalog);
  let sets = comparator.set_report(&selected)?;
  let venn = match selected.as_slice() {
    &[a, b, c] => Some(comparator.venn3([a, b, c])?),
    _ => None,
  };
  let mut curves = serde_json::Map::new();
  if !points.is_empty() {
    for strategy in &selected {
      let curve = comparator.cumulative_curve(strategy, points)?;
      curves.insert(strategy.to_string(), serde_json::to_value(curve)?);
    }
  }
  let mut rankings = serde_json::Map::new();
  for target in catalog.targets() {
    rankings.insert(target.to_string(), serde_json::to_value(comparator.ranking(target))?);
  }

  let report = serde_json::json!({
    "study": study,
    "sets": sets,
    "venn": venn,
    "rankings": rankings,
    "cumulative": curves,
    "rows": catalog.rows().collect::<Vec<_>>(),
  });
  println!("{}", table::report_json(&report)?);
  Ok(())
}

async fn list_studies(data_dir: &Path) -> Result<()> {
  let store = open_store(data_dir).await?;
  for listing in store.list_studies().await.context("failed to list studies")? {
    println!(
      "{}\t{} outcomes\tlast recorded {}",
      listing.study, listing.outcomes, listing.last_recorded_at
    );
  }
  Ok(())
}
