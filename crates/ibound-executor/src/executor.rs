//! Engine process controller.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ibound_artifact::{ArtifactLayout, ArtifactName, Store};
use ibound_config::ExecutionConfig;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::error::ExecutionError;
use crate::result::ExecutionResult;

/// Line appended to the log when the engine was stopped by the timeout.
pub const TIMEOUT_MARKER: &str = "TIMEOUT OCCURRED";

/// Line appended to the log when the engine was stopped by cancellation.
pub const INTERRUPTED_MARKER: &str = "PROBLEM: Interrupted";

/// Environment keys owned by the engine protocol. They are always removed
/// from the inherited environment so that only the values built from the
/// [`ExecutionConfig`] reach the engine.
pub const ENGINE_ENV_KEYS: &[&str] = &[
  "mode",
  "pb",
  "delay_bound",
  "bound",
  "limit",
  "seed",
  "bug_depth",
  "start_index",
  "num_threads",
  "max_threads",
  "max_steps",
  "cpu",
  "sched_race",
  "sched_app",
  "enable_djit",
  "check_mem",
  "add_races",
  "output",
  "timeout",
  "suite",
  "search_in",
  "search_out",
];

const DEFAULT_GRACE: Duration = Duration::from_secs(2);

/// Output artifact of a reference run, compared byte for byte against later
/// replays of a deterministic strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputBaseline {
  bytes: Vec<u8>,
}

impl OutputBaseline {
  pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
    Self {
      bytes: bytes.into(),
    }
  }

  /// Read the output artifact left by a finished run of `config`.
  ///
  /// Returns `None` when the config names no output file or the run did not
  /// write one.
  pub async fn capture(config: &ExecutionConfig) -> Result<Option<Self>, ExecutionError> {
    let Some(path) = config.output_path() else {
      return Ok(None);
    };
    match tokio::fs::read(&path).await {
      Ok(bytes) => Ok(Some(Self { bytes })),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
      Err(source) => Err(ExecutionError::Log { path, source }),
    }
  }

  pub fn as_bytes(&self) -> &[u8] {
    &self.bytes
  }
}

/// One engine invocation.
pub struct ExecutionRequest<'a> {
  pub config: &'a ExecutionConfig,
  /// Name of the log artifact; also names the divergent output artifact.
  pub artifact: &'a ArtifactName,
  /// Local file the combined stdout/stderr is written to.
  pub log_path: PathBuf,
  /// Reference output for the determinism check.
  pub baseline: Option<&'a OutputBaseline>,
}

/// Runs the engine for one request.
#[async_trait]
pub trait Executor: Send + Sync {
  async fn execute(
    &self,
    request: ExecutionRequest<'_>,
    cancel: CancellationToken,
  ) -> Result<ExecutionResult, ExecutionError>;
}

enum Outcome {
  Exited(std::io::Result<ExitStatus>),
  TimedOut,
  Cancelled,
}

/// Spawns the engine as a process group and supervises it.
pub struct ExecutionController {
  artifacts: Arc<dyn Store>,
  grace: Duration,
}

impl ExecutionController {
  /// Create a controller that preserves divergent outputs in `artifacts`.
  pub fn new(artifacts: Arc<dyn Store>) -> Self {
    Self {
      artifacts,
      grace: DEFAULT_GRACE,
    }
  }

  /// Time between SIGINT and SIGKILL when the engine has to be stopped.
  pub fn with_grace(mut self, grace: Duration) -> Self {
    self.grace = grace;
    self
  }

  async fn execute_inner(
    &self,
    request: &ExecutionRequest<'_>,
    cancel: &CancellationToken,
  ) -> Result<ExecutionResult, ExecutionError> {
    let config = request.config;
    prepare_dirs(config, &request.log_path).await?;

    // A stale artifact from an earlier level must not pass the comparison.
    if let Some(output) = config.output_path() {
      match tokio::fs::remove_file(&output).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(source) => {
          return Err(ExecutionError::WorkingDir {
            path: output,
            source,
          });
        }
      }
    }

    let log_err = |source| ExecutionError::Log {
      path: request.log_path.clone(),
      source,
    };
    let log = tokio::fs::File::create(&request.log_path).await.map_err(log_err)?;
    let stderr = log.try_clone().await.map_err(log_err)?.into_std().await;
    let stdout = log.into_std().await;

    let mut command = Command::new(&config.engine().program);
    command
      .args(config.engine_args())
      .current_dir(config.working_dir())
      .stdin(Stdio::null())
      .stdout(Stdio::from(stdout))
      .stderr(Stdio::from(stderr))
      .process_group(0)
      .kill_on_drop(true);
    for key in ENGINE_ENV_KEYS {
      command.env_remove(key);
    }
    command.envs(config.engine_params());

    let started = Instant::now();
    let mut child = command.spawn().map_err(|source| ExecutionError::Spawn {
      program: config.engine().program.clone(),
      source,
    })?;
    let pgid = child.id().map(|id| id as i32);
    debug!(pgid = ?pgid, "engine spawned");

    let outcome = tokio::select! {
      status = child.wait() => Outcome::Exited(status),
      _ = tokio::time::sleep(config.timeout()) => Outcome::TimedOut,
      _ = cancel.cancelled() => Outcome::Cancelled,
    };

    let (status, timed_out, interrupted) = match outcome {
      Outcome::Exited(status) => (status.map_err(ExecutionError::Wait)?, false, false),
      Outcome::TimedOut => {
        warn!(timeout = ?config.timeout(), "engine timed out, stopping process group");
        let status = self.terminate(&mut child, pgid).await?;
        append_marker(&request.log_path, TIMEOUT_MARKER).await?;
        (status, true, false)
      }
      Outcome::Cancelled => {
        warn!("execution cancelled, stopping process group");
        let status = self.terminate(&mut child, pgid).await?;
        append_marker(&request.log_path, INTERRUPTED_MARKER).await?;
        (status, false, true)
      }
    };
    let elapsed = started.elapsed();

    let output_mismatch = if timed_out || interrupted {
      None
    } else {
      self.check_output(request).await?
    };

    Ok(ExecutionResult {
      exit_status: status.code(),
      log_path: request.log_path.clone(),
      elapsed,
      timed_out,
      interrupted,
      output_mismatch,
    })
  }

  /// SIGINT to the group, then SIGKILL once the grace period has passed.
  async fn terminate(&self, child: &mut Child, pgid: Option<i32>) -> Result<ExitStatus, ExecutionError> {
    let Some(pgid) = pgid else {
      return child.wait().await.map_err(ExecutionError::Wait);
    };

    signal_group(pgid, libc::SIGINT);
    let status = match tokio::time::timeout(self.grace, child.wait()).await {
      Ok(status) => status.map_err(ExecutionError::Wait)?,
      Err(_) => {
        debug!(pgid, "grace period elapsed, killing process group");
        signal_group(pgid, libc::SIGKILL);
        child.wait().await.map_err(ExecutionError::Wait)?
      }
    };
    // Reap descendants that outlived the group leader.
    signal_group(pgid, libc::SIGKILL);
    Ok(status)
  }

  async fn check_output(&self, request: &ExecutionRequest<'_>) -> Result<Option<bool>, ExecutionError> {
    let config = request.config;
    let Some(baseline) = request.baseline else {
      return Ok(None);
    };
    if !config.strategy().is_replay_deterministic() {
      return Ok(None);
    }
    let Some(output) = config.output_path() else {
      return Ok(None);
    };

    let current = match tokio::fs::read(&output).await {
      Ok(bytes) => bytes,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        warn!(output = %output.display(), "output artifact missing after deterministic replay");
        return Ok(Some(true));
      }
      Err(source) => return Err(ExecutionError::Log { path: output, source }),
    };

    if current == baseline.as_bytes() {
      return Ok(Some(false));
    }

    let key = ArtifactLayout::divergent_output_key(request.artifact);
    self.artifacts.put_file(&key, &output).await?;
    warn!(
      output = %output.display(),
      preserved_as = %key,
      "output differs from baseline"
    );
    Ok(Some(true))
  }
}

#[async_trait]
impl Executor for ExecutionController {
  #[instrument(
    name = "engine_execute",
    skip(self, request, cancel),
    fields(
      target = %request.config.target().id(),
      strategy = request.config.strategy().label(),
      value = %request.artifact.value,
    )
  )]
  async fn execute(
    &self,
    request: ExecutionRequest<'_>,
    cancel: CancellationToken,
  ) -> Result<ExecutionResult, ExecutionError> {
    info!(log = %request.log_path.display(), "execution_started");

    let result = self.execute_inner(&request, &cancel).await;

    match &result {
      Ok(r) => info!(
        exit_status = ?r.exit_status,
        elapsed_ms = r.elapsed.as_millis() as u64,
        timed_out = r.timed_out,
        interrupted = r.interrupted,
        "execution_completed"
      ),
      Err(e) => error!(error = %e, "execution_failed"),
    }

    result
  }
}

async fn prepare_dirs(config: &ExecutionConfig, log_path: &Path) -> Result<(), ExecutionError> {
  let mut dirs = vec![config.working_dir().to_path_buf()];
  if let Some(parent) = log_path.parent() {
    dirs.push(parent.to_path_buf());
  }
  if let Some(output) = &config.search_state().output {
    dirs.push(output.clone());
  }
  for dir in dirs {
    tokio::fs::create_dir_all(&dir)
      .await
      .map_err(|source| ExecutionError::WorkingDir { path: dir, source })?;
  }
  Ok(())
}

async fn append_marker(log_path: &Path, marker: &str) -> Result<(), ExecutionError> {
  let log_err = |source| ExecutionError::Log {
    path: log_path.to_path_buf(),
    source,
  };
  let mut file = tokio::fs::OpenOptions::new()
    .append(true)
    .open(log_path)
    .await
    .map_err(log_err)?;
  file
    .write_all(format!("\n{}\n", marker).as_bytes())
    .await
    .map_err(log_err)?;
  file.flush().await.map_err(log_err)
}

fn signal_group(pgid: i32, signal: libc::c_int) {
  // SAFETY: killpg takes plain integers and touches no memory of ours.
  let rc = unsafe { libc::killpg(pgid, signal) };
  if rc != 0 {
    debug!(pgid, signal, error = %std::io::Error::last_os_error(), "killpg failed");
  }
}
