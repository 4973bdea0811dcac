//! Concurrent study runner.
//!
//! Every (target, strategy) job runs on its own task, bounded by a worker
//! semaphore. Jobs share one parent cancellation token, so a single stop
//! signal reaches every running engine. Outcomes are sent over a channel to
//! one writer task, which is the only code that touches the result store.

use std::sync::Arc;

use ibound_aggregate::SearchOutcome;
use ibound_config::{StrategyPlan, Target};
use ibound_store::Store;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::driver::Driver;
use crate::error::DriverError;

/// One (target, strategy) pair of a study.
#[derive(Debug, Clone)]
pub struct Job {
  pub target: Target,
  pub plan: StrategyPlan,
}

/// What happened to the jobs of one study run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StudyReport {
  pub completed: usize,
  pub interrupted: usize,
  pub failed: usize,
  /// Jobs never started because the run was cancelled first.
  pub skipped: usize,
  /// Outcomes appended to the store.
  pub written: usize,
}

enum JobStatus {
  Completed,
  Interrupted,
  Failed,
}

pub struct StudyRunner {
  driver: Arc<Driver>,
  store: Arc<dyn Store>,
  workers: usize,
}

impl StudyRunner {
  pub fn new(driver: Arc<Driver>, store: Arc<dyn Store>, workers: usize) -> Self {
    Self {
      driver,
      store,
      workers: workers.max(1),
    }
  }

  /// Run every job of `study` and wait for all of them.
  ///
  /// Partial outcomes of interrupted jobs are stored too, marked incomplete.
  pub async fn run(
    &self,
    study: &str,
    jobs: Vec<Job>,
    cancel: CancellationToken,
  ) -> Result<StudyReport, DriverError> {
    info!(study, jobs = jobs.len(), workers = self.workers, "study_started");

    let (sender, receiver) = mpsc::channel::<SearchOutcome>(self.workers * 2);
    let writer = tokio::spawn(write_outcomes(
      self.store.clone(),
      study.to_string(),
      receiver,
    ));

    let semaphore = Arc::new(Semaphore::new(self.workers));
    let mut tasks = JoinSet::new();
    let mut report = StudyReport::default();
    let total = jobs.len();

    for (started, job) in jobs.into_iter().enumerate() {
      let permit = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        permit = semaphore.clone().acquire_owned() => permit.ok(),
      };
      let Some(permit) = permit else {
        report.skipped = total - started;
        warn!(skipped = report.skipped, "study cancelled before every job started");
        break;
      };

      let driver = self.driver.clone();
      let sender = sender.clone();
      let job_cancel = cancel.child_token();

      tasks.spawn(async move {
        let _permit = permit;
        let target = job.target.id();
        let label = job.plan.label();

        match driver.run_plan(&job.target, &job.plan, job_cancel).await {
          Ok(outcome) => {
            info!(target = %target, strategy = %label, found_bug = outcome.found_bug(), "job_completed");
            send(&sender, outcome).await;
            JobStatus::Completed
          }
          Err(DriverError::Interrupted(partial)) => {
            warn!(target = %target, strategy = %label, "job_interrupted");
            send(&sender, *partial).await;
            JobStatus::Interrupted
          }
          Err(e) => {
            error!(target = %target, strategy = %label, error = %e, "job_failed");
            JobStatus::Failed
          }
        }
      });
    }
    drop(sender);

    while let Some(joined) = tasks.join_next().await {
      match joined {
        Ok(JobStatus::Completed) => report.completed += 1,
        Ok(JobStatus::Interrupted) => report.interrupted += 1,
        Ok(JobStatus::Failed) => report.failed += 1,
        Err(e) => {
          error!(error = %e, "job task panicked");
          report.failed += 1;
        }
      }
    }

    report.written = writer.await?;
    info!(
      study,
      completed = report.completed,
      interrupted = report.interrupted,
      failed = report.failed,
      skipped = report.skipped,
      "study_finished"
    );
    Ok(report)
  }
}

async fn send(sender: &mpsc::Sender<SearchOutcome>, outcome: SearchOutcome) {
  if sender.send(outcome).await.is_err() {
    error!("outcome writer stopped, outcome dropped");
  }
}

/// Single writer: drains the channel until every job has dropped its sender.
async fn write_outcomes(
  store: Arc<dyn Store>,
  study: String,
  mut receiver: mpsc::Receiver<SearchOutcome>,
) -> usize {
  let mut written = 0;
  while let Some(outcome) = receiver.recv().await {
    match store.append(&study, &outcome).await {
      Ok(outcome_id) => {
        written += 1;
        debug!(outcome_id, target = %outcome.target(), strategy = %outcome.label(), "outcome_written");
      }
      Err(e) => error!(error = %e, target = %outcome.target(), "failed to store outcome"),
    }
  }
  written
}
