//! Rebuild summaries from a directory of existing logs.
//!
//! Log file names carry the target, the strategy label and its value (see
//! [`ArtifactName`]), which is all that is needed to regroup them into bound
//! families and chunked flat runs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use ibound_artifact::ArtifactName;
use ibound_config::{BoundFamily, Strategy, StrategyKind, TargetId};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::AggregateError;
use crate::fold::merge_chunks;
use crate::log::LevelResult;
use crate::summary::{BenchmarkSearchSummary, FlatSummary};

/// Everything tabulated from one log directory.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Tabulation {
  pub families: Vec<BenchmarkSearchSummary>,
  pub flat: Vec<FlatSummary>,
}

/// A log file found on disk.
#[derive(Debug, Clone)]
pub struct LogEntry {
  pub name: ArtifactName,
  pub path: PathBuf,
}

/// Find every log file under `dir`, descending into subdirectories.
///
/// Files whose names do not follow the log naming scheme are skipped.
pub async fn scan_logs(dir: &Path) -> Result<Vec<LogEntry>, AggregateError> {
  let mut entries = Vec::new();
  let mut pending = vec![dir.to_path_buf()];
  while let Some(current) = pending.pop() {
    let mut read_dir = tokio::fs::read_dir(&current).await.map_err(io_err(&current))?;
    while let Some(entry) = read_dir.next_entry().await.map_err(io_err(&current))? {
      let path = entry.path();
      let file_type = entry.file_type().await.map_err(io_err(&path))?;
      if file_type.is_dir() {
        pending.push(path);
        continue;
      }
      let file_name = entry.file_name();
      match ArtifactName::parse(&file_name.to_string_lossy()) {
        Some(name) => entries.push(LogEntry { name, path }),
        None => debug!(path = %path.display(), "skipping file outside the log naming scheme"),
      }
    }
  }

  entries.sort_by(|a, b| a.path.cmp(&b.path));
  Ok(entries)
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> AggregateError {
  let path = path.to_path_buf();
  move |source| AggregateError::Io { path, source }
}

type Key = (TargetId, String, String);

/// Keep the newest log for every (target, label, value).
fn newest(entries: Vec<LogEntry>) -> BTreeMap<Key, LogEntry> {
  let mut by_key: BTreeMap<Key, LogEntry> = BTreeMap::new();
  for entry in entries {
    let key = (
      entry.name.target.clone(),
      entry.name.label.clone(),
      entry.name.value.clone(),
    );
    let replace = match by_key.get(&key) {
      Some(existing) if existing.name.timestamp >= entry.name.timestamp => {
        warn!(
          kept = %existing.path.display(),
          ignored = %entry.path.display(),
          "duplicate log, keeping the newest"
        );
        false
      }
      Some(existing) => {
        warn!(
          kept = %entry.path.display(),
          ignored = %existing.path.display(),
          "duplicate log, keeping the newest"
        );
        true
      }
      None => true,
    };
    if replace {
      by_key.insert(key, entry);
    }
  }
  by_key
}

/// Tabulate every log under `dir` against a schedule budget.
pub async fn tabulate_dir(dir: &Path, schedule_budget: u64) -> Result<Tabulation, AggregateError> {
  let entries = scan_logs(dir).await?;
  info!(dir = %dir.display(), logs = entries.len(), "tabulating logs");

  let mut families: BTreeMap<(TargetId, BoundFamily), BTreeMap<u32, PathBuf>> = BTreeMap::new();
  let mut flat: BTreeMap<(TargetId, Strategy), Vec<(u64, PathBuf)>> = BTreeMap::new();

  for (_, entry) in newest(entries) {
    let name = entry.name;
    let Some(kind) = name.kind() else {
      debug!(label = %name.label, "skipping log with unknown strategy label");
      continue;
    };
    let Some(param) = name.bound() else {
      warn!(path = %entry.path.display(), "skipping log with malformed value");
      continue;
    };
    let seed = name
      .value
      .split(',')
      .nth(1)
      .and_then(|s| s.parse().ok())
      .unwrap_or(0);

    match kind {
      StrategyKind::PreemptionBound | StrategyKind::DelayBound => {
        let family = if kind == StrategyKind::PreemptionBound {
          BoundFamily::Preemption
        } else {
          BoundFamily::Delay
        };
        families
          .entry((name.target, family))
          .or_default()
          .insert(param, entry.path);
      }
      StrategyKind::Exhaustive => {
        flat
          .entry((name.target, Strategy::Exhaustive))
          .or_default()
          .push((0, entry.path));
      }
      StrategyKind::Pct => {
        let strategy = Strategy::Pct { depth: param, seed };
        let start = name.start_index();
        flat.entry((name.target, strategy)).or_default().push((start, entry.path));
      }
      StrategyKind::Random => {
        let strategy = Strategy::Random { seed };
        let start = name.start_index();
        flat.entry((name.target, strategy)).or_default().push((start, entry.path));
      }
      StrategyKind::RaceProfile => {
        debug!(path = %entry.path.display(), "race profiling logs are not tabulated");
      }
    }
  }

  let mut out = Tabulation::default();

  for ((target, family), files) in families {
    let mut levels = Vec::with_capacity(files.len());
    for (bound, path) in files {
      levels.push(LevelResult::read(bound, &path).await?);
    }
    let mut summary = BenchmarkSearchSummary::from_levels(target, family, schedule_budget, levels)?;
    if let Some(reason) = summary.stop_after_last_level(None) {
      summary.finalize(reason);
    }
    out.families.push(summary);
  }

  for ((target, strategy), files) in flat {
    let mut chunks = Vec::with_capacity(files.len());
    for (start, path) in files {
      chunks.push((start, LevelResult::read(0, &path).await?));
    }
    let interrupted = chunks.iter().any(|(_, c)| c.interrupted);
    out.flat.push(FlatSummary {
      target,
      strategy,
      schedule_budget,
      result: merge_chunks(&chunks)?,
      interrupted,
    });
  }

  Ok(out)
}
