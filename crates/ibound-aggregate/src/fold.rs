//! Folding levels and chunks into cumulative statistics.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::AggregateError;
use crate::log::LevelResult;

/// Cumulative statistics of a bound family up to one level.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterativeResult {
  pub bound: u32,
  pub iterative_num_schedules: u64,
  pub iterative_num_buggy: u64,
  /// Cumulative schedule count at the first new buggy schedule. Set once.
  pub iterative_num_before_buggy: Option<u64>,
  /// Schedules this level added to the cumulative count.
  pub new_schedules: u64,
  /// The level was excluded because its log is corrupted.
  pub corrupted: bool,
  /// The cumulative count reached the schedule budget at this level.
  pub budget_reached: bool,
  /// New schedules were derived by counter comparison instead of the
  /// engine's new-marker.
  pub used_fallback: bool,
}

/// Fold consecutive bound levels into cumulative results.
///
/// Levels must be ordered and contiguous from bound 0. Corrupted levels are
/// carried with the previous cumulative values and contribute nothing. With a
/// budget, new schedules beyond it are not counted.
pub fn fold_iterative(
  levels: &[LevelResult],
  budget: Option<u64>,
) -> Result<Vec<IterativeResult>, AggregateError> {
  let mut out: Vec<IterativeResult> = Vec::with_capacity(levels.len());
  let mut prev = IterativeResult::default();
  // Last level the fold trusted, for counter comparison and exhaustion.
  let mut prev_trusted: Option<&LevelResult> = None;

  for (i, level) in levels.iter().enumerate() {
    let expected = i as u32;
    if level.bound != expected {
      return Err(AggregateError::BoundGap {
        expected,
        found: level.bound,
      });
    }

    if let Some(corrupted) = &level.corrupted {
      warn!(bound = level.bound, reason = %corrupted, "excluding corrupted level");
      let carried = IterativeResult {
        bound: level.bound,
        new_schedules: 0,
        corrupted: true,
        used_fallback: false,
        ..prev.clone()
      };
      out.push(carried);
      continue;
    }

    if let Some(p) = prev_trusted {
      if p.exhausted && !level.exhausted {
        return Err(AggregateError::ExhaustedFlip {
          previous: p.bound,
          bound: level.bound,
        });
      }
    }

    let (mut new_schedules, mut new_buggy, used_fallback) = if level.saw_new_marker {
      (level.num_new, level.new_buggy_offsets.clone(), false)
    } else {
      let prefix = prev_trusted.map_or(0, |p| p.num_schedules);
      let offsets: Vec<u64> = level
        .buggy_indices
        .iter()
        .filter(|&&idx| idx > prefix)
        .map(|idx| idx - prefix)
        .collect();
      if level.bound > 0 {
        info!(
          bound = level.bound,
          previous_schedules = prefix,
          "no new-schedule marker in log, comparing schedule counters"
        );
      }
      (level.num_schedules.saturating_sub(prefix), offsets, level.bound > 0)
    };

    if let Some(budget) = budget {
      let room = budget.saturating_sub(prev.iterative_num_schedules);
      if new_schedules > room {
        new_schedules = room;
        new_buggy.retain(|&offset| offset <= room);
      }
    }

    let iterative_num_schedules = prev.iterative_num_schedules + new_schedules;
    let iterative_num_before_buggy = prev
      .iterative_num_before_buggy
      .or_else(|| new_buggy.first().map(|offset| prev.iterative_num_schedules + offset));

    let current = IterativeResult {
      bound: level.bound,
      iterative_num_schedules,
      iterative_num_buggy: prev.iterative_num_buggy + new_buggy.len() as u64,
      iterative_num_before_buggy,
      new_schedules,
      corrupted: false,
      budget_reached: budget.is_some_and(|b| iterative_num_schedules >= b),
      used_fallback,
    };

    prev = current.clone();
    prev_trusted = Some(level);
    out.push(current);
  }

  Ok(out)
}

/// Cumulative result of a strategy that runs outside a bound family.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlatResult {
  pub num_schedules: u64,
  pub num_buggy: u64,
  /// Schedules explored up to and including the first buggy one.
  pub num_before_buggy: Option<u64>,
  pub max_pct_steps: u64,
  pub max_threads: u32,
  pub max_enabled_threads: u32,
  pub max_scheduling_points: u64,
  pub exhausted: bool,
  pub timed_out: bool,
  pub corrupted_chunks: u32,
  pub chunks: u32,
}

impl FlatResult {
  /// Expected schedules to hit a bug: `budget / num_buggy`.
  pub fn predicted_to_bug(&self, budget: u64) -> Option<f64> {
    (self.num_buggy > 0).then(|| budget as f64 / self.num_buggy as f64)
  }

  pub fn found_bug(&self) -> bool {
    self.num_buggy > 0
  }
}

/// Merge the chunks of one flat run, given as `(start_index, level)` pairs.
///
/// Each chunk must start where the previous one stopped. A chunk that timed
/// out, was interrupted or is corrupted may stop short of the next start.
pub fn merge_chunks(chunks: &[(u64, LevelResult)]) -> Result<FlatResult, AggregateError> {
  let mut sorted: Vec<&(u64, LevelResult)> = chunks.iter().collect();
  sorted.sort_by_key(|(start, _)| *start);

  let mut merged = FlatResult::default();
  let mut expected = 0u64;
  let mut short_allowed = false;

  for (start, chunk) in sorted {
    let start = *start;
    let contiguous = start == expected || (short_allowed && start > expected);
    if !contiguous {
      return Err(AggregateError::ChunkGap {
        expected,
        found: start,
      });
    }

    merged.chunks += 1;
    merged.timed_out |= chunk.timed_out;
    merged.exhausted |= chunk.exhausted;
    merged.max_pct_steps = merged.max_pct_steps.max(chunk.max_pct_steps);
    merged.max_threads = merged.max_threads.max(chunk.max_threads);
    merged.max_enabled_threads = merged.max_enabled_threads.max(chunk.max_enabled_threads);
    merged.max_scheduling_points = merged.max_scheduling_points.max(chunk.max_scheduling_points);

    if let Some(reason) = &chunk.corrupted {
      warn!(start_index = start, reason = %reason, "excluding corrupted chunk");
      merged.corrupted_chunks += 1;
      expected = start;
      short_allowed = true;
      continue;
    }

    if merged.num_before_buggy.is_none() && chunk.first_buggy_index > 0 {
      merged.num_before_buggy = Some(merged.num_schedules + chunk.first_buggy_index as u64);
    }
    merged.num_schedules += chunk.num_schedules;
    merged.num_buggy += chunk.num_buggy;

    expected = start + chunk.num_schedules;
    short_allowed = chunk.timed_out || chunk.interrupted;
  }

  Ok(merged)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn level(bound: u32, num_schedules: u64, buggy_indices: Vec<u64>) -> LevelResult {
    LevelResult {
      bound,
      num_schedules,
      num_buggy: buggy_indices.len() as u64,
      first_buggy_index: buggy_indices.first().map_or(-1, |&i| i as i64),
      buggy_indices,
      ..LevelResult::default()
    }
  }

  fn marked(bound: u32, num_schedules: u64, num_new: u64, new_buggy_offsets: Vec<u64>) -> LevelResult {
    LevelResult {
      bound,
      num_schedules,
      num_new,
      num_buggy: new_buggy_offsets.len() as u64,
      new_buggy_offsets,
      saw_new_marker: true,
      ..LevelResult::default()
    }
  }

  #[test]
  fn test_counter_fallback_saturates_on_repeated_count() {
    let levels = vec![level(0, 3, vec![]), level(1, 5, vec![]), level(2, 5, vec![])];
    let folded = fold_iterative(&levels, None).unwrap();

    let counts: Vec<u64> = folded.iter().map(|r| r.iterative_num_schedules).collect();
    assert_eq!(counts, vec![3, 5, 5]);
    assert_eq!(folded[2].new_schedules, 0);
    assert!(!folded[0].used_fallback);
    assert!(folded[1].used_fallback);
  }

  #[test]
  fn test_first_bug_offset_uses_position_among_new_schedules() {
    let levels = vec![marked(0, 3, 3, vec![]), marked(1, 7, 4, vec![2, 4])];
    let folded = fold_iterative(&levels, None).unwrap();

    assert_eq!(folded[0].iterative_num_before_buggy, None);
    assert_eq!(folded[1].iterative_num_schedules, 7);
    assert_eq!(folded[1].iterative_num_buggy, 2);
    assert_eq!(folded[1].iterative_num_before_buggy, Some(5));
  }

  #[test]
  fn test_before_buggy_is_set_once() {
    let levels = vec![
      marked(0, 2, 2, vec![2]),
      marked(1, 6, 4, vec![1]),
      marked(2, 9, 3, vec![3]),
    ];
    let folded = fold_iterative(&levels, None).unwrap();
    assert!(folded.iter().all(|r| r.iterative_num_before_buggy == Some(2)));

    let buggy: Vec<u64> = folded.iter().map(|r| r.iterative_num_buggy).collect();
    assert_eq!(buggy, vec![1, 2, 3]);
  }

  #[test]
  fn test_bound_gap_is_fatal() {
    let levels = vec![level(0, 1, vec![]), level(2, 4, vec![])];
    assert!(matches!(
      fold_iterative(&levels, None),
      Err(AggregateError::BoundGap { expected: 1, found: 2 })
    ));
  }

  #[test]
  fn test_exhausted_flip_is_fatal() {
    let mut first = level(0, 1, vec![]);
    first.exhausted = true;
    let levels = vec![first, level(1, 4, vec![])];
    assert!(matches!(
      fold_iterative(&levels, None),
      Err(AggregateError::ExhaustedFlip { previous: 0, bound: 1 })
    ));
  }

  #[test]
  fn test_corrupted_level_is_excluded() {
    let mut bad = marked(1, 4, 2, vec![1]);
    bad.corrupted = Some("schedule 3 started but never finished".to_string());
    let levels = vec![marked(0, 2, 2, vec![]), bad, marked(2, 8, 3, vec![3])];
    let folded = fold_iterative(&levels, None).unwrap();

    assert!(folded[1].corrupted);
    assert_eq!(folded[1].iterative_num_schedules, 2);
    assert_eq!(folded[1].iterative_num_before_buggy, None);
    assert_eq!(folded[2].iterative_num_schedules, 5);
    assert_eq!(folded[2].iterative_num_before_buggy, Some(5));
  }

  #[test]
  fn test_budget_truncates_new_schedules() {
    let levels = vec![marked(0, 6, 6, vec![]), marked(1, 12, 6, vec![3, 5])];
    let folded = fold_iterative(&levels, Some(10)).unwrap();

    assert!(!folded[0].budget_reached);
    assert_eq!(folded[1].iterative_num_schedules, 10);
    assert_eq!(folded[1].new_schedules, 4);
    assert_eq!(folded[1].iterative_num_buggy, 1);
    assert_eq!(folded[1].iterative_num_before_buggy, Some(9));
    assert!(folded[1].budget_reached);
  }

  fn chunk(num_schedules: u64, first_buggy: i64, num_buggy: u64) -> LevelResult {
    LevelResult {
      num_schedules,
      num_buggy,
      first_buggy_index: first_buggy,
      ..LevelResult::default()
    }
  }

  #[test]
  fn test_merge_chunks_in_start_order() {
    let chunks = vec![
      (100, chunk(100, 40, 2)),
      (0, chunk(100, -1, 0)),
      (200, chunk(100, 10, 1)),
    ];
    let merged = merge_chunks(&chunks).unwrap();

    assert_eq!(merged.chunks, 3);
    assert_eq!(merged.num_schedules, 300);
    assert_eq!(merged.num_buggy, 3);
    assert_eq!(merged.num_before_buggy, Some(140));
    assert_eq!(merged.predicted_to_bug(300), Some(100.0));
  }

  #[test]
  fn test_merge_chunks_rejects_gap() {
    let chunks = vec![(0, chunk(100, -1, 0)), (150, chunk(100, -1, 0))];
    assert!(matches!(
      merge_chunks(&chunks),
      Err(AggregateError::ChunkGap { expected: 100, found: 150 })
    ));
  }

  #[test]
  fn test_merge_chunks_tolerates_timed_out_chunk() {
    let mut short = chunk(60, -1, 0);
    short.timed_out = true;
    let chunks = vec![(0, short), (100, chunk(100, 5, 1))];
    let merged = merge_chunks(&chunks).unwrap();

    assert!(merged.timed_out);
    assert_eq!(merged.num_schedules, 160);
    assert_eq!(merged.num_before_buggy, Some(65));
  }
}
