//! Set comparisons and rankings over a [`Catalog`].

use std::collections::{BTreeMap, BTreeSet};

use ibound_config::TargetId;
use serde::Serialize;

use crate::catalog::Catalog;
use crate::error::CompareError;

pub type TargetSet = BTreeSet<TargetId>;

/// Region counts of a three-way Venn diagram.
///
/// Keys are indicator strings over the three strategies: `"110"` counts
/// targets found by the first and second strategy but not the third.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Venn3 {
  pub labels: [String; 3],
  pub regions: BTreeMap<String, usize>,
  /// Targets found by none of the three.
  pub none: usize,
}

/// One strategy's place in a per-target ranking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankEntry {
  pub strategy: String,
  /// `None` sorts after every found value.
  pub schedules_to_first_bug: Option<u64>,
}

/// Pairwise comparison of two strategies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PairReport {
  pub first: String,
  pub second: String,
  pub both: TargetSet,
  pub only_first: TargetSet,
  pub only_second: TargetSet,
}

/// Membership of every strategy plus all pairwise comparisons.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SetReport {
  pub found: BTreeMap<String, TargetSet>,
  pub pairs: Vec<PairReport>,
  pub found_by_none: TargetSet,
}

pub struct Comparator<'a> {
  catalog: &'a Catalog,
}

impl<'a> Comparator<'a> {
  pub fn new(catalog: &'a Catalog) -> Self {
    Self { catalog }
  }

  fn check(&self, strategy: &str) -> Result<(), CompareError> {
    if self.catalog.has_strategy(strategy) {
      Ok(())
    } else {
      Err(CompareError::UnknownStrategy(strategy.to_string()))
    }
  }

  /// Targets where `strategy` found at least one bug within the budget.
  pub fn found_by(&self, strategy: &str) -> Result<TargetSet, CompareError> {
    self.check(strategy)?;
    Ok(
      self
        .catalog
        .targets()
        .iter()
        .filter(|t| self.catalog.get(t, strategy).is_some_and(|row| row.found_bug))
        .cloned()
        .collect(),
    )
  }

  /// Targets found by every one of `strategies`.
  pub fn found_by_all(&self, strategies: &[&str]) -> Result<TargetSet, CompareError> {
    let mut iter = strategies.iter();
    let Some(first) = iter.next() else {
      return Ok(TargetSet::new());
    };
    let mut acc = self.found_by(first)?;
    for strategy in iter {
      let found = self.found_by(strategy)?;
      acc.retain(|t| found.contains(t));
    }
    Ok(acc)
  }

  pub fn intersection(&self, a: &str, b: &str) -> Result<TargetSet, CompareError> {
    self.found_by_all(&[a, b])
  }

  /// Targets found by `a` but not by `b`.
  pub fn difference(&self, a: &str, b: &str) -> Result<TargetSet, CompareError> {
    let found_b = self.found_by(b)?;
    Ok(
      self
        .found_by(a)?
        .into_iter()
        .filter(|t| !found_b.contains(t))
        .collect(),
    )
  }

  /// The universe of targets minus every target found by one of
  /// `strategies`.
  pub fn found_by_none(&self, strategies: &[&str]) -> Result<TargetSet, CompareError> {
    let mut remaining = self.catalog.targets().clone();
    for strategy in strategies {
      for target in self.found_by(strategy)? {
        remaining.remove(&target);
      }
    }
    Ok(remaining)
  }

  pub fn venn3(&self, strategies: [&str; 3]) -> Result<Venn3, CompareError> {
    let sets = [
      self.found_by(strategies[0])?,
      self.found_by(strategies[1])?,
      self.found_by(strategies[2])?,
    ];

    let mut regions: BTreeMap<String, usize> = ["100", "010", "001", "110", "101", "011", "111"]
      .into_iter()
      .map(|key| (key.to_string(), 0))
      .collect();
    let mut none = 0;

    for target in self.catalog.targets() {
      let key: String = sets
        .iter()
        .map(|set| if set.contains(target) { '1' } else { '0' })
        .collect();
      match regions.get_mut(&key) {
        Some(count) => *count += 1,
        None => none += 1,
      }
    }

    Ok(Venn3 {
      labels: strategies.map(str::to_string),
      regions,
      none,
    })
  }

  /// Strategies that ran on `target`, fewest schedules to the first bug
  /// first. Ties keep catalog order.
  pub fn ranking(&self, target: &TargetId) -> Vec<RankEntry> {
    let mut entries: Vec<RankEntry> = self
      .catalog
      .strategies()
      .iter()
      .filter_map(|strategy| self.catalog.get(target, strategy))
      .map(|row| RankEntry {
        strategy: row.strategy.clone(),
        schedules_to_first_bug: row.schedules_to_first_bug,
      })
      .collect();
    entries.sort_by_key(|e| (e.schedules_to_first_bug.is_none(), e.schedules_to_first_bug));
    entries
  }

  /// Number of targets `strategy` found a bug in within `x` schedules, for
  /// every `x` in `points`.
  pub fn cumulative_curve(&self, strategy: &str, points: &[u64]) -> Result<Vec<(u64, usize)>, CompareError> {
    self.check(strategy)?;
    let found: Vec<u64> = self
      .catalog
      .rows()
      .filter(|row| row.strategy == strategy)
      .filter_map(|row| row.schedules_to_first_bug)
      .collect();
    Ok(
      points
        .iter()
        .map(|&x| (x, found.iter().filter(|&&n| n <= x).count()))
        .collect(),
    )
  }

  /// Like [`Self::cumulative_curve`], using the predicted schedules to a bug
  /// of sampling strategies.
  pub fn predicted_curve(&self, strategy: &str, points: &[u64]) -> Result<Vec<(u64, usize)>, CompareError> {
    self.check(strategy)?;
    let predicted: Vec<f64> = self
      .catalog
      .rows()
      .filter(|row| row.strategy == strategy)
      .filter_map(|row| row.predicted_to_bug)
      .collect();
    Ok(
      points
        .iter()
        .map(|&x| (x, predicted.iter().filter(|&&p| p <= x as f64).count()))
        .collect(),
    )
  }

  /// Membership sets of `strategies` and every pair between them.
  pub fn set_report(&self, strategies: &[&str]) -> Result<SetReport, CompareError> {
    let mut found = BTreeMap::new();
    for strategy in strategies {
      found.insert(strategy.to_string(), self.found_by(strategy)?);
    }

    let mut pairs = Vec::new();
    for (i, first) in strategies.iter().enumerate() {
      for second in &strategies[i + 1..] {
        pairs.push(PairReport {
          first: first.to_string(),
          second: second.to_string(),
          both: self.intersection(first, second)?,
          only_first: self.difference(first, second)?,
          only_second: self.difference(second, first)?,
        });
      }
    }

    Ok(SetReport {
      found,
      pairs,
      found_by_none: self.found_by_none(strategies)?,
    })
  }
}
