//! Cross-strategy comparison for ibound.
//!
//! A [`Catalog`] holds one [`OutcomeRow`] per (target, strategy). The
//! [`Comparator`] answers set questions over it (which targets a strategy
//! found a bug in, intersections, Venn regions) and ranks strategies per
//! target by schedules to the first bug. [`table`] exports the rows as JSON
//! or CSV for an external reporting layer.

mod catalog;
mod comparator;
mod error;
pub mod table;

pub use catalog::{Catalog, OutcomeRow};
pub use comparator::{Comparator, PairReport, RankEntry, SetReport, TargetSet, Venn3};
pub use error::CompareError;
