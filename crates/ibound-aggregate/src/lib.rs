//! Result aggregation for ibound.
//!
//! The engine reports one line-oriented log per invocation. This crate parses
//! a log into a [`LevelResult`], folds consecutive bound levels into
//! cumulative [`IterativeResult`]s, merges the chunks of randomized runs into
//! a [`FlatResult`], and keeps the per-(target, family)
//! [`BenchmarkSearchSummary`] the driver and the comparator work from.
//!
//! [`tabulate`] rebuilds all of the above from a directory of existing logs.

mod error;
mod fold;
mod log;
mod summary;
pub mod tabulate;

pub use error::AggregateError;
pub use fold::{FlatResult, IterativeResult, fold_iterative, merge_chunks};
pub use log::{LevelResult, markers};
pub use summary::{BenchmarkSearchSummary, FlatSummary, SearchOutcome, StopReason};
