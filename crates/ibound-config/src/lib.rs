//! Ibound Config
//!
//! This crate contains the configuration types for ibound: the closed set of
//! search strategies, benchmark targets, the study definition loaded from disk,
//! and the immutable [`ExecutionConfig`] that describes a single engine
//! invocation.
//!
//! Configuration can be loaded from:
//! - JSON study files (via CLI with `ibound run study.json`)
//! - Plain-text target lists (`suite test maxThreads maxSteps` per line)
//!
//! Nothing in this crate reads ambient process state. Every parameter the
//! execution engine receives is derived from an [`ExecutionConfig`] value.

mod error;
mod execution;
mod strategy;
mod study;
mod target;

pub use error::ConfigError;
pub use execution::{DetectorFlags, EngineCommand, ExecutionConfig, RunSettings, SearchStatePaths};
pub use strategy::{BoundFamily, Strategy, StrategyKind};
pub use study::{StrategyPlan, StudyDef};
pub use target::{Target, TargetId, parse_target_list};
