//! Engine execution for ibound.
//!
//! This crate provides the [`ExecutionController`] which launches the
//! schedule-controlling engine for one [`ExecutionConfig`], captures its log,
//! enforces the wall-clock timeout and cancellation, and checks the output
//! artifact of deterministic strategies against a baseline.
//!
//! The [`Executor`] trait is the seam the bound iteration driver runs
//! against, so driver tests can substitute a scripted engine.
//!
//! [`ExecutionConfig`]: ibound_config::ExecutionConfig

mod error;
mod executor;
mod result;

pub use error::ExecutionError;
pub use executor::{
  ENGINE_ENV_KEYS, ExecutionController, ExecutionRequest, Executor, INTERRUPTED_MARKER,
  OutputBaseline, TIMEOUT_MARKER,
};
pub use result::ExecutionResult;
