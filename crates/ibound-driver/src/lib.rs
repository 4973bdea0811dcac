//! Ibound Driver
//!
//! This crate runs search strategies against targets. The [`Driver`] widens
//! a bound family level by level until a stopping rule fires, and runs
//! non-bound strategies as one or more contiguous chunks. The
//! [`StudyRunner`] schedules independent (target, strategy) jobs over a
//! worker pool and hands every outcome to a single store writer.
//!
//! Engine invocations go through the [`Executor`](ibound_executor::Executor)
//! trait, so the driver never spawns processes itself.

mod driver;
mod error;
mod runner;

pub use driver::{Driver, FamilyRequest, FlatRequest};
pub use error::DriverError;
pub use runner::{Job, StudyReport, StudyRunner};
