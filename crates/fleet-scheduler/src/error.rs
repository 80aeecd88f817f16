//! Scheduler error types.

use thiserror::Error;

/// Failures of a single boot attempt. They never abort a tick.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("runtime error: {0}")]
    Runtime(#[from] fleet_runtime::RuntimeError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
