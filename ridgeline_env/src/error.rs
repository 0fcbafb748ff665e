//! Error types for the ridgeline environment abstraction.

use thiserror::Error;

/// Errors that can occur while querying the run environment.
///
/// None of these are fatal to a simulation: the engine treats every variant
/// as "no budget information available" and keeps running.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Not running under a job scheduler (no job id in the environment)
    #[error("Scheduler unavailable: {0}")]
    SchedulerUnavailable(String),
    
    /// The scheduler query command could not be run or exited non-zero
    #[error("Scheduler query failed: {0}")]
    QueryFailed(String),
    
    /// The scheduler answered with something that is not a duration
    #[error("Malformed wall time: {0:?}")]
    MalformedWallTime(String),
}

impl EnvError {
    /// Creates a query failure.
    pub fn query(msg: impl Into<String>) -> Self {
        Self::QueryFailed(msg.into())
    }
    
    /// Creates a malformed wall-time error.
    pub fn malformed(raw: impl Into<String>) -> Self {
        Self::MalformedWallTime(raw.into())
    }
}
