//! Core environment trait for ridgeline engines.

use crate::{EnvError, WallTime};
use std::time::Duration;

/// The engine's only window onto the machine it runs on.
///
/// # Implementations
///
/// - **Production**: `SlurmEnvironment` - monotonic clock, `squeue` queries,
///   real process exit
/// - **Simulation**: `SimEnvironment` (in `ridgeline_sim`) - virtual clock and
///   a scripted wall-time budget
///
/// # Determinism
///
/// Nothing returned here may influence model state. The engine uses it only
/// to decide *when* to checkpoint, never *what* the model computes.
pub trait RunEnvironment {
    /// Returns wall-clock time elapsed since the environment was created.
    ///
    /// Sampled once per output interval to estimate the cost of the next one.
    fn elapsed(&self) -> Duration;
    
    /// Returns the remaining wall-time budget of the current batch job.
    ///
    /// Fails with [`EnvError::SchedulerUnavailable`] outside a scheduler.
    fn remaining_walltime(&self) -> Result<WallTime, EnvError>;
    
    /// Ends the run after a budget-driven checkpoint has been written.
    ///
    /// In production this exits the process with status 0 and never returns.
    /// Test environments record the request and return, after which the
    /// engine reports the run as checkpointed.
    fn terminate(&self);
}
