//! Simulated run environment with a virtual clock.

use ridgeline_env::{EnvError, RunEnvironment, WallTime};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Run environment backed by a virtual clock and an optional job budget.
///
/// This implements `RunEnvironment` using:
/// - A virtual clock that only moves when [`advance_time`](Self::advance_time)
///   is called
/// - A fixed wall-time budget; without one it behaves like a machine with no
///   batch scheduler
/// - A termination flag in place of exiting the process
pub struct SimEnvironment {
    /// Current virtual time (nanoseconds since the run started)
    virtual_time_ns: Arc<Mutex<u64>>,

    /// Total job budget in minutes
    walltime_minutes: Option<u64>,

    /// Set once the engine asks to terminate
    terminated: Arc<AtomicBool>,
}

impl SimEnvironment {
    /// Creates an environment with no scheduler.
    pub fn new() -> Self {
        Self {
            virtual_time_ns: Arc::new(Mutex::new(0)),
            walltime_minutes: None,
            terminated: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Sets the job budget in minutes.
    pub fn with_walltime(mut self, minutes: u64) -> Self {
        self.walltime_minutes = Some(minutes);
        self
    }

    /// Advances virtual time by the given duration.
    pub fn advance_time(&self, duration: Duration) {
        let mut time = self.lock_time();
        *time = time.saturating_add(duration.as_nanos() as u64);
    }

    /// Returns the current virtual time in nanoseconds.
    pub fn time_ns(&self) -> u64 {
        *self.lock_time()
    }

    /// Returns true once the engine has asked the run to end.
    pub fn termination_requested(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    fn lock_time(&self) -> std::sync::MutexGuard<'_, u64> {
        // A poisoned counter is still a valid counter.
        self.virtual_time_ns
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for SimEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for SimEnvironment {
    fn clone(&self) -> Self {
        Self {
            virtual_time_ns: Arc::clone(&self.virtual_time_ns),
            walltime_minutes: self.walltime_minutes,
            terminated: Arc::clone(&self.terminated),
        }
    }
}

impl RunEnvironment for SimEnvironment {
    fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.time_ns())
    }

    fn remaining_walltime(&self) -> Result<WallTime, EnvError> {
        let budget = self
            .walltime_minutes
            .ok_or_else(|| EnvError::SchedulerUnavailable("simulated run has no job budget".to_string()))?;
        let used = self.elapsed().as_secs() / 60;
        Ok(WallTime::from_minutes(budget.saturating_sub(used)))
    }

    fn terminate(&self) {
        self.terminated.store(true, Ordering::SeqCst);
    }
}
