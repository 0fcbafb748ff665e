//! Production implementation of RunEnvironment backed by SLURM.

use crate::{EnvError, RunEnvironment, WallTime};
use std::process::Command;
use std::time::{Duration, Instant};
use tracing::info;

/// Environment variable SLURM sets for every batch job.
pub const SLURM_JOB_ID_VAR: &str = "SLURM_JOB_ID";

/// Production environment: real clock, `squeue` for the remaining budget.
///
/// Outside a SLURM allocation `remaining_walltime` fails with
/// `SchedulerUnavailable`, which the engine treats as "no budget to check".
pub struct SlurmEnvironment {
    /// Start time for elapsed wall-clock measurements
    start: Instant,
    
    /// Job id of the enclosing allocation, if any
    job_id: Option<String>,
}

impl SlurmEnvironment {
    /// Creates an environment for the job named by `SLURM_JOB_ID`, if set.
    pub fn from_env() -> Self {
        Self::with_job_id(std::env::var(SLURM_JOB_ID_VAR).ok())
    }
    
    /// Creates an environment for an explicit job id.
    pub fn with_job_id(job_id: Option<String>) -> Self {
        Self {
            start: Instant::now(),
            job_id,
        }
    }
    
    /// Returns the job id this environment queries.
    pub fn job_id(&self) -> Option<&str> {
        self.job_id.as_deref()
    }
}

impl Default for SlurmEnvironment {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Extracts the time-left token from `squeue --format=%.10L` output.
///
/// The output is a `TIME_LEFT` header followed by the value; the last
/// whitespace-separated token is the value.
pub(crate) fn parse_squeue_output(output: &str) -> Result<WallTime, EnvError> {
    let token = output
        .split_whitespace()
        .last()
        .ok_or_else(|| EnvError::malformed(output))?;
    token.parse()
}

impl RunEnvironment for SlurmEnvironment {
    fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
    
    fn remaining_walltime(&self) -> Result<WallTime, EnvError> {
        let job_id = self
            .job_id
            .as_deref()
            .ok_or_else(|| EnvError::SchedulerUnavailable(format!("{} not set", SLURM_JOB_ID_VAR)))?;
        
        let output = Command::new("squeue")
            .arg(format!("--job={}", job_id))
            .arg("--format=%.10L")
            .output()
            .map_err(|e| EnvError::query(e.to_string()))?;
        
        if !output.status.success() {
            return Err(EnvError::query(String::from_utf8_lossy(&output.stderr).trim().to_string()));
        }
        
        parse_squeue_output(&String::from_utf8_lossy(&output.stdout))
    }
    
    fn terminate(&self) {
        info!("Wall-time budget exhausted, exiting after checkpoint");
        std::process::exit(0);
    }
}
