//! Ridgeline Environment Abstraction Layer
//!
//! This crate isolates everything a landscape-evolution run touches that is
//! not a pure function of its parameters and seed:
//! - Wall-clock time (used to estimate how long an output interval takes)
//! - The batch job scheduler (remaining wall-time budget)
//! - Process termination after a budget-driven checkpoint
//!
//! The engine in `ridgeline_core` only ever talks to a [`RunEnvironment`],
//! so tests can drive the wall-time path deterministically while production
//! runs query SLURM.
//!
//! # Example
//!
//! ```ignore
//! use ridgeline_env::{RunEnvironment, SlurmEnvironment};
//!
//! let env = SlurmEnvironment::from_env();
//! match env.remaining_walltime() {
//!     Ok(left) => println!("{:.1} minutes left", left.as_minutes()),
//!     Err(e) => println!("not under a scheduler: {e}"),
//! }
//! ```

mod context;
mod error;
mod slurm_impl;
mod types;

pub use context::RunEnvironment;
pub use error::EnvError;
pub use slurm_impl::SlurmEnvironment;
pub use types::WallTime;
