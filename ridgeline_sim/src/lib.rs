//! Ridgeline Reference Models and Run Harness
//!
//! This crate puts the control core to work:
//! - **Models**: `Basic` and `BasicSt`, stream power plus linear diffusion on
//!   small stand-in kernels
//! - **Environment**: `SimEnvironment`, a virtual clock with a scripted job
//!   budget, so wall-time checkpoints can be exercised off-cluster
//! - **Runner**: builds the right engine for a model and summarizes the run
//!
//! # Usage
//!
//! ```ignore
//! use ridgeline_sim::{ModelId, ModelRunner, SimEnvironment};
//!
//! let runner = ModelRunner::from_file("basic.json")?
//!     .with_seed(42)
//!     .with_environment(SimEnvironment::new().with_walltime(60));
//! let result = runner.run(ModelId::Basic)?;
//! ```

mod context;
mod error;
mod exporter;
pub mod kernels;
pub mod models;
mod runner;

pub use context::SimEnvironment;
pub use error::SimError;
pub use exporter::{ExportWriter, RunExport, RunFrame};
pub use models::{Basic, BasicSt, ErosionParameters, ModelId};
pub use runner::{ModelRunner, RunResult};
