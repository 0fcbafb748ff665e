//! Ridgeline Core - Control Core for Time-Stepped Landscape Evolution Models
//!
//! This library owns everything around a physical landscape model except the
//! physics itself:
//! 1. **Time stepping**: fixed steps or storm/interstorm intervals, with the
//!    last step truncated so runs land exactly on their target time
//! 2. **Boundary conditions**: baselevel lowering, fault uplift and climate
//!    change, advanced before every model step
//! 3. **Output and checkpoints**: grid documents, user output writers, and
//!    wall-time driven checkpoint/resume on batch clusters

pub mod baselevel;
pub mod boundary;
pub mod checkpoint;
pub mod engine;
pub mod error;
pub mod fault;
pub mod grid;
pub mod interp;
pub mod output;
pub mod params;
pub mod precip_changer;
pub mod rain;
pub mod rng;
pub mod setup;
pub mod stochastic;
pub mod storm;

#[cfg(test)]
pub(crate) mod testing;

// Re-export key types for convenience
pub use boundary::{BoundaryCondition, BoundaryHandler, BoundaryHandlerKind, BoundaryHandlerRegistry};
pub use engine::{
    EngineBuilder, Lifecycle, ModelState, PhysicalModel, RunOutcome, SimulationClock, SimulationEngine, TimeAdvance,
};
pub use error::{ModelError, ModelResult};
pub use grid::{GridTopology, ModelGrid, NodeStatus, CUMULATIVE_CHANGE, ELEVATION, INITIAL_ELEVATION};
pub use output::{OutputWriter, OutputWriterRegistry};
pub use params::Parameters;
pub use rain::{RainRecord, StormEvent};
pub use rng::SeededRng;
pub use stochastic::{StochasticClimate, StochasticSimulationEngine};
pub use storm::{StormMode, StormSequencer};
