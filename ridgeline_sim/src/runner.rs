//! Model runner - builds an engine for a reference model and drives it.

use crate::context::SimEnvironment;
use crate::error::SimError;
use crate::exporter::{ExportWriter, RunExport, RunFrame};
use crate::models::{Basic, BasicSt, ModelId};
use ridgeline_core::{EngineBuilder, ModelState, Parameters, PhysicalModel, RainRecord, RunOutcome, SimulationEngine};
use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, info};

/// Results from running a model.
#[derive(Debug, Clone, PartialEq)]
pub struct RunResult {
    /// Model that was run
    pub model: ModelId,

    /// Seed used
    pub seed: u64,

    /// Whether the run completed or stopped at a checkpoint
    pub outcome: RunOutcome,

    /// Final model time
    pub final_time: f64,

    /// Number of output files written so far
    pub outputs: u64,

    /// Core-node statistics at the last output
    pub mean_elevation_change: f64,
    pub max_elevation: f64,

    /// Number of recorded rain intervals (stochastic models with `record_rain`)
    pub rain_events: Option<usize>,
}

impl RunResult {
    /// Returns true if the run reached `run_duration`.
    pub fn completed(&self) -> bool {
        self.outcome == RunOutcome::Completed
    }
}

/// Runs reference models from one parameter set.
pub struct ModelRunner {
    /// Base parameters
    params: Parameters,

    /// Overrides `random_seed` when set
    seed: Option<u64>,

    /// Simulated environment; the engine default (SLURM) otherwise
    env: Option<SimEnvironment>,

    /// Virtual wall time charged per output
    minutes_per_output: f64,

    /// Where to write the run summary
    export_path: Option<String>,
}

impl ModelRunner {
    /// Creates a new model runner.
    pub fn new(params: Parameters) -> Self {
        Self {
            params,
            seed: None,
            env: None,
            minutes_per_output: 1.0,
            export_path: None,
        }
    }

    /// Creates a runner from a JSON parameter file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SimError> {
        Ok(Self::new(Parameters::from_file(path)?))
    }

    /// Sets the seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Runs under a simulated environment.
    pub fn with_environment(mut self, env: SimEnvironment) -> Self {
        self.env = Some(env);
        self
    }

    /// Sets the virtual wall time each output costs.
    pub fn with_minutes_per_output(mut self, minutes: f64) -> Self {
        self.minutes_per_output = minutes;
        self
    }

    /// Writes a JSON run summary to `path`.
    pub fn with_export(mut self, path: &str) -> Self {
        self.export_path = Some(path.to_string());
        self
    }

    /// Runs a model and returns the result.
    pub fn run(&self, model: ModelId) -> Result<RunResult, SimError> {
        let mut params = self.params.clone();
        if let Some(seed) = self.seed {
            params.insert("random_seed", seed);
        }
        let seed = params.get_whole_number("random_seed")?.unwrap_or(0);
        let first_output = if params.get_bool("save_first_timestep", false)? { 0 } else { 1 };
        info!("Starting model: {} (seed={}): {}", model.name(), seed, model.description());

        let export = Rc::new(RefCell::new(RunExport::new(model.name(), seed)));
        let mut builder = EngineBuilder::new().params(params);
        if self.export_path.is_some() {
            let handle = Rc::clone(&export);
            builder = builder.output_writer("export", move |_state: &ModelState| Ok(ExportWriter::new(handle)));
        }
        if let Some(env) = &self.env {
            let clock = env.clone();
            let cost = Duration::from_secs_f64(self.minutes_per_output.max(0.0) * 60.0);
            builder = builder
                .environment(env.clone())
                .output_function("walltime", move |_state: &ModelState| {
                    clock.advance_time(cost);
                    Ok(())
                });
        }

        let result = match model {
            ModelId::Basic => {
                let mut engine = builder.build(Basic::from_state)?;
                drive(&mut engine, model, seed, first_output)?
            }
            ModelId::BasicSt => {
                let mut engine = builder.build_stochastic(BasicSt::from_state)?;
                let mut result = drive::<BasicSt>(&mut engine, model, seed, first_output)?;
                result.rain_events = engine.rain_record().map(RainRecord::len);
                result
            }
        };

        if let Some(path) = &self.export_path {
            let mut export = export.borrow_mut();
            export.completed = result.completed();
            export.write_to_file(path).map_err(|e| SimError::export(path.as_str(), e))?;
            info!("Exported {} frames to {}", export.frames.len(), path);
        }
        if let Some(events) = result.rain_events {
            debug!("Recorded {} rain intervals", events);
        }
        Ok(result)
    }
}

/// Runs an engine to completion or checkpoint and summarizes the state.
fn drive<M: PhysicalModel>(
    engine: &mut SimulationEngine<M>,
    model: ModelId,
    seed: u64,
    first_output: u64,
) -> Result<RunResult, SimError> {
    let outcome = engine.run(None)?;
    let frame = RunFrame::from_state(engine.state())?;
    Ok(RunResult {
        model,
        seed,
        outcome,
        final_time: engine.model_time(),
        outputs: engine.clock().iteration.saturating_sub(first_output),
        mean_elevation_change: frame.mean_cumulative_change,
        max_elevation: frame.max_elevation,
        rain_events: None,
    })
}
