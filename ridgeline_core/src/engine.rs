//! The simulation control core.
//!
//! [`SimulationEngine`] owns model time and drives the run loop:
//!
//! ```text
//! per step:    boundary handlers -> physical model -> clock -> stability check
//! per output:  cumulative change -> grid document -> output writers -> wall-time check
//! at the end:  finalize -> delete checkpoint
//! ```
//!
//! Physical models plug in through [`PhysicalModel`]; everything they may
//! read or mutate lives in [`ModelState`].

use crate::boundary::BoundaryHandlerRegistry;
use crate::checkpoint::{delete_checkpoint, CheckpointState, CHECKPOINT_VERSION, DEFAULT_CHECKPOINT_NAME};
use crate::error::{ModelError, ModelResult};
use crate::grid::{ModelGrid, CUMULATIVE_CHANGE, ELEVATION, INITIAL_ELEVATION};
use crate::output::{output_path, write_grid, OutputFunction, OutputWriterFactory, OutputWriterRegistry};
use crate::params::Parameters;
use crate::rng::SeededRng;
use crate::setup::build_grid;
use crate::stochastic::StochasticClimate;
use ridgeline_env::{RunEnvironment, SlurmEnvironment};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Default base name of output files.
pub const DEFAULT_OUTPUT_FILENAME: &str = "ridgeline_output";

/// Ratio snapping tolerance when counting steps.
const STEP_RATIO_TOLERANCE: f64 = 1e-9;

/// Model time bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationClock {
    pub current_time: f64,
    pub step_size: f64,
    pub output_interval: f64,
    pub run_duration: f64,
    /// Index of the next output file
    pub iteration: u64,
}

impl SimulationClock {
    /// Reads `dt`, `output_interval` and `run_duration`, all required and
    /// positive.
    pub fn from_params(params: &Parameters) -> ModelResult<Self> {
        let save_first_timestep = params.get_bool("save_first_timestep", false)?;
        Ok(Self {
            current_time: 0.0,
            step_size: params.require_positive_f64("dt")?,
            output_interval: params.require_positive_f64("output_interval")?,
            run_duration: params.require_positive_f64("run_duration")?,
            iteration: if save_first_timestep { 0 } else { 1 },
        })
    }

    pub fn advance_time(&mut self, dt: f64) {
        self.current_time += dt;
    }

    pub fn is_finished(&self) -> bool {
        self.current_time >= self.run_duration
    }
}

/// Engine lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Lifecycle {
    Uninitialized,
    Ready,
    Running,
    Checkpointed,
    Finalized,
}

/// How a call to [`SimulationEngine::run`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Reached `run_duration` and finalized
    Completed,
    /// Stopped early after writing a wall-time checkpoint
    Checkpointed,
}

/// Everything a physical model, handler or output writer may see.
#[derive(Debug, Clone)]
pub struct ModelState {
    pub grid: ModelGrid,
    pub clock: SimulationClock,
    pub params: Parameters,
    pub boundary_handlers: BoundaryHandlerRegistry,
    /// Rainfall rate of the current interval
    pub rainfall_rate: f64,
    /// Runoff rate of the current interval
    pub runoff_rate: f64,
}

impl ModelState {
    pub fn model_time(&self) -> f64 {
        self.clock.current_time
    }

    /// Advances every boundary handler by `dt`.
    pub fn update_boundary_conditions(&mut self, dt: f64) -> ModelResult<()> {
        self.boundary_handlers.run_one_step(&mut self.grid, dt)
    }

    /// Refreshes the cumulative elevation change field.
    pub fn calculate_cumulative_change(&mut self) -> ModelResult<()> {
        let change = self.grid.require_field(ELEVATION)? - self.grid.require_field(INITIAL_ELEVATION)?;
        self.grid.add_field(CUMULATIVE_CHANGE, change)
    }

    /// Erodibility multiplier from a registered `PrecipChanger`, else 1.
    pub fn erodibility_adjustment_factor(&self) -> f64 {
        self.boundary_handlers
            .precip_changer()
            .map_or(1.0, |changer| changer.get_erodibility_adjustment_factor())
    }
}

/// A concrete landscape model advanced by the engine.
///
/// The model is serialized into checkpoints, so it must carry all of its
/// state in serializable fields.
pub trait PhysicalModel: Serialize + DeserializeOwned {
    /// Advances physical state by `dt`. Boundary handlers have already run.
    fn run_one_step(&mut self, state: &mut ModelState, dt: f64) -> ModelResult<()>;

    /// Runs once after the last output. No-op by default.
    fn finalize(&mut self, _state: &mut ModelState) -> ModelResult<()> {
        Ok(())
    }
}

/// Time-advance semantics of an engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TimeAdvance {
    /// Uniform steps of `dt`, last one truncated
    Fixed,
    /// Steps split into storm and interstorm intervals
    Stochastic(StochasticClimate),
}

/// Number of steps of length `step` needed to cover `duration`.
///
/// Ratios within a relative 1e-9 of a whole number count as that number, so
/// `duration = k * step` takes `k` steps despite rounding. Any positive
/// duration takes at least one step.
pub fn step_count(step: f64, duration: f64) -> usize {
    if duration <= 0.0 {
        return 0;
    }
    let ratio = duration / step;
    let nearest = ratio.round();
    if (ratio - nearest).abs() <= STEP_RATIO_TOLERANCE * nearest.max(1.0) {
        nearest.max(1.0) as usize
    } else {
        ratio.ceil() as usize
    }
}

/// One model step: handlers, model, clock, then stability check.
pub(crate) fn step_model<M: PhysicalModel>(state: &mut ModelState, model: &mut M, dt: f64) -> ModelResult<()> {
    state.update_boundary_conditions(dt)?;
    model.run_one_step(state, dt)?;
    state.clock.advance_time(dt);
    if let Some(field) = state.grid.first_non_finite_field() {
        return Err(ModelError::Instability {
            field: field.to_string(),
            time: state.clock.current_time,
        });
    }
    Ok(())
}

/// Steps of `step` covering exactly `duration`, the last one truncated.
/// Returns the number of model steps taken.
pub(crate) fn advance_steps<M: PhysicalModel>(
    state: &mut ModelState,
    model: &mut M,
    step: f64,
    duration: f64,
) -> ModelResult<usize> {
    let start = state.clock.current_time;
    let target = start + duration;
    let n = step_count(step, duration);
    for k in 0..n {
        let dt = if k + 1 == n { target - state.clock.current_time } else { step };
        step_model(state, model, dt)?;
    }
    state.clock.current_time = target.max(start);
    Ok(n)
}

/// Assembles a [`SimulationEngine`].
///
/// Exactly one of [`input_file`](Self::input_file) and
/// [`params`](Self::params) must be given.
#[derive(Default)]
pub struct EngineBuilder {
    input_file: Option<PathBuf>,
    params: Option<Parameters>,
    object_writers: Vec<(String, OutputWriterFactory)>,
    function_writers: Vec<(String, OutputFunction)>,
    env: Option<Box<dyn RunEnvironment>>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads parameters from a JSON file.
    pub fn input_file(mut self, path: impl AsRef<Path>) -> Self {
        self.input_file = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn params(mut self, params: Parameters) -> Self {
        self.params = Some(params);
        self
    }

    /// Adds a stateful writer, built from the model state once it exists.
    pub fn output_writer<W, F>(mut self, name: &str, factory: F) -> Self
    where
        W: crate::output::OutputWriter + 'static,
        F: FnOnce(&ModelState) -> ModelResult<W> + 'static,
    {
        let factory: OutputWriterFactory = Box::new(move |state: &ModelState| {
            let writer: Box<dyn crate::output::OutputWriter> = Box::new(factory(state)?);
            Ok(writer)
        });
        self.object_writers.push((name.to_string(), factory));
        self
    }

    /// Adds a stateless writer.
    pub fn output_function<F>(mut self, name: &str, function: F) -> Self
    where
        F: FnMut(&ModelState) -> ModelResult<()> + 'static,
    {
        self.function_writers.push((name.to_string(), Box::new(function)));
        self
    }

    /// Overrides the run environment (SLURM by default).
    pub fn environment(mut self, env: impl RunEnvironment + 'static) -> Self {
        self.env = Some(Box::new(env));
        self
    }

    fn resolve_params(&mut self) -> ModelResult<Parameters> {
        match (self.input_file.take(), self.params.take()) {
            (Some(_), Some(_)) => Err(ModelError::config(
                "input_file",
                "both an input file and a parameter set were supplied",
            )),
            (None, None) => Err(ModelError::config(
                "input_file",
                "either an input file or a parameter set is required",
            )),
            (Some(path), None) => Parameters::from_file(path),
            (None, Some(params)) => Ok(params),
        }
    }

    /// Builds an engine with fixed time steps.
    ///
    /// `init` creates the physical model once the grid, topography and
    /// boundary handlers exist. It is not called when resuming from a
    /// checkpoint.
    pub fn build<M, F>(self, init: F) -> ModelResult<SimulationEngine<M>>
    where
        M: PhysicalModel,
        F: FnOnce(&mut ModelState) -> ModelResult<M>,
    {
        self.build_with(|_| Ok(TimeAdvance::Fixed), init)
    }

    pub(crate) fn build_with<M, A, F>(mut self, advance: A, init: F) -> ModelResult<SimulationEngine<M>>
    where
        M: PhysicalModel,
        A: FnOnce(&Parameters) -> ModelResult<TimeAdvance>,
        F: FnOnce(&mut ModelState) -> ModelResult<M>,
    {
        let mut params = self.resolve_params()?;
        SimulationClock::from_params(&params)?;
        let checkpoint_path = PathBuf::from(params.get_str("checkpoint_name")?.unwrap_or(DEFAULT_CHECKPOINT_NAME));
        let env = self
            .env
            .take()
            .unwrap_or_else(|| Box::new(SlurmEnvironment::from_env()) as Box<dyn RunEnvironment>);

        let mut engine = if params.get_bool("load_from_checkpoint", false)? && checkpoint_path.exists() {
            let checkpoint = CheckpointState::<M>::load(&checkpoint_path)?;
            info!(
                "Resuming from checkpoint {} at t={} (output {})",
                checkpoint_path.display(),
                checkpoint.clock.current_time,
                checkpoint.clock.iteration
            );
            SimulationEngine::from_checkpoint(checkpoint, env, checkpoint_path)?
        } else {
            params.resolve_length_factor()?;
            let clock = SimulationClock::from_params(&params)?;
            let mut rng = SeededRng::new(params.get_whole_number("random_seed")?.unwrap_or(0));
            let (mut grid, _) = build_grid(&params, &mut rng)?;
            let boundary_handlers = BoundaryHandlerRegistry::from_params(&mut grid, &params)?;
            let time_advance = advance(&params)?;
            let water = params.f64_or("water_unit_flux_in", 1.0)?;
            let mut state = ModelState {
                grid,
                clock,
                params,
                boundary_handlers,
                rainfall_rate: water,
                runoff_rate: water,
            };
            let model = init(&mut state)?;
            SimulationEngine::assemble(state, model, time_advance, rng, env, checkpoint_path)?
        };

        for (name, factory) in self.object_writers {
            engine.writers.register_object(&name, factory, &engine.state)?;
        }
        for (name, function) in self.function_writers {
            engine.writers.register_function(&name, function);
        }
        engine.transition(Lifecycle::Ready);
        Ok(engine)
    }
}

/// The base control core.
pub struct SimulationEngine<M: PhysicalModel> {
    state: ModelState,
    model: M,
    time_advance: TimeAdvance,
    writers: OutputWriterRegistry,
    env: Box<dyn RunEnvironment>,
    /// Topography stream, kept for checkpoints
    rng: SeededRng,
    lifecycle: Lifecycle,
    /// Wall-clock minutes sampled at each output
    compute_times: Vec<f64>,
    checkpoint_path: PathBuf,
    output_filename: String,
    save_first_timestep: bool,
}

impl<M: PhysicalModel> SimulationEngine<M> {
    fn assemble(
        state: ModelState,
        model: M,
        time_advance: TimeAdvance,
        rng: SeededRng,
        env: Box<dyn RunEnvironment>,
        checkpoint_path: PathBuf,
    ) -> ModelResult<Self> {
        let output_filename = state
            .params
            .get_str("output_filename")?
            .unwrap_or(DEFAULT_OUTPUT_FILENAME)
            .to_string();
        let save_first_timestep = state.params.get_bool("save_first_timestep", false)?;
        Ok(Self {
            state,
            model,
            time_advance,
            writers: OutputWriterRegistry::new(),
            env,
            rng,
            lifecycle: Lifecycle::Uninitialized,
            compute_times: Vec::new(),
            checkpoint_path,
            output_filename,
            save_first_timestep,
        })
    }

    fn from_checkpoint(
        checkpoint: CheckpointState<M>,
        env: Box<dyn RunEnvironment>,
        checkpoint_path: PathBuf,
    ) -> ModelResult<Self> {
        let state = ModelState {
            grid: checkpoint.grid,
            clock: checkpoint.clock,
            params: checkpoint.params,
            boundary_handlers: checkpoint.boundary_handlers,
            rainfall_rate: checkpoint.rainfall_rate,
            runoff_rate: checkpoint.runoff_rate,
        };
        Self::assemble(
            state,
            checkpoint.model,
            checkpoint.time_advance,
            checkpoint.rng,
            env,
            checkpoint_path,
        )
    }

    fn transition(&mut self, to: Lifecycle) {
        debug!("Engine lifecycle {:?} -> {:?}", self.lifecycle, to);
        self.lifecycle = to;
    }

    pub fn state(&self) -> &ModelState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut ModelState {
        &mut self.state
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    pub fn grid(&self) -> &ModelGrid {
        &self.state.grid
    }

    pub fn clock(&self) -> &SimulationClock {
        &self.state.clock
    }

    pub fn params(&self) -> &Parameters {
        &self.state.params
    }

    pub fn model_time(&self) -> f64 {
        self.state.clock.current_time
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn time_advance(&self) -> &TimeAdvance {
        &self.time_advance
    }

    pub(crate) fn time_advance_mut(&mut self) -> &mut TimeAdvance {
        &mut self.time_advance
    }

    pub fn output_writers(&self) -> &OutputWriterRegistry {
        &self.writers
    }

    pub fn checkpoint_path(&self) -> &Path {
        &self.checkpoint_path
    }

    /// Advances every boundary handler by `dt` without stepping the model.
    pub fn update_boundary_conditions(&mut self, dt: f64) -> ModelResult<()> {
        self.state.update_boundary_conditions(dt)
    }

    /// Advances the model by exactly `duration` in steps of at most `step`.
    ///
    /// Returns the number of model steps taken; with fixed time advance that
    /// is `ceil(duration / step)`.
    pub fn advance_for(&mut self, step: f64, duration: f64) -> ModelResult<usize> {
        let target = self.state.clock.current_time + duration;
        self.advance_to(step, target)
    }

    fn advance_to(&mut self, step: f64, target: f64) -> ModelResult<usize> {
        if !(step.is_finite() && step > 0.0) {
            return Err(ModelError::config("dt", format!("step must be positive, got {}", step)));
        }
        let duration = target - self.state.clock.current_time;
        if duration <= 0.0 {
            return Ok(0);
        }
        let calls = match &mut self.time_advance {
            TimeAdvance::Fixed => advance_steps(&mut self.state, &mut self.model, step, duration)?,
            TimeAdvance::Stochastic(climate) => climate.advance(&mut self.state, &mut self.model, step, duration)?,
        };
        self.state.clock.current_time = target;
        Ok(calls)
    }

    /// Runs to `run_duration`, writing output every `output_interval`.
    ///
    /// Returns [`RunOutcome::Checkpointed`] when the wall-time budget ran out
    /// and the environment did not end the process.
    pub fn run(&mut self, output_fields: Option<&[&str]>) -> ModelResult<RunOutcome> {
        if self.lifecycle == Lifecycle::Finalized {
            debug!("Run requested on a finalized engine");
            return Ok(RunOutcome::Completed);
        }
        self.transition(Lifecycle::Running);
        info!(
            "Run started at t={} (run_duration={}, dt={}, output_interval={})",
            self.state.clock.current_time,
            self.state.clock.run_duration,
            self.state.clock.step_size,
            self.state.clock.output_interval
        );
        if self.state.params.get_bool("opt_walltime", false)? {
            self.compute_times.push(self.env.elapsed().as_secs_f64() / 60.0);
        }

        if self.save_first_timestep && self.state.clock.iteration == 0 {
            self.write_output(output_fields)?;
        }

        let step = self.state.clock.step_size;
        let interval = self.state.clock.output_interval;
        let end = self.state.clock.run_duration;
        while self.state.clock.current_time < end {
            let next = (self.state.clock.current_time + interval).min(end);
            self.advance_to(step, next)?;
            self.write_output(output_fields)?;
            if self.check_wall_time_budget()? {
                return Ok(RunOutcome::Checkpointed);
            }
        }

        self.finalize()?;
        if delete_checkpoint(&self.checkpoint_path)? {
            debug!("Removed checkpoint {}", self.checkpoint_path.display());
        }
        self.transition(Lifecycle::Finalized);
        info!("✓ Run finished at t={} after {} outputs", self.state.clock.current_time, self.state.clock.iteration);
        Ok(RunOutcome::Completed)
    }

    /// Writes the requested fields (all when `None`) and fires the output
    /// writers, then moves on to the next output index.
    pub fn write_output(&mut self, field_names: Option<&[&str]>) -> ModelResult<()> {
        self.state.calculate_cumulative_change()?;
        let iteration = self.state.clock.iteration;
        let path = output_path(&self.output_filename, iteration);
        write_grid(&self.state.grid, field_names, iteration, self.state.clock.current_time, &path)?;
        self.writers.fire(&self.state)?;
        debug!("Output {} written to {} at t={}", iteration, path.display(), self.state.clock.current_time);
        self.state.clock.iteration += 1;
        Ok(())
    }

    /// Runs the model's and the climate's finalize steps.
    pub fn finalize(&mut self) -> ModelResult<()> {
        self.model.finalize(&mut self.state)?;
        if let TimeAdvance::Stochastic(climate) = &self.time_advance {
            climate.finalize()?;
        }
        Ok(())
    }

    /// Checks the remaining batch-job wall time after an output.
    ///
    /// Controlled by `opt_walltime`, `opt_save`, `wall_threshold`,
    /// `dynamic_cut_off_time` and `cut_off_time` (minutes). With the dynamic
    /// cutoff the budget needed is the mean wall time between outputs plus the
    /// threshold. When the remaining time falls below the cutoff and saving is
    /// enabled, a checkpoint is written and the environment asked to
    /// terminate. Returns whether that happened. Scheduler failures skip the
    /// check.
    ///
    /// Wall-clock samples are not checkpointed: a resumed run learns the mean
    /// interval again from its own start.
    pub fn check_wall_time_budget(&mut self) -> ModelResult<bool> {
        let params = &self.state.params;
        if !params.get_bool("opt_walltime", false)? {
            return Ok(false);
        }
        let opt_save = params.get_bool("opt_save", false)?;
        let threshold = params.f64_or("wall_threshold", 0.0)?;
        let dynamic = params.get_bool("dynamic_cut_off_time", false)?;
        let mut cut_off = params.f64_or("cut_off_time", 0.0)?;

        self.compute_times.push(self.env.elapsed().as_secs_f64() / 60.0);
        if dynamic && self.compute_times.len() >= 2 {
            let span = self.compute_times[self.compute_times.len() - 1] - self.compute_times[0];
            cut_off = span / (self.compute_times.len() - 1) as f64 + threshold;
        }

        let remaining = match self.env.remaining_walltime() {
            Ok(left) => left.as_minutes(),
            Err(e) => {
                debug!("Wall-time check skipped: {}", e);
                return Ok(false);
            }
        };
        debug!("Wall time remaining {:.1} min, cutoff {:.1} min", remaining, cut_off);

        if opt_save && remaining < cut_off {
            self.save_checkpoint()?;
            self.transition(Lifecycle::Checkpointed);
            info!(
                "Wall time nearly exhausted ({:.1} min left), checkpoint written to {}",
                remaining,
                self.checkpoint_path.display()
            );
            self.env.terminate();
            return Ok(true);
        }
        Ok(false)
    }

    fn snapshot<T>(&self, model: T) -> CheckpointState<T> {
        CheckpointState {
            version: CHECKPOINT_VERSION,
            clock: self.state.clock.clone(),
            params: self.state.params.clone(),
            grid: self.state.grid.clone(),
            boundary_handlers: self.state.boundary_handlers.clone(),
            time_advance: self.time_advance.clone(),
            rng: self.rng.clone(),
            rainfall_rate: self.state.rainfall_rate,
            runoff_rate: self.state.runoff_rate,
            model,
        }
    }

    /// Writes a full checkpoint to the configured path.
    pub fn save_checkpoint(&self) -> ModelResult<()> {
        let model = serde_json::to_value(&self.model)?;
        self.snapshot(model).save(&self.checkpoint_path)
    }
}

impl<M: PhysicalModel> std::fmt::Debug for SimulationEngine<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationEngine")
            .field("lifecycle", &self.lifecycle)
            .field("clock", &self.state.clock)
            .field("writers", &self.writers)
            .field("checkpoint_path", &self.checkpoint_path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{GridDocument, OutputWriter};
    use crate::testing::{params, ScriptedEnv, Uplift};
    use proptest::prelude::*;
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn build(params: Parameters, env: ScriptedEnv) -> ModelResult<SimulationEngine<Uplift>> {
        EngineBuilder::new()
            .params(params)
            .environment(env)
            .build(|_| Ok(Uplift::new(0.001)))
    }

    #[test]
    fn test_input_source_must_be_unique() {
        let dir = tempfile::tempdir().unwrap();
        let both = EngineBuilder::new()
            .input_file(dir.path().join("input.json"))
            .params(params(dir.path(), json!({})))
            .build(|_| Ok(Uplift::default()));
        assert!(both.unwrap_err().is_configuration());

        let neither = EngineBuilder::new().build(|_| Ok(Uplift::default()));
        assert!(neither.unwrap_err().is_configuration());
    }

    #[test]
    fn test_input_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.json");
        let p = params(dir.path(), json!({"run_duration": 4.0}));
        std::fs::write(&path, serde_json::to_string(&p).unwrap()).unwrap();

        let engine = EngineBuilder::new()
            .input_file(&path)
            .environment(ScriptedEnv::unscheduled())
            .build(|_| Ok(Uplift::default()))
            .unwrap();
        assert_eq!(engine.clock().run_duration, 4.0);
        assert_eq!(engine.lifecycle(), Lifecycle::Ready);
    }

    #[test]
    fn test_missing_dt() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = params(dir.path(), json!({}));
        p.remove("dt");
        let err = build(p, ScriptedEnv::unscheduled()).unwrap_err();
        assert!(matches!(err, ModelError::Configuration { ref key, .. } if key == "dt"));
    }

    #[test]
    fn test_step_count_snaps_near_integers() {
        assert_eq!(step_count(0.1, 0.3), 3);
        assert_eq!(step_count(1.0, 2.5), 3);
        assert_eq!(step_count(1.0, 2.0), 2);
        assert_eq!(step_count(1.0, 0.0), 0);
        assert_eq!(step_count(1.0, 1e-10), 1);
        assert_eq!(step_count(1.0e6, 0.5), 1);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn test_advance_for_lands_exactly(step in 0.01f64..5.0, duration in 0.01f64..50.0) {
            let dir = tempfile::tempdir().unwrap();
            let mut engine = build(params(dir.path(), json!({})), ScriptedEnv::unscheduled()).unwrap();
            let calls = engine.advance_for(step, duration).unwrap();
            prop_assert_eq!(calls, step_count(step, duration));
            prop_assert_eq!(engine.model().steps, calls);
            prop_assert_eq!(engine.model_time(), duration);
            prop_assert!(calls as f64 >= duration / step - 1e-6);
            prop_assert!(((calls - 1) as f64) < duration / step + 1e-6);
        }
    }

    #[test]
    fn test_advance_for_tiny_duration_takes_one_step() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = build(params(dir.path(), json!({})), ScriptedEnv::unscheduled()).unwrap();
        assert_eq!(engine.advance_for(1.0, 1e-10).unwrap(), 1);
        assert_eq!(engine.model().steps, 1);
        assert_eq!(engine.model_time(), 1e-10);
    }

    #[test]
    fn test_advance_for_rejects_bad_step() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = build(params(dir.path(), json!({})), ScriptedEnv::unscheduled()).unwrap();
        assert!(engine.advance_for(0.0, 1.0).is_err());
        assert!(engine.advance_for(f64::NAN, 1.0).is_err());
        assert_eq!(engine.advance_for(1.0, 0.0).unwrap(), 0);
    }

    #[test]
    fn test_run_writes_every_interval() {
        let dir = tempfile::tempdir().unwrap();
        let p = params(dir.path(), json!({"run_duration": 200.0}));
        let mut engine = build(p, ScriptedEnv::unscheduled()).unwrap();

        assert_eq!(engine.run(None).unwrap(), RunOutcome::Completed);
        assert_eq!(engine.model_time(), 200.0);
        assert_eq!(engine.model().steps, 200);
        assert_eq!(engine.clock().iteration, 101);
        assert!(engine.model().finalized);
        assert_eq!(engine.lifecycle(), Lifecycle::Finalized);
        assert!(!dir.path().join("run0000.json").exists());
        assert!(dir.path().join("run0001.json").exists());
        assert!(dir.path().join("run0100.json").exists());
        assert!(!dir.path().join("run0101.json").exists());
    }

    #[test]
    fn test_save_first_timestep() {
        let dir = tempfile::tempdir().unwrap();
        let p = params(dir.path(), json!({"run_duration": 200.0, "save_first_timestep": true}));
        let mut engine = build(p, ScriptedEnv::unscheduled()).unwrap();
        engine.run(None).unwrap();

        assert_eq!(engine.clock().iteration, 101);
        let first = GridDocument::read(dir.path().join("run0000.json")).unwrap();
        assert_eq!(first.iteration(), 0);
        assert!(first.fields()[CUMULATIVE_CHANGE].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_last_interval_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let p = params(dir.path(), json!({"output_interval": 3.0}));
        let times = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&times);
        let mut engine = EngineBuilder::new()
            .params(p)
            .environment(ScriptedEnv::unscheduled())
            .output_function("times", move |state: &ModelState| {
                log.borrow_mut().push(state.model_time());
                Ok(())
            })
            .build(|_| Ok(Uplift::new(0.001)))
            .unwrap();
        engine.run(None).unwrap();
        assert_eq!(*times.borrow(), vec![3.0, 6.0, 9.0, 10.0]);
        assert_eq!(engine.model().steps, 10);
    }

    struct CoreMean(Rc<RefCell<Vec<f64>>>);

    impl OutputWriter for CoreMean {
        fn run_one_step(&mut self, state: &ModelState) -> ModelResult<()> {
            let core = state.grid.core_nodes();
            let change = state.grid.require_field(CUMULATIVE_CHANGE)?;
            let mean = core.iter().map(|&n| change[n]).sum::<f64>() / core.len() as f64;
            self.0.borrow_mut().push(mean);
            Ok(())
        }
    }

    #[test]
    fn test_object_writer_sees_cumulative_change() {
        let dir = tempfile::tempdir().unwrap();
        let means = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&means);
        let mut engine = EngineBuilder::new()
            .params(params(dir.path(), json!({"run_duration": 4.0})))
            .environment(ScriptedEnv::unscheduled())
            .output_writer("core_mean", move |_state: &ModelState| Ok(CoreMean(sink)))
            .build(|_| Ok(Uplift::new(0.5)))
            .unwrap();
        assert_eq!(engine.output_writers().object_names(), vec!["core_mean"]);

        engine.run(None).unwrap();
        let means = means.borrow();
        assert_eq!(means.len(), 2);
        approx::assert_relative_eq!(means[0], 1.0);
        approx::assert_relative_eq!(means[1], 2.0);
    }

    #[test]
    fn test_writer_failure_aborts_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = EngineBuilder::new()
            .params(params(dir.path(), json!({})))
            .environment(ScriptedEnv::unscheduled())
            .output_function("flaky", |_state: &ModelState| Err(ModelError::writer("flaky", "disk full")))
            .build(|_| Ok(Uplift::default()))
            .unwrap();
        let err = engine.run(None).unwrap_err();
        assert!(matches!(err, ModelError::Writer { ref name, .. } if name == "flaky"));
        assert_eq!(engine.model_time(), 2.0);
    }

    #[test]
    fn test_instability_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = EngineBuilder::new()
            .params(params(dir.path(), json!({})))
            .environment(ScriptedEnv::unscheduled())
            .build(|_| Ok(Uplift::new(f64::NAN)))
            .unwrap();
        let err = engine.run(None).unwrap_err();
        assert!(matches!(err, ModelError::Instability { ref field, time } if field == ELEVATION && time == 1.0));
    }

    #[test]
    fn test_hex_output_falls_back_to_graph() {
        let dir = tempfile::tempdir().unwrap();
        let p = params(dir.path(), json!({"model_grid": "HexModelGrid", "run_duration": 2.0}));
        let mut engine = build(p, ScriptedEnv::unscheduled()).unwrap();
        engine.run(Some(&[ELEVATION])).unwrap();

        let doc = GridDocument::read(dir.path().join("run0001.json")).unwrap();
        let GridDocument::Graph(graph) = doc else {
            panic!("hex output should be a graph document");
        };
        assert_eq!(graph.x_of_node.len(), engine.grid().number_of_nodes());
        assert_eq!(graph.fields.len(), 1);
    }

    #[test]
    fn test_scheduler_error_skips_wall_time_check() {
        let dir = tempfile::tempdir().unwrap();
        let env = ScriptedEnv::unscheduled();
        let p = params(dir.path(), json!({"opt_walltime": true, "opt_save": true, "cut_off_time": 1e9}));
        let mut engine = build(p, env.clone()).unwrap();

        assert_eq!(engine.run(None).unwrap(), RunOutcome::Completed);
        assert!(!env.terminated());
        assert!(!engine.checkpoint_path().exists());
    }

    #[test]
    fn test_wall_clock_untouched_without_opt_walltime() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = build(params(dir.path(), json!({})), ScriptedEnv::unscheduled()).unwrap();
        assert_eq!(engine.run(None).unwrap(), RunOutcome::Completed);
        assert!(engine.compute_times.is_empty());

        let dir = tempfile::tempdir().unwrap();
        let p = params(dir.path(), json!({"opt_walltime": true}));
        let mut engine = build(p, ScriptedEnv::unscheduled()).unwrap();
        engine.run(None).unwrap();
        // One sample at the start and one per output.
        assert_eq!(engine.compute_times.len(), 6);
    }

    #[test]
    fn test_low_budget_without_opt_save_keeps_running() {
        let dir = tempfile::tempdir().unwrap();
        let env = ScriptedEnv::new(1.0, &[], Some(1));
        let p = params(dir.path(), json!({"opt_walltime": true, "cut_off_time": 5.0}));
        let mut engine = build(p, env.clone()).unwrap();

        assert_eq!(engine.run(None).unwrap(), RunOutcome::Completed);
        assert!(!env.terminated());
    }

    #[test]
    fn test_dynamic_cut_off_uses_mean_interval() {
        let extra = json!({
            "opt_walltime": true, "opt_save": true,
            "dynamic_cut_off_time": true, "wall_threshold": 25.0
        });
        // Each output costs 30 minutes, so 50 minutes left is below 30 + 25.
        let dir = tempfile::tempdir().unwrap();
        let env = ScriptedEnv::new(30.0, &[], Some(50));
        let mut engine = build(params(dir.path(), extra.clone()), env.clone()).unwrap();
        assert_eq!(engine.run(None).unwrap(), RunOutcome::Checkpointed);
        assert!(env.terminated());
        assert_eq!(engine.lifecycle(), Lifecycle::Checkpointed);
        assert_eq!(engine.model_time(), 2.0);
        assert!(engine.checkpoint_path().exists());

        let static_dir = tempfile::tempdir().unwrap();
        let mut extra = extra;
        extra["dynamic_cut_off_time"] = json!(false);
        let env = ScriptedEnv::new(30.0, &[], Some(50));
        let mut engine = build(params(static_dir.path(), extra), env.clone()).unwrap();
        assert_eq!(engine.run(None).unwrap(), RunOutcome::Completed);
        assert!(!env.terminated());
    }

    #[test]
    fn test_checkpoint_removed_after_completion() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = build(params(dir.path(), json!({})), ScriptedEnv::unscheduled()).unwrap();
        engine.save_checkpoint().unwrap();
        assert!(engine.checkpoint_path().exists());

        engine.run(None).unwrap();
        assert!(!engine.checkpoint_path().exists());
        assert_eq!(engine.run(None).unwrap(), RunOutcome::Completed);
        assert_eq!(engine.model().steps, 10);
    }

    #[test]
    fn test_resume_continues_fixed_run() {
        let extra = json!({
            "opt_walltime": true, "opt_save": true, "cut_off_time": 5.0,
            "load_from_checkpoint": true, "initial_noise_std": 0.1, "random_seed": 3
        });
        let dir = tempfile::tempdir().unwrap();
        let env = ScriptedEnv::new(1.0, &[100, 1], Some(100));
        let mut engine = build(params(dir.path(), extra.clone()), env).unwrap();
        assert_eq!(engine.run(None).unwrap(), RunOutcome::Checkpointed);
        assert_eq!(engine.clock().iteration, 3);

        let mut resumed = EngineBuilder::new()
            .params(params(dir.path(), extra.clone()))
            .environment(ScriptedEnv::plenty())
            .build(|_| -> ModelResult<Uplift> { panic!("resuming must not rebuild the model") })
            .unwrap();
        assert_eq!(resumed.model_time(), 4.0);
        assert_eq!(resumed.clock().iteration, 3);
        assert_eq!(resumed.run(None).unwrap(), RunOutcome::Completed);

        let reference_dir = tempfile::tempdir().unwrap();
        let mut reference = build(params(reference_dir.path(), extra), ScriptedEnv::plenty()).unwrap();
        reference.run(None).unwrap();

        assert_eq!(resumed.model(), reference.model());
        assert_eq!(resumed.clock(), reference.clock());
        assert_eq!(resumed.grid().field(ELEVATION), reference.grid().field(ELEVATION));
    }
}
