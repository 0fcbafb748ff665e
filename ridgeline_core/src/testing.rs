//! Shared fixtures for the engine tests.

use crate::engine::{ModelState, PhysicalModel};
use crate::error::ModelResult;
use crate::grid::ELEVATION;
use crate::params::Parameters;
use ridgeline_env::{EnvError, RunEnvironment, WallTime};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

/// Raises core nodes at `rate * runoff_rate`.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Uplift {
    pub rate: f64,
    pub steps: usize,
    pub finalized: bool,
}

impl Uplift {
    pub fn new(rate: f64) -> Self {
        Self {
            rate,
            ..Self::default()
        }
    }
}

impl PhysicalModel for Uplift {
    fn run_one_step(&mut self, state: &mut ModelState, dt: f64) -> ModelResult<()> {
        let core = state.grid.core_nodes();
        let change = self.rate * state.runoff_rate * dt;
        let z = state.grid.require_field_mut(ELEVATION)?;
        for n in core {
            z[n] += change;
        }
        self.steps += 1;
        Ok(())
    }

    fn finalize(&mut self, _state: &mut ModelState) -> ModelResult<()> {
        self.finalized = true;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Script {
    minutes_per_sample: f64,
    samples: Cell<u32>,
    remaining: RefCell<VecDeque<u64>>,
    then: Option<u64>,
    terminated: Cell<bool>,
}

/// Run environment with a virtual clock and a scripted wall-time budget.
///
/// Every `elapsed` call moves the clock forward by `minutes_per_sample`.
/// Budgets are served from `remaining`, then `then` forever; `None` behaves
/// like a machine without a scheduler.
#[derive(Debug, Clone, Default)]
pub struct ScriptedEnv(Rc<Script>);

impl ScriptedEnv {
    pub fn new(minutes_per_sample: f64, remaining: &[u64], then: Option<u64>) -> Self {
        Self(Rc::new(Script {
            minutes_per_sample,
            remaining: RefCell::new(remaining.iter().copied().collect()),
            then,
            ..Script::default()
        }))
    }

    /// No scheduler at all.
    pub fn unscheduled() -> Self {
        Self::new(1.0, &[], None)
    }

    /// A scheduler that always reports plenty of time.
    pub fn plenty() -> Self {
        Self::new(1.0, &[], Some(10_000))
    }

    pub fn terminated(&self) -> bool {
        self.0.terminated.get()
    }
}

impl RunEnvironment for ScriptedEnv {
    fn elapsed(&self) -> Duration {
        let n = self.0.samples.get();
        self.0.samples.set(n + 1);
        Duration::from_secs_f64(n as f64 * self.0.minutes_per_sample * 60.0)
    }

    fn remaining_walltime(&self) -> Result<WallTime, EnvError> {
        let next = self.0.remaining.borrow_mut().pop_front().or(self.0.then);
        next.map(WallTime::from_minutes)
            .ok_or_else(|| EnvError::SchedulerUnavailable("no job id".to_string()))
    }

    fn terminate(&self) {
        self.0.terminated.set(true);
    }
}

/// A small raster run writing into `dir`, overridden by `extra`.
pub fn params(dir: &Path, extra: Value) -> Parameters {
    let mut params = Parameters::from_value(json!({
        "dt": 1.0,
        "output_interval": 2.0,
        "run_duration": 10.0,
        "number_of_node_rows": 4,
        "number_of_node_columns": 5,
        "node_spacing": 1.0,
        "output_filename": dir.join("run").to_string_lossy(),
        "checkpoint_name": dir.join("saved_model.model").to_string_lossy(),
    }))
    .unwrap();
    if let Value::Object(map) = extra {
        for (key, value) in map {
            params.insert(&key, value);
        }
    }
    params
}
