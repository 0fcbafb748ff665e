//! JSON exporter for run summaries.
//!
//! Records one frame per engine output and writes the whole run as a single
//! JSON document at the end.

use ridgeline_core::{ModelResult, ModelState, OutputWriter, CUMULATIVE_CHANGE, ELEVATION};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fs::File;
use std::io::Write;
use std::rc::Rc;

/// Landscape statistics at one output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFrame {
    /// Model time
    pub time: f64,

    /// Output index
    pub iteration: u64,

    /// Mean and maximum core-node elevation
    pub mean_elevation: f64,
    pub max_elevation: f64,

    /// Mean core-node elevation change since the start
    pub mean_cumulative_change: f64,

    /// Climate of the last interval
    pub rainfall_rate: f64,
    pub runoff_rate: f64,
}

impl RunFrame {
    /// Summarizes the current core nodes.
    pub fn from_state(state: &ModelState) -> ModelResult<Self> {
        let core = state.grid.core_nodes();
        let z = state.grid.require_field(ELEVATION)?;
        let change = state.grid.require_field(CUMULATIVE_CHANGE)?;
        let count = core.len().max(1) as f64;
        Ok(Self {
            time: state.model_time(),
            iteration: state.clock.iteration,
            mean_elevation: core.iter().map(|&n| z[n]).sum::<f64>() / count,
            max_elevation: core.iter().map(|&n| z[n]).fold(f64::NEG_INFINITY, f64::max),
            mean_cumulative_change: core.iter().map(|&n| change[n]).sum::<f64>() / count,
            rainfall_rate: state.rainfall_rate,
            runoff_rate: state.runoff_rate,
        })
    }
}

/// Complete run export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunExport {
    /// Model name
    pub model: String,

    /// Seed used
    pub seed: u64,

    /// Model time of the last frame
    pub duration: f64,

    /// All frames
    pub frames: Vec<RunFrame>,

    /// True when the run reached `run_duration`
    pub completed: bool,
}

impl RunExport {
    /// Creates a new export container.
    pub fn new(model: &str, seed: u64) -> Self {
        Self {
            model: model.to_string(),
            seed,
            duration: 0.0,
            frames: Vec::new(),
            completed: false,
        }
    }

    /// Adds a frame.
    pub fn add_frame(&mut self, frame: RunFrame) {
        self.duration = frame.time;
        self.frames.push(frame);
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

/// Output writer appending a frame to a shared export at every output.
pub struct ExportWriter {
    export: Rc<RefCell<RunExport>>,
}

impl ExportWriter {
    pub fn new(export: Rc<RefCell<RunExport>>) -> Self {
        Self { export }
    }
}

impl OutputWriter for ExportWriter {
    fn run_one_step(&mut self, state: &ModelState) -> ModelResult<()> {
        let frame = RunFrame::from_state(state)?;
        self.export.borrow_mut().add_frame(frame);
        Ok(())
    }
}
