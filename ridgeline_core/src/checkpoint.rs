//! Checkpoint records: everything needed to resume a run mid-way.
//!
//! A checkpoint is one JSON document holding the clock, parameters, grid and
//! fields, boundary handlers, time-advance state (including the storm
//! sequencer's stream position), the topography stream and the physical
//! model. Interpolators serialize as their control points and random streams
//! as `(seed, word_pos)`, so loading rebuilds them exactly.

use crate::boundary::BoundaryHandlerRegistry;
use crate::engine::{SimulationClock, TimeAdvance};
use crate::error::{ModelError, ModelResult};
use crate::grid::ModelGrid;
use crate::params::Parameters;
use crate::rng::SeededRng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// Checkpoint format version
pub const CHECKPOINT_VERSION: u32 = 1;

/// Default checkpoint file name.
pub const DEFAULT_CHECKPOINT_NAME: &str = "saved_model.model";

/// Serialized engine and model state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointState<M> {
    pub version: u32,
    pub clock: SimulationClock,
    pub params: Parameters,
    pub grid: ModelGrid,
    pub boundary_handlers: BoundaryHandlerRegistry,
    pub time_advance: TimeAdvance,
    pub rng: SeededRng,
    pub rainfall_rate: f64,
    pub runoff_rate: f64,
    pub model: M,
}

impl<M: Serialize + DeserializeOwned> CheckpointState<M> {
    /// Writes the checkpoint, replacing any previous file atomically.
    pub fn save(&self, path: &Path) -> ModelResult<()> {
        let tmp = path.with_extension("tmp");
        let write = || -> ModelResult<()> {
            let mut out = BufWriter::new(File::create(&tmp)?);
            serde_json::to_writer(&mut out, self)?;
            out.flush()?;
            Ok(())
        };
        write().map_err(|e| checkpoint_error(path, e))?;
        std::fs::rename(&tmp, path).map_err(|e| checkpoint_error(path, e))?;
        Ok(())
    }

    /// Reads a checkpoint and checks its version.
    pub fn load(path: &Path) -> ModelResult<Self> {
        let file = File::open(path).map_err(|e| checkpoint_error(path, e))?;
        let state: Self =
            serde_json::from_reader(BufReader::new(file)).map_err(|e| checkpoint_error(path, e))?;
        if state.version != CHECKPOINT_VERSION {
            return Err(checkpoint_error(
                path,
                format!("version {} is not supported (expected {})", state.version, CHECKPOINT_VERSION),
            ));
        }
        Ok(state)
    }
}

/// Removes a checkpoint file. Returns whether one existed.
pub fn delete_checkpoint(path: &Path) -> ModelResult<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(checkpoint_error(path, e)),
    }
}

fn checkpoint_error(path: &Path, e: impl std::fmt::Display) -> ModelError {
    ModelError::Checkpoint {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}
