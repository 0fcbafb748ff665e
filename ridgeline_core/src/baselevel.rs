//! Baselevel handlers: forcing that lowers (or raises) boundary nodes.

use crate::boundary::BoundaryCondition;
use crate::error::{ModelError, ModelResult};
use crate::grid::{ModelGrid, NodeStatus, ELEVATION};
use crate::interp::LinearInterpolator;
use crate::params::Parameters;
use serde::{Deserialize, Serialize};

/// How much a baselevel moves over a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoweringSchedule {
    /// Constant rate [L/T]; negative lowers the baselevel
    Rate { rate: f64 },
    /// Elevation through time, read from a two-column file
    Curve { curve: LinearInterpolator },
}

impl LoweringSchedule {
    /// Reads a schedule from `rate_key` or `file_key`; exactly one must be set.
    pub fn from_params(params: &Parameters, rate_key: &str, file_key: &str) -> ModelResult<Self> {
        let lf = params.length_factor();
        match (params.get_f64(rate_key)?, params.get_str(file_key)?) {
            (Some(_), Some(_)) => Err(ModelError::config(
                rate_key,
                format!("both '{}' and '{}' were supplied", rate_key, file_key),
            )),
            (Some(rate), None) => Ok(Self::Rate { rate: rate * lf }),
            (None, Some(path)) => {
                let raw = LinearInterpolator::from_file(path)?;
                let curve = LinearInterpolator::new(
                    raw.x().to_vec(),
                    raw.y().iter().map(|y| y * lf).collect(),
                )?;
                Ok(Self::Curve { curve })
            }
            (None, None) => Err(ModelError::config(
                rate_key,
                format!("one of '{}' or '{}' is required", rate_key, file_key),
            )),
        }
    }

    /// Elevation change over `[t, t + dt]`.
    pub fn change(&self, t: f64, dt: f64) -> f64 {
        match self {
            Self::Rate { rate } => rate * dt,
            Self::Curve { curve } => curve.eval(t + dt) - curve.eval(t),
        }
    }
}

/// Applies `change` to `targets`, or the opposite change to core nodes.
///
/// Raising every core node is equivalent to lowering the baselevel when only
/// relative relief matters, and keeps the outlet at its original elevation.
fn apply_change(grid: &mut ModelGrid, targets: &[usize], change: f64, modify_core_nodes: bool) -> ModelResult<()> {
    let core = if modify_core_nodes { grid.core_nodes() } else { Vec::new() };
    let z = grid.require_field_mut(ELEVATION)?;
    if modify_core_nodes {
        for n in core {
            z[n] -= change;
        }
    } else {
        for &n in targets {
            z[n] += change;
        }
    }
    Ok(())
}

fn node_param(params: &Parameters, key: &str, grid: &ModelGrid) -> ModelResult<usize> {
    let node = params
        .get_whole_number(key)?
        .ok_or_else(|| ModelError::config(key, "required parameter was not provided"))? as usize;
    if node >= grid.number_of_nodes() {
        return Err(ModelError::config(
            key,
            format!("node {} is outside a grid of {} nodes", node, grid.number_of_nodes()),
        ));
    }
    Ok(node)
}

/// Moves a single outlet node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingleNodeBaselevelHandler {
    outlet_node: usize,
    schedule: LoweringSchedule,
    modify_core_nodes: bool,
    time: f64,
}

impl SingleNodeBaselevelHandler {
    pub fn from_params(grid: &mut ModelGrid, params: &Parameters) -> ModelResult<Self> {
        let outlet_node = node_param(params, "outlet_id", grid)?;
        let schedule = LoweringSchedule::from_params(params, "outlet_lowering_rate", "outlet_lowering_file_path")?;
        if grid.status_at_node()[outlet_node] == NodeStatus::Core {
            grid.set_status(outlet_node, NodeStatus::FixedValue);
        }
        Ok(Self {
            outlet_node,
            schedule,
            modify_core_nodes: params.get_bool("modify_core_nodes", false)?,
            time: 0.0,
        })
    }

    pub fn outlet_node(&self) -> usize {
        self.outlet_node
    }
}

impl BoundaryCondition for SingleNodeBaselevelHandler {
    fn run_one_step(&mut self, grid: &mut ModelGrid, dt: f64) -> ModelResult<()> {
        let change = self.schedule.change(self.time, dt);
        apply_change(grid, &[self.outlet_node], change, self.modify_core_nodes)?;
        self.time += dt;
        Ok(())
    }
}

/// Moves every non-core node together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedNodeBaselevelHandler {
    nodes: Vec<usize>,
    schedule: LoweringSchedule,
    modify_core_nodes: bool,
    time: f64,
}

impl ClosedNodeBaselevelHandler {
    pub fn from_params(grid: &mut ModelGrid, params: &Parameters) -> ModelResult<Self> {
        let nodes = grid
            .status_at_node()
            .iter()
            .enumerate()
            .filter(|(_, s)| **s != NodeStatus::Core)
            .map(|(n, _)| n)
            .collect();
        Ok(Self {
            nodes,
            schedule: LoweringSchedule::from_params(params, "lowering_rate", "lowering_file_path")?,
            modify_core_nodes: params.get_bool("modify_core_nodes", false)?,
            time: 0.0,
        })
    }
}

impl BoundaryCondition for ClosedNodeBaselevelHandler {
    fn run_one_step(&mut self, grid: &mut ModelGrid, dt: f64) -> ModelResult<()> {
        let change = self.schedule.change(self.time, dt);
        apply_change(grid, &self.nodes, change, self.modify_core_nodes)?;
        self.time += dt;
        Ok(())
    }
}

/// Incises a capture node during a capture window, then at a slower rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureNodeBaselevelHandler {
    capture_node: usize,
    capture_incision_rate: f64,
    capture_start_time: f64,
    capture_stop_time: Option<f64>,
    post_stabilization_incision_rate: f64,
    time: f64,
}

impl CaptureNodeBaselevelHandler {
    pub fn from_params(grid: &mut ModelGrid, params: &Parameters) -> ModelResult<Self> {
        let lf = params.length_factor();
        let capture_node = node_param(params, "capture_node", grid)?;
        let start = params.f64_or("capture_start_time", 0.0)?;
        let stop = params.get_f64("capture_stop_time")?;
        if let Some(stop) = stop {
            if stop < start {
                return Err(ModelError::config(
                    "capture_stop_time",
                    format!("stop time {} precedes start time {}", stop, start),
                ));
            }
        }
        grid.set_status(capture_node, NodeStatus::FixedValue);
        Ok(Self {
            capture_node,
            capture_incision_rate: params.require_f64("capture_incision_rate")? * lf,
            capture_start_time: start,
            capture_stop_time: stop,
            post_stabilization_incision_rate: params.f64_or("post_stabilization_incision_rate", 0.0)? * lf,
            time: 0.0,
        })
    }

    /// Incision rate in effect at handler time `t`.
    pub fn rate_at(&self, t: f64) -> f64 {
        if t < self.capture_start_time {
            0.0
        } else if self.capture_stop_time.map_or(true, |stop| t < stop) {
            self.capture_incision_rate
        } else {
            self.post_stabilization_incision_rate
        }
    }
}

impl BoundaryCondition for CaptureNodeBaselevelHandler {
    fn run_one_step(&mut self, grid: &mut ModelGrid, dt: f64) -> ModelResult<()> {
        let rate = self.rate_at(self.time);
        grid.require_field_mut(ELEVATION)?[self.capture_node] += rate * dt;
        self.time += dt;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use serde_json::json;

    fn grid() -> ModelGrid {
        let mut g = ModelGrid::raster(3, 4, 10.0).unwrap();
        g.add_zeros(ELEVATION).fill(1.0);
        g
    }

    fn params(v: serde_json::Value) -> Parameters {
        Parameters::from_value(v).unwrap()
    }

    #[test]
    fn test_single_node_rate() {
        let mut g = grid();
        let mut h = SingleNodeBaselevelHandler::from_params(
            &mut g,
            &params(json!({"outlet_id": 1, "outlet_lowering_rate": -0.5})),
        )
        .unwrap();
        h.run_one_step(&mut g, 2.0).unwrap();
        let z = g.field(ELEVATION).unwrap();
        assert_relative_eq!(z[1], 0.0);
        assert_relative_eq!(z[5], 1.0);
    }

    #[test]
    fn test_single_node_modify_core_nodes() {
        let mut g = grid();
        let mut h = SingleNodeBaselevelHandler::from_params(
            &mut g,
            &params(json!({"outlet_id": 1, "outlet_lowering_rate": -0.5, "modify_core_nodes": true})),
        )
        .unwrap();
        h.run_one_step(&mut g, 2.0).unwrap();
        let z = g.field(ELEVATION).unwrap();
        assert_relative_eq!(z[1], 1.0);
        assert_relative_eq!(z[5], 2.0);
        assert_relative_eq!(z[6], 2.0);
    }

    #[test]
    fn test_single_node_requires_one_schedule() {
        let mut g = grid();
        assert!(SingleNodeBaselevelHandler::from_params(&mut g, &params(json!({"outlet_id": 1}))).is_err());
        let both = json!({"outlet_id": 1, "outlet_lowering_rate": -1.0, "outlet_lowering_file_path": "x"});
        assert!(SingleNodeBaselevelHandler::from_params(&mut g, &params(both)).is_err());
        let outside = json!({"outlet_id": 99, "outlet_lowering_rate": -1.0});
        assert!(SingleNodeBaselevelHandler::from_params(&mut g, &params(outside)).is_err());
    }

    #[test]
    fn test_curve_schedule_follows_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outlet.txt");
        std::fs::write(&path, "0 0\n10 -2\n20 -2\n").unwrap();
        let mut g = grid();
        let p = params(json!({"outlet_id": 1, "outlet_lowering_file_path": path.to_str().unwrap()}));
        let mut h = SingleNodeBaselevelHandler::from_params(&mut g, &p).unwrap();
        for _ in 0..3 {
            h.run_one_step(&mut g, 5.0).unwrap();
        }
        assert_relative_eq!(g.field(ELEVATION).unwrap()[1], -1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_closed_node_handler_moves_all_boundary_nodes() {
        let mut g = grid();
        let mut h = ClosedNodeBaselevelHandler::from_params(&mut g, &params(json!({"lowering_rate": -0.1}))).unwrap();
        h.run_one_step(&mut g, 10.0).unwrap();
        let z = g.field(ELEVATION).unwrap();
        for n in g.perimeter_nodes() {
            assert_relative_eq!(z[n], 0.0, epsilon = 1e-12);
        }
        for n in g.core_nodes() {
            assert_relative_eq!(z[n], 1.0);
        }
    }

    #[test]
    fn test_capture_window() {
        let mut g = grid();
        let p = params(json!({
            "capture_node": 4,
            "capture_incision_rate": -1.0,
            "capture_start_time": 2.0,
            "capture_stop_time": 4.0,
            "post_stabilization_incision_rate": -0.25
        }));
        let mut h = CaptureNodeBaselevelHandler::from_params(&mut g, &p).unwrap();
        assert_eq!(g.status_at_node()[4], NodeStatus::FixedValue);
        for _ in 0..6 {
            h.run_one_step(&mut g, 1.0).unwrap();
        }
        // steps at t=0,1: none; t=2,3: -1 each; t=4,5: -0.25 each
        assert_relative_eq!(g.field(ELEVATION).unwrap()[4], 1.0 - 2.0 - 0.5);
    }

    #[test]
    fn test_capture_rejects_inverted_window() {
        let mut g = grid();
        let p = params(json!({
            "capture_node": 4,
            "capture_incision_rate": -1.0,
            "capture_start_time": 5.0,
            "capture_stop_time": 1.0
        }));
        assert!(CaptureNodeBaselevelHandler::from_params(&mut g, &p).is_err());
    }
}
