//! Normal fault uplift of a hanging-wall block.

use crate::boundary::BoundaryCondition;
use crate::error::{ModelError, ModelResult};
use crate::grid::{ModelGrid, NodeStatus, ELEVATION};
use crate::interp::LinearInterpolator;
use crate::params::Parameters;
use serde::{Deserialize, Serialize};

/// Two points on the surface trace of the fault, in grid coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaultTrace {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl FaultTrace {
    /// True when `(x, y)` lies strictly left of the directed trace.
    pub fn is_hanging_wall(&self, x: f64, y: f64) -> bool {
        let cross = (self.x2 - self.x1) * (y - self.y1) - (self.y2 - self.y1) * (x - self.x1);
        cross > 0.0
    }
}

#[derive(Debug, Deserialize)]
struct ThrowHistory {
    time: Vec<f64>,
    rate: Vec<f64>,
}

/// Uplifts hanging-wall nodes at a time-varying throw rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalFault {
    trace: FaultTrace,
    throw_rate: LinearInterpolator,
    /// sin(dip), converting throw into vertical motion
    vertical_fraction: f64,
    hanging_wall: Vec<usize>,
    time: f64,
}

impl NormalFault {
    pub fn from_params(grid: &mut ModelGrid, params: &Parameters) -> ModelResult<Self> {
        let trace: FaultTrace = params
            .get_as("fault_trace")?
            .ok_or_else(|| ModelError::config("fault_trace", "required parameter was not provided"))?;
        if trace.x1 == trace.x2 && trace.y1 == trace.y2 {
            return Err(ModelError::config("fault_trace", "trace end points coincide"));
        }

        let lf = params.length_factor();
        let throw_rate = match params.get_as::<ThrowHistory>("fault_throw_rate_through_time")? {
            Some(h) => LinearInterpolator::new(h.time, h.rate.iter().map(|r| r * lf).collect())?,
            None => LinearInterpolator::new(vec![0.0], vec![0.001 * lf])?,
        };

        let dip = params.f64_or("fault_dip_angle", 90.0)?;
        if !(0.0..=90.0).contains(&dip) || dip == 0.0 {
            return Err(ModelError::config("fault_dip_angle", format!("must be in (0, 90], got {}", dip)));
        }

        let include_boundaries = params.get_bool("include_boundaries", false)?;
        let hanging_wall = (0..grid.number_of_nodes())
            .filter(|&n| include_boundaries || grid.status_at_node()[n] == NodeStatus::Core)
            .filter(|&n| trace.is_hanging_wall(grid.x_of_node()[n], grid.y_of_node()[n]))
            .collect();

        Ok(Self {
            trace,
            throw_rate,
            vertical_fraction: dip.to_radians().sin(),
            hanging_wall,
            time: 0.0,
        })
    }

    pub fn trace(&self) -> &FaultTrace {
        &self.trace
    }

    pub fn hanging_wall(&self) -> &[usize] {
        &self.hanging_wall
    }
}

impl BoundaryCondition for NormalFault {
    fn run_one_step(&mut self, grid: &mut ModelGrid, dt: f64) -> ModelResult<()> {
        let uplift = self.throw_rate.eval(self.time) * self.vertical_fraction * dt;
        let z = grid.require_field_mut(ELEVATION)?;
        for &n in &self.hanging_wall {
            z[n] += uplift;
        }
        self.time += dt;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use serde_json::json;

    fn fault(extra: serde_json::Value) -> (ModelGrid, NormalFault) {
        let mut grid = ModelGrid::raster(5, 5, 1.0).unwrap();
        grid.add_zeros(ELEVATION);
        let mut p = json!({
            "fault_trace": {"x1": 0.0, "y1": 2.5, "x2": 4.0, "y2": 2.5},
            "fault_throw_rate_through_time": {"time": [0.0, 10.0], "rate": [0.0, 1.0]}
        });
        if let (Some(base), Some(extra)) = (p.as_object_mut(), extra.as_object()) {
            base.extend(extra.clone());
        }
        let f = NormalFault::from_params(&mut grid, &Parameters::from_value(p).unwrap()).unwrap();
        (grid, f)
    }

    #[test]
    fn test_hanging_wall_is_left_of_trace() {
        let (grid, f) = fault(json!({}));
        // trace runs +x along y = 2.5; left is y > 2.5, core rows only
        for &n in f.hanging_wall() {
            assert!(grid.y_of_node()[n] > 2.5);
            assert_eq!(grid.status_at_node()[n], NodeStatus::Core);
        }
        assert_eq!(f.hanging_wall().len(), 3);
    }

    #[test]
    fn test_include_boundaries() {
        let (_, f) = fault(json!({"include_boundaries": true}));
        assert_eq!(f.hanging_wall().len(), 10);
    }

    #[test]
    fn test_uplift_follows_rate_history() {
        let (mut grid, mut f) = fault(json!({}));
        let n = f.hanging_wall()[0];
        f.run_one_step(&mut grid, 5.0).unwrap(); // rate(0) = 0
        assert_relative_eq!(grid.field(ELEVATION).unwrap()[n], 0.0);
        f.run_one_step(&mut grid, 5.0).unwrap(); // rate(5) = 0.5
        assert_relative_eq!(grid.field(ELEVATION).unwrap()[n], 2.5);
    }

    #[test]
    fn test_dip_scales_uplift() {
        let (mut grid, mut f) = fault(json!({
            "fault_dip_angle": 30.0,
            "fault_throw_rate_through_time": {"time": [0.0], "rate": [2.0]}
        }));
        let n = f.hanging_wall()[0];
        f.run_one_step(&mut grid, 1.0).unwrap();
        assert_relative_eq!(grid.field(ELEVATION).unwrap()[n], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_requires_trace() {
        let mut grid = ModelGrid::raster(3, 3, 1.0).unwrap();
        assert!(NormalFault::from_params(&mut grid, &Parameters::new()).is_err());
    }
}
