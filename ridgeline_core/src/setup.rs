//! Initial grid and topography from parameters.

use crate::error::{ModelError, ModelResult};
use crate::grid::{GridTopology, ModelGrid, CUMULATIVE_CHANGE, ELEVATION, INITIAL_ELEVATION};
use crate::output::read_topography;
use crate::params::Parameters;
use crate::rng::SeededRng;
use rand_distr::StandardNormal;
use tracing::{debug, warn};

/// How the boundary status was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundarySetup {
    /// Watershed around a configured or detected outlet
    Watershed { outlet: usize },
    /// Edge flags (raster) or `boundary_closed` (hex)
    ClosedEdges,
    /// Open perimeter
    Open,
}

/// Builds the grid, its elevation and boundary status.
///
/// Boundary precedence is `outlet_id`, then closed-edge flags, then an open
/// perimeter. A DEM without `outlet_id` picks its own outlet.
pub fn build_grid(params: &Parameters, rng: &mut SeededRng) -> ModelResult<(ModelGrid, BoundarySetup)> {
    if params.contains("DEM_filename") && params.contains("number_of_node_rows") {
        return Err(ModelError::config(
            "DEM_filename",
            "both a DEM filename and number_of_node_rows were specified",
        ));
    }
    let outlet_id = params.get_whole_number("outlet_id")?.map(|n| n as usize);

    let (mut grid, setup) = match params.get_str("DEM_filename")? {
        Some(path) => {
            let mut grid = read_topography(path)?;
            let outlet = match outlet_id {
                Some(outlet) => {
                    grid.set_watershed_boundary_condition_outlet_id(outlet)?;
                    outlet
                }
                None => grid.set_watershed_boundary_condition()?,
            };
            (grid, BoundarySetup::Watershed { outlet })
        }
        None => {
            let mut grid = synthetic_grid(params)?;
            let setup = synthetic_boundaries(&mut grid, params, outlet_id)?;
            synthetic_topography(&mut grid, params, rng)?;
            (grid, setup)
        }
    };

    let z = grid.require_field(ELEVATION)?.clone();
    grid.add_field(INITIAL_ELEVATION, z)?;
    grid.add_zeros(CUMULATIVE_CHANGE);
    debug!("Grid ready: {} {} nodes, boundary {:?}", grid.number_of_nodes(), grid.topology().name(), setup);
    Ok((grid, setup))
}

fn synthetic_grid(params: &Parameters) -> ModelResult<ModelGrid> {
    let shape = (
        params.get_whole_number("number_of_node_rows")?,
        params.get_whole_number("number_of_node_columns")?,
        params.get_f64("node_spacing")?,
    );
    match params.get_str("model_grid")?.unwrap_or("RasterModelGrid") {
        "RasterModelGrid" => {
            let (rows, columns, spacing) = match shape {
                (Some(r), Some(c), Some(dx)) => (r as usize, c as usize, dx),
                _ => {
                    warn!("No DEM or grid shape specified, creating a 4x5 raster grid");
                    (4, 5, 1.0)
                }
            };
            ModelGrid::raster(rows, columns, spacing)
        }
        "HexModelGrid" => {
            let (rows, columns, spacing) = match shape {
                (Some(r), Some(c), Some(dx)) => (r as usize, c as usize, dx),
                _ => (8, 5, 10.0),
            };
            ModelGrid::hex(rows, columns, spacing)
        }
        other => Err(ModelError::config(
            "model_grid",
            format!("'{}' is not supported; use RasterModelGrid or HexModelGrid", other),
        )),
    }
}

fn synthetic_boundaries(
    grid: &mut ModelGrid,
    params: &Parameters,
    outlet_id: Option<usize>,
) -> ModelResult<BoundarySetup> {
    if let Some(outlet) = outlet_id {
        grid.set_watershed_boundary_condition_outlet_id(outlet)?;
        return Ok(BoundarySetup::Watershed { outlet });
    }
    match grid.topology() {
        GridTopology::Raster { .. } => {
            let east = params.get_bool("east_boundary_closed", false)?;
            let north = params.get_bool("north_boundary_closed", false)?;
            let west = params.get_bool("west_boundary_closed", false)?;
            let south = params.get_bool("south_boundary_closed", false)?;
            if east || north || west || south {
                grid.set_closed_boundaries_at_grid_edges(east, north, west, south)?;
                return Ok(BoundarySetup::ClosedEdges);
            }
        }
        GridTopology::Hex { .. } => {
            if params.get_bool("boundary_closed", false)? {
                grid.close_perimeter();
                return Ok(BoundarySetup::ClosedEdges);
            }
        }
    }
    Ok(BoundarySetup::Open)
}

/// Core nodes start at `initial_elevation`, plus Gaussian noise with standard
/// deviation `initial_noise_std` when `add_random_noise` is set.
fn synthetic_topography(grid: &mut ModelGrid, params: &Parameters, rng: &mut SeededRng) -> ModelResult<()> {
    let add_noise = params.get_bool("add_random_noise", true)?;
    let initial = params.f64_or("initial_elevation", 0.0)?;
    let sigma = params.f64_or("initial_noise_std", 0.0)?;
    if sigma < 0.0 {
        return Err(ModelError::config("initial_noise_std", "must not be negative"));
    }
    let core = grid.core_nodes();
    let z = grid.add_zeros(ELEVATION);
    for n in core {
        let noise: f64 = if add_noise { rng.sample(&StandardNormal) } else { 0.0 };
        z[n] = initial + sigma * noise;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::NodeStatus;
    use crate::output::write_raster;
    use serde_json::json;

    fn build(v: serde_json::Value) -> ModelResult<(ModelGrid, BoundarySetup)> {
        let params = Parameters::from_value(v).unwrap();
        let mut rng = SeededRng::new(params.get_whole_number("random_seed").unwrap().unwrap_or(0));
        build_grid(&params, &mut rng)
    }

    #[test]
    fn test_default_raster() {
        let (grid, setup) = build(json!({})).unwrap();
        assert_eq!(grid.number_of_nodes(), 20);
        assert_eq!(setup, BoundarySetup::Open);
        assert!(grid.has_field(INITIAL_ELEVATION));
        assert!(grid.has_field(CUMULATIVE_CHANGE));
    }

    #[test]
    fn test_outlet_id_beats_edge_flags() {
        let (grid, setup) = build(json!({
            "number_of_node_rows": 4, "number_of_node_columns": 5, "node_spacing": 1.0,
            "outlet_id": 2,
            "east_boundary_closed": true
        }))
        .unwrap();
        assert_eq!(setup, BoundarySetup::Watershed { outlet: 2 });
        assert_eq!(grid.nodes_with_status(NodeStatus::FixedValue), vec![2]);
        assert_eq!(grid.status_at_node()[0], NodeStatus::Closed);
    }

    #[test]
    fn test_edge_flags_beat_default() {
        let (grid, setup) = build(json!({
            "number_of_node_rows": 4, "number_of_node_columns": 5, "node_spacing": 1.0,
            "north_boundary_closed": true
        }))
        .unwrap();
        assert_eq!(setup, BoundarySetup::ClosedEdges);
        assert_eq!(grid.status_at_node()[17], NodeStatus::Closed);
        assert_eq!(grid.status_at_node()[2], NodeStatus::FixedValue);
    }

    #[test]
    fn test_hex_boundary_closed() {
        let (grid, setup) = build(json!({"model_grid": "HexModelGrid", "boundary_closed": true})).unwrap();
        assert_eq!(grid.topology().name(), "hex");
        assert_eq!(setup, BoundarySetup::ClosedEdges);
        assert!(grid.nodes_with_status(NodeStatus::FixedValue).is_empty());
    }

    #[test]
    fn test_noise_is_seeded() {
        let p = json!({
            "number_of_node_rows": 5, "number_of_node_columns": 5, "node_spacing": 1.0,
            "initial_elevation": 10.0, "initial_noise_std": 0.5, "random_seed": 42
        });
        let (a, _) = build(p.clone()).unwrap();
        let (b, _) = build(p).unwrap();
        assert_eq!(a.field(ELEVATION), b.field(ELEVATION));
        let z = a.field(ELEVATION).unwrap();
        assert_eq!(z[0], 0.0);
        assert_ne!(z[6], 10.0);
    }

    #[test]
    fn test_dem_with_automatic_outlet() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dem.json");
        let mut dem = ModelGrid::raster(3, 3, 1.0).unwrap();
        let z = dem.add_zeros(ELEVATION);
        z.fill(5.0);
        z[7] = 1.0;
        write_raster(&dem, None, 0, 0.0, &path).unwrap();

        let (grid, setup) = build(json!({"DEM_filename": path.to_str().unwrap()})).unwrap();
        assert_eq!(setup, BoundarySetup::Watershed { outlet: 7 });
        assert_eq!(grid.field(INITIAL_ELEVATION), grid.field(ELEVATION));
    }

    #[test]
    fn test_dem_and_shape_conflict() {
        let err = build(json!({"DEM_filename": "dem.json", "number_of_node_rows": 3})).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_unknown_grid_type() {
        assert!(build(json!({"model_grid": "VoronoiDelaunayGrid"})).unwrap_err().is_configuration());
    }
}
