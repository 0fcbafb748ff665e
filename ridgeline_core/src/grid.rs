//! Node-indexed grids carrying named scalar fields.
//!
//! The engine never assumes a topology: it reads and writes fields by name
//! and asks the grid for its perimeter, core nodes and links. Two layouts are
//! provided, a rectangular raster and an offset-row hexagonal grid.

use crate::error::{ModelError, ModelResult};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Elevation field name.
pub const ELEVATION: &str = "topographic__elevation";

/// Copy of the elevation at the start of the run.
pub const INITIAL_ELEVATION: &str = "initial_topographic__elevation";

/// Elevation minus initial elevation, refreshed at every output.
pub const CUMULATIVE_CHANGE: &str = "cumulative_elevation_change";

/// Elevation value marking nodes without data.
pub const NODATA: f64 = -9999.0;

/// Boundary status of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Interior node, evolved by the model
    Core,
    /// Open boundary; elevation held by the model, changed only by handlers
    FixedValue,
    /// Closed boundary; no flow across it
    Closed,
}

/// Node layout of a grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GridTopology {
    Raster { rows: usize, columns: usize, spacing: f64 },
    Hex { rows: usize, columns: usize, spacing: f64 },
}

impl GridTopology {
    pub fn name(&self) -> &'static str {
        match self {
            GridTopology::Raster { .. } => "raster",
            GridTopology::Hex { .. } => "hex",
        }
    }
}

/// A grid of nodes, the links between them, and the fields defined on them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelGrid {
    topology: GridTopology,
    x_of_node: Vec<f64>,
    y_of_node: Vec<f64>,
    nodes_at_link: Vec<[usize; 2]>,
    perimeter: Vec<bool>,
    status_at_node: Vec<NodeStatus>,
    fields: BTreeMap<String, DVector<f64>>,
}

impl ModelGrid {
    /// Creates a raster grid of `rows` x `columns` nodes.
    ///
    /// Node `r * columns + c` sits at `(c * spacing, r * spacing)`. Perimeter
    /// nodes start as open (fixed-value) boundaries.
    pub fn raster(rows: usize, columns: usize, spacing: f64) -> ModelResult<Self> {
        check_shape(rows, columns, spacing)?;
        let mut x = Vec::with_capacity(rows * columns);
        let mut y = Vec::with_capacity(rows * columns);
        let mut perimeter = Vec::with_capacity(rows * columns);
        for r in 0..rows {
            for c in 0..columns {
                x.push(c as f64 * spacing);
                y.push(r as f64 * spacing);
                perimeter.push(r == 0 || r == rows - 1 || c == 0 || c == columns - 1);
            }
        }

        let mut links = Vec::new();
        for r in 0..rows {
            for c in 0..columns {
                let node = r * columns + c;
                if c + 1 < columns {
                    links.push([node, node + 1]);
                }
                if r + 1 < rows {
                    links.push([node, node + columns]);
                }
            }
        }

        Ok(Self::assemble(
            GridTopology::Raster { rows, columns, spacing },
            x,
            y,
            links,
            perimeter,
        ))
    }

    /// Creates a rectangular hexagonal grid with horizontal rows.
    ///
    /// Odd rows are shifted right by half a spacing; rows are
    /// `spacing * sqrt(3) / 2` apart so every link has length `spacing`.
    pub fn hex(rows: usize, columns: usize, spacing: f64) -> ModelResult<Self> {
        check_shape(rows, columns, spacing)?;
        let row_height = spacing * 3f64.sqrt() / 2.0;
        let mut x = Vec::with_capacity(rows * columns);
        let mut y = Vec::with_capacity(rows * columns);
        let mut perimeter = Vec::with_capacity(rows * columns);
        for r in 0..rows {
            let shift = if r % 2 == 1 { spacing / 2.0 } else { 0.0 };
            for c in 0..columns {
                x.push(c as f64 * spacing + shift);
                y.push(r as f64 * row_height);
                perimeter.push(r == 0 || r == rows - 1 || c == 0 || c == columns - 1);
            }
        }

        let mut links = Vec::new();
        for r in 0..rows {
            for c in 0..columns {
                let node = r * columns + c;
                if c + 1 < columns {
                    links.push([node, node + 1]);
                }
                if r + 1 < rows {
                    let above = (r + 1) * columns;
                    if r % 2 == 0 {
                        if c > 0 {
                            links.push([node, above + c - 1]);
                        }
                        links.push([node, above + c]);
                    } else {
                        links.push([node, above + c]);
                        if c + 1 < columns {
                            links.push([node, above + c + 1]);
                        }
                    }
                }
            }
        }

        Ok(Self::assemble(
            GridTopology::Hex { rows, columns, spacing },
            x,
            y,
            links,
            perimeter,
        ))
    }

    fn assemble(
        topology: GridTopology,
        x_of_node: Vec<f64>,
        y_of_node: Vec<f64>,
        nodes_at_link: Vec<[usize; 2]>,
        perimeter: Vec<bool>,
    ) -> Self {
        let status_at_node = perimeter
            .iter()
            .map(|&p| if p { NodeStatus::FixedValue } else { NodeStatus::Core })
            .collect();
        Self {
            topology,
            x_of_node,
            y_of_node,
            nodes_at_link,
            perimeter,
            status_at_node,
            fields: BTreeMap::new(),
        }
    }

    pub fn topology(&self) -> &GridTopology {
        &self.topology
    }

    pub fn number_of_nodes(&self) -> usize {
        self.x_of_node.len()
    }

    pub fn x_of_node(&self) -> &[f64] {
        &self.x_of_node
    }

    pub fn y_of_node(&self) -> &[f64] {
        &self.y_of_node
    }

    pub fn nodes_at_link(&self) -> &[[usize; 2]] {
        &self.nodes_at_link
    }

    /// Length of a link.
    pub fn link_length(&self, link: usize) -> f64 {
        let [a, b] = self.nodes_at_link[link];
        (self.x_of_node[b] - self.x_of_node[a]).hypot(self.y_of_node[b] - self.y_of_node[a])
    }

    /// Neighbors of every node as `(neighbor, link)` pairs.
    pub fn adjacency(&self) -> Vec<Vec<(usize, usize)>> {
        let mut adj = vec![Vec::new(); self.number_of_nodes()];
        for (link, &[a, b]) in self.nodes_at_link.iter().enumerate() {
            adj[a].push((b, link));
            adj[b].push((a, link));
        }
        adj
    }

    pub fn status_at_node(&self) -> &[NodeStatus] {
        &self.status_at_node
    }

    pub fn set_status(&mut self, node: usize, status: NodeStatus) {
        self.status_at_node[node] = status;
    }

    /// Nodes on the outer edge of the grid.
    pub fn perimeter_nodes(&self) -> Vec<usize> {
        (0..self.number_of_nodes()).filter(|&n| self.perimeter[n]).collect()
    }

    pub fn core_nodes(&self) -> Vec<usize> {
        self.nodes_with_status(NodeStatus::Core)
    }

    pub fn nodes_with_status(&self, status: NodeStatus) -> Vec<usize> {
        (0..self.number_of_nodes())
            .filter(|&n| self.status_at_node[n] == status)
            .collect()
    }

    /// Closes every perimeter node.
    pub fn close_perimeter(&mut self) {
        for n in 0..self.number_of_nodes() {
            if self.perimeter[n] {
                self.status_at_node[n] = NodeStatus::Closed;
            }
        }
    }

    /// Closes the selected edges of a raster grid.
    ///
    /// Edges that are not closed stay open. Corner nodes follow whichever
    /// adjoining edge is closed.
    pub fn set_closed_boundaries_at_grid_edges(
        &mut self,
        east: bool,
        north: bool,
        west: bool,
        south: bool,
    ) -> ModelResult<()> {
        let (rows, columns) = match self.topology {
            GridTopology::Raster { rows, columns, .. } => (rows, columns),
            GridTopology::Hex { .. } => {
                return Err(ModelError::config(
                    "east_boundary_closed",
                    "edge-by-edge closure is only defined for raster grids",
                ))
            }
        };
        for r in 0..rows {
            for c in 0..columns {
                let closed = (east && c == columns - 1)
                    || (north && r == rows - 1)
                    || (west && c == 0)
                    || (south && r == 0);
                if closed {
                    self.status_at_node[r * columns + c] = NodeStatus::Closed;
                }
            }
        }
        Ok(())
    }

    /// Watershed boundary: perimeter and no-data nodes closed, `outlet` open.
    pub fn set_watershed_boundary_condition_outlet_id(&mut self, outlet: usize) -> ModelResult<()> {
        if outlet >= self.number_of_nodes() {
            return Err(ModelError::config(
                "outlet_id",
                format!("node {} is outside a grid of {} nodes", outlet, self.number_of_nodes()),
            ));
        }
        self.close_perimeter();
        self.close_nodata_nodes();
        self.status_at_node[outlet] = NodeStatus::FixedValue;
        Ok(())
    }

    /// Watershed boundary with the outlet chosen automatically as the lowest
    /// perimeter node carrying data. Returns the outlet.
    pub fn set_watershed_boundary_condition(&mut self) -> ModelResult<usize> {
        let z = self.require_field(ELEVATION)?;
        let outlet = self
            .perimeter_nodes()
            .into_iter()
            .filter(|&n| z[n] != NODATA)
            .min_by(|&a, &b| z[a].total_cmp(&z[b]))
            .ok_or_else(|| ModelError::config("outlet_id", "no perimeter node carries data"))?;
        self.set_watershed_boundary_condition_outlet_id(outlet)?;
        Ok(outlet)
    }

    fn close_nodata_nodes(&mut self) {
        if let Some(z) = self.fields.get(ELEVATION) {
            for (n, &v) in z.iter().enumerate() {
                if v == NODATA {
                    self.status_at_node[n] = NodeStatus::Closed;
                }
            }
        }
    }

    /// Adds (or resets) a zero-filled field and returns it.
    pub fn add_zeros(&mut self, name: &str) -> &mut DVector<f64> {
        let n = self.number_of_nodes();
        let field = self
            .fields
            .entry(name.to_string())
            .or_insert_with(|| DVector::zeros(n));
        field.fill(0.0);
        field
    }

    /// Adds (or replaces) a field with the given values.
    pub fn add_field(&mut self, name: &str, values: DVector<f64>) -> ModelResult<()> {
        if values.len() != self.number_of_nodes() {
            return Err(ModelError::config(
                name,
                format!("field has {} values for {} nodes", values.len(), self.number_of_nodes()),
            ));
        }
        self.fields.insert(name.to_string(), values);
        Ok(())
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn field(&self, name: &str) -> Option<&DVector<f64>> {
        self.fields.get(name)
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut DVector<f64>> {
        self.fields.get_mut(name)
    }

    pub fn require_field(&self, name: &str) -> ModelResult<&DVector<f64>> {
        self.fields
            .get(name)
            .ok_or_else(|| ModelError::UnknownField(name.to_string()))
    }

    pub fn require_field_mut(&mut self, name: &str) -> ModelResult<&mut DVector<f64>> {
        self.fields
            .get_mut(name)
            .ok_or_else(|| ModelError::UnknownField(name.to_string()))
    }

    /// Field names in sorted order.
    pub fn field_names(&self) -> Vec<String> {
        self.fields.keys().cloned().collect()
    }

    /// Returns the name of the first field holding a NaN or infinity.
    pub fn first_non_finite_field(&self) -> Option<&str> {
        self.fields
            .iter()
            .find(|(_, values)| values.iter().any(|v| !v.is_finite()))
            .map(|(name, _)| name.as_str())
    }
}

fn check_shape(rows: usize, columns: usize, spacing: f64) -> ModelResult<()> {
    if rows < 2 || columns < 2 {
        return Err(ModelError::config(
            "number_of_node_rows",
            format!("a grid needs at least 2x2 nodes, got {}x{}", rows, columns),
        ));
    }
    if !(spacing.is_finite() && spacing > 0.0) {
        return Err(ModelError::config("node_spacing", format!("must be positive, got {}", spacing)));
    }
    Ok(())
}
