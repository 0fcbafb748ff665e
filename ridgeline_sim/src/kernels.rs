//! Small numerical kernels for the reference models.
//!
//! These are simple: steepest-descent routing, implicit
//! detachment-limited stream power with `n = 1`, and explicit linear
//! hillslope diffusion on grid links. Only core nodes change elevation.

use nalgebra::DVector;
use ridgeline_core::{GridTopology, ModelGrid, NodeStatus};

/// Explicit diffusion substeps are kept below this fraction of `L^2 / D`.
const DIFFUSION_STABILITY: f64 = 0.2;

/// Surface area represented by one node.
pub fn cell_area(grid: &ModelGrid) -> f64 {
    match *grid.topology() {
        GridTopology::Raster { spacing, .. } => spacing * spacing,
        GridTopology::Hex { spacing, .. } => 3f64.sqrt() / 2.0 * spacing * spacing,
    }
}

/// Steepest-descent receiver and flow length of every core node.
///
/// Boundary nodes, closed nodes and pits have no receiver. Closed nodes never
/// receive flow.
pub fn flow_receivers(grid: &ModelGrid, z: &DVector<f64>) -> Vec<Option<(usize, f64)>> {
    let status = grid.status_at_node();
    grid.adjacency()
        .iter()
        .enumerate()
        .map(|(node, neighbors)| {
            if status[node] != NodeStatus::Core {
                return None;
            }
            let mut best: Option<(usize, f64, f64)> = None;
            for &(other, link) in neighbors {
                if status[other] == NodeStatus::Closed {
                    continue;
                }
                let length = grid.link_length(link);
                let slope = (z[node] - z[other]) / length;
                if slope > 0.0 && best.map_or(true, |(_, _, s)| slope > s) {
                    best = Some((other, length, slope));
                }
            }
            best.map(|(receiver, length, _)| (receiver, length))
        })
        .collect()
}

/// Node indices sorted from lowest to highest elevation.
fn by_elevation(z: &DVector<f64>) -> Vec<usize> {
    let mut order: Vec<usize> = (0..z.len()).collect();
    order.sort_by(|&a, &b| z[a].total_cmp(&z[b]));
    order
}

/// Upstream drainage area of every node.
pub fn drainage_area(grid: &ModelGrid, z: &DVector<f64>, receivers: &[Option<(usize, f64)>]) -> DVector<f64> {
    let unit = cell_area(grid);
    let status = grid.status_at_node();
    let mut area = DVector::from_fn(z.len(), |n, _| if status[n] == NodeStatus::Closed { 0.0 } else { unit });
    for node in by_elevation(z).into_iter().rev() {
        if let Some((receiver, _)) = receivers[node] {
            area[receiver] += area[node];
        }
    }
    area
}

/// Implicit stream-power incision `dz/dt = -k A^m S`.
///
/// Nodes are solved from the bottom up so each receiver already holds its
/// new elevation, which makes the scheme stable for any `dt`.
pub fn stream_power(
    z: &mut DVector<f64>,
    receivers: &[Option<(usize, f64)>],
    area: &DVector<f64>,
    k: f64,
    m: f64,
    dt: f64,
) {
    if k <= 0.0 || dt <= 0.0 {
        return;
    }
    for node in by_elevation(z) {
        if let Some((receiver, length)) = receivers[node] {
            let f = k * area[node].powf(m) * dt / length;
            z[node] = (z[node] + f * z[receiver]) / (1.0 + f);
        }
    }
}

/// Linear diffusion `dz/dt = d * laplacian(z)` with no flux into closed
/// nodes.
pub fn linear_diffusion(grid: &ModelGrid, z: &mut DVector<f64>, d: f64, dt: f64) {
    if d <= 0.0 || dt <= 0.0 {
        return;
    }
    let status = grid.status_at_node();
    let links: Vec<([usize; 2], f64)> = grid
        .nodes_at_link()
        .iter()
        .enumerate()
        .filter(|(_, [a, b])| status[*a] != NodeStatus::Closed && status[*b] != NodeStatus::Closed)
        .map(|(link, &nodes)| (nodes, grid.link_length(link)))
        .collect();
    let Some(shortest) = links.iter().map(|(_, l)| *l).reduce(f64::min) else {
        return;
    };

    let limit = DIFFUSION_STABILITY * shortest * shortest / d;
    let substeps = (dt / limit).ceil().max(1.0) as usize;
    let h = dt / substeps as f64;
    for _ in 0..substeps {
        let mut dz = DVector::<f64>::zeros(z.len());
        for &([a, b], length) in &links {
            let exchange = d * h * (z[b] - z[a]) / (length * length);
            dz[a] += exchange;
            dz[b] -= exchange;
        }
        for (n, s) in status.iter().enumerate() {
            if *s == NodeStatus::Core {
                z[n] += dz[n];
            }
        }
    }
}
