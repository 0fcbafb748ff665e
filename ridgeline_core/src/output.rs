//! Output: grid documents on disk and user-supplied output writers.
//!
//! Every output checkpoint serializes the grid fields to
//! `{output_filename}{iteration:04}.json`. Raster grids are written as a
//! compact raster document; topologies the raster format cannot describe make
//! [`write_raster`] fail with [`ModelError::Unsupported`], and the engine falls
//! back to a graph document carrying node coordinates and links.

use crate::engine::ModelState;
use crate::error::{ModelError, ModelResult};
use crate::grid::{GridTopology, ModelGrid, ELEVATION};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Raster grid fields at one output checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterDocument {
    pub iteration: u64,
    pub time: f64,
    pub rows: usize,
    pub columns: usize,
    pub spacing: f64,
    pub fields: BTreeMap<String, Vec<f64>>,
}

/// Topology-free grid fields at one output checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDocument {
    pub iteration: u64,
    pub time: f64,
    pub x_of_node: Vec<f64>,
    pub y_of_node: Vec<f64>,
    pub nodes_at_link: Vec<[usize; 2]>,
    pub fields: BTreeMap<String, Vec<f64>>,
}

impl GraphDocument {
    /// Starts a document from the grid geometry alone.
    pub fn from_geometry(grid: &ModelGrid, iteration: u64, time: f64) -> Self {
        Self {
            iteration,
            time,
            x_of_node: grid.x_of_node().to_vec(),
            y_of_node: grid.y_of_node().to_vec(),
            nodes_at_link: grid.nodes_at_link().to_vec(),
            fields: BTreeMap::new(),
        }
    }

    /// Adds one node field.
    pub fn set_field(&mut self, name: &str, values: &DVector<f64>) {
        self.fields.insert(name.to_string(), values.iter().copied().collect());
    }
}

/// A document as found on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum GridDocument {
    Raster(RasterDocument),
    Graph(GraphDocument),
}

impl GridDocument {
    pub fn read(path: impl AsRef<Path>) -> ModelResult<Self> {
        let file = File::open(path.as_ref())?;
        Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
    }

    pub fn fields(&self) -> &BTreeMap<String, Vec<f64>> {
        match self {
            GridDocument::Raster(doc) => &doc.fields,
            GridDocument::Graph(doc) => &doc.fields,
        }
    }

    pub fn iteration(&self) -> u64 {
        match self {
            GridDocument::Raster(doc) => doc.iteration,
            GridDocument::Graph(doc) => doc.iteration,
        }
    }
}

/// Path of the output file for `iteration`.
pub fn output_path(base: &str, iteration: u64) -> PathBuf {
    PathBuf::from(format!("{}{:04}.json", base, iteration))
}

/// Selected fields, or every field when `names` is `None`.
fn selected_fields<'a>(
    grid: &'a ModelGrid,
    names: Option<&[&str]>,
) -> ModelResult<Vec<(String, &'a DVector<f64>)>> {
    let names: Vec<String> = match names {
        Some(names) => names.iter().map(|s| s.to_string()).collect(),
        None => grid.field_names(),
    };
    names
        .into_iter()
        .map(|name| {
            let values = grid.require_field(&name)?;
            Ok((name, values))
        })
        .collect()
}

fn write_document(path: &Path, doc: &GridDocument) -> ModelResult<()> {
    let mut out = std::io::BufWriter::new(File::create(path)?);
    serde_json::to_writer(&mut out, doc)?;
    out.flush()?;
    Ok(())
}

/// Writes a raster document; fails with `Unsupported` for other topologies.
pub fn write_raster(
    grid: &ModelGrid,
    names: Option<&[&str]>,
    iteration: u64,
    time: f64,
    path: &Path,
) -> ModelResult<()> {
    let GridTopology::Raster { rows, columns, spacing } = *grid.topology() else {
        return Err(ModelError::Unsupported(grid.topology().name().to_string()));
    };
    let fields = selected_fields(grid, names)?
        .into_iter()
        .map(|(name, values)| (name, values.iter().copied().collect()))
        .collect();
    let doc = GridDocument::Raster(RasterDocument {
        iteration,
        time,
        rows,
        columns,
        spacing,
        fields,
    });
    write_document(path, &doc)
}

/// Writes a graph document, injecting each selected field by name.
pub fn write_graph(
    grid: &ModelGrid,
    names: Option<&[&str]>,
    iteration: u64,
    time: f64,
    path: &Path,
) -> ModelResult<()> {
    let mut doc = GraphDocument::from_geometry(grid, iteration, time);
    for (name, values) in selected_fields(grid, names)? {
        doc.set_field(&name, values);
    }
    write_document(path, &GridDocument::Graph(doc))
}

/// Writes grid fields, falling back to the graph form when the raster form
/// cannot represent the grid.
pub fn write_grid(
    grid: &ModelGrid,
    names: Option<&[&str]>,
    iteration: u64,
    time: f64,
    path: &Path,
) -> ModelResult<()> {
    match write_raster(grid, names, iteration, time, path) {
        Err(ModelError::Unsupported(topology)) => {
            debug!("Raster output does not support {} grids, writing graph", topology);
            write_graph(grid, names, iteration, time, path)
        }
        other => other,
    }
}

/// Reads a raster document back into a grid with all of its fields.
///
/// Used for `DEM_filename`; the document must carry an elevation field.
pub fn read_topography(path: impl AsRef<Path>) -> ModelResult<ModelGrid> {
    let path = path.as_ref();
    let doc = match GridDocument::read(path)? {
        GridDocument::Raster(doc) => doc,
        GridDocument::Graph(_) => {
            return Err(ModelError::config(
                "DEM_filename",
                format!("{} is a graph document; topography must be a raster", path.display()),
            ))
        }
    };
    if !doc.fields.contains_key(ELEVATION) {
        return Err(ModelError::config(
            "DEM_filename",
            format!("{} has no '{}' field", path.display(), ELEVATION),
        ));
    }
    let mut grid = ModelGrid::raster(doc.rows, doc.columns, doc.spacing)?;
    for (name, values) in doc.fields {
        grid.add_field(&name, DVector::from_vec(values))?;
    }
    Ok(grid)
}

/// A stateful writer fired at every output checkpoint.
pub trait OutputWriter {
    fn run_one_step(&mut self, state: &ModelState) -> ModelResult<()>;
}

/// A stateless writer fired at every output checkpoint.
pub type OutputFunction = Box<dyn FnMut(&ModelState) -> ModelResult<()>>;

/// Builds a stateful writer once the model state exists.
pub type OutputWriterFactory = Box<dyn FnOnce(&ModelState) -> ModelResult<Box<dyn OutputWriter>>>;

/// Object-style writers keyed by name, plus function-style writers.
#[derive(Default)]
pub struct OutputWriterRegistry {
    objects: BTreeMap<String, Box<dyn OutputWriter>>,
    functions: Vec<(String, OutputFunction)>,
}

impl OutputWriterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an object writer from the state and stores it under `name`.
    pub fn register_object(&mut self, name: &str, factory: OutputWriterFactory, state: &ModelState) -> ModelResult<()> {
        let writer = factory(state)?;
        self.objects.insert(name.to_string(), writer);
        Ok(())
    }

    pub fn register_function(&mut self, name: &str, function: OutputFunction) {
        self.functions.push((name.to_string(), function));
    }

    pub fn object_names(&self) -> Vec<&str> {
        self.objects.keys().map(String::as_str).collect()
    }

    pub fn function_names(&self) -> Vec<&str> {
        self.functions.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.objects.len() + self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fires every writer; the first failure is returned unchanged.
    pub fn fire(&mut self, state: &ModelState) -> ModelResult<()> {
        for writer in self.objects.values_mut() {
            writer.run_one_step(state)?;
        }
        for (_, function) in self.functions.iter_mut() {
            function(state)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for OutputWriterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputWriterRegistry")
            .field("objects", &self.object_names())
            .field("functions", &self.function_names())
            .finish()
    }
}
