//! Boundary-condition handlers and their registry.
//!
//! Handlers are looked up by name from a fixed set and stored as a sum type,
//! so the registry serializes into a checkpoint like any other record.

use crate::baselevel::{CaptureNodeBaselevelHandler, ClosedNodeBaselevelHandler, SingleNodeBaselevelHandler};
use crate::error::{ModelError, ModelResult};
use crate::fault::NormalFault;
use crate::grid::ModelGrid;
use crate::params::Parameters;
use crate::precip_changer::PrecipChanger;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Key listing the handlers to register.
pub const BOUNDARY_HANDLERS_KEY: &str = "BoundaryHandlers";

/// Anything that mutates model state once per step.
pub trait BoundaryCondition {
    /// Advances the handler by `dt`.
    fn run_one_step(&mut self, grid: &mut ModelGrid, dt: f64) -> ModelResult<()>;
}

/// Names of the supported handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BoundaryHandlerKind {
    NormalFault,
    PrecipChanger,
    CaptureNodeBaselevelHandler,
    ClosedNodeBaselevelHandler,
    SingleNodeBaselevelHandler,
}

impl BoundaryHandlerKind {
    /// Returns every supported handler.
    pub fn all() -> Vec<BoundaryHandlerKind> {
        vec![
            BoundaryHandlerKind::NormalFault,
            BoundaryHandlerKind::PrecipChanger,
            BoundaryHandlerKind::CaptureNodeBaselevelHandler,
            BoundaryHandlerKind::ClosedNodeBaselevelHandler,
            BoundaryHandlerKind::SingleNodeBaselevelHandler,
        ]
    }

    /// Returns the handler name as it appears in parameter files.
    pub fn name(&self) -> &'static str {
        match self {
            BoundaryHandlerKind::NormalFault => "NormalFault",
            BoundaryHandlerKind::PrecipChanger => "PrecipChanger",
            BoundaryHandlerKind::CaptureNodeBaselevelHandler => "CaptureNodeBaselevelHandler",
            BoundaryHandlerKind::ClosedNodeBaselevelHandler => "ClosedNodeBaselevelHandler",
            BoundaryHandlerKind::SingleNodeBaselevelHandler => "SingleNodeBaselevelHandler",
        }
    }

    /// Comma-separated list of supported names, for error messages.
    pub fn supported_names() -> String {
        Self::all().iter().map(|k| k.name()).collect::<Vec<_>>().join(", ")
    }

    /// Builds a handler of this kind.
    pub fn build(&self, grid: &mut ModelGrid, params: &Parameters) -> ModelResult<BoundaryHandler> {
        Ok(match self {
            BoundaryHandlerKind::NormalFault => BoundaryHandler::NormalFault(NormalFault::from_params(grid, params)?),
            BoundaryHandlerKind::PrecipChanger => {
                BoundaryHandler::PrecipChanger(PrecipChanger::from_params(grid, params)?)
            }
            BoundaryHandlerKind::CaptureNodeBaselevelHandler => {
                BoundaryHandler::CaptureNode(CaptureNodeBaselevelHandler::from_params(grid, params)?)
            }
            BoundaryHandlerKind::ClosedNodeBaselevelHandler => {
                BoundaryHandler::ClosedNode(ClosedNodeBaselevelHandler::from_params(grid, params)?)
            }
            BoundaryHandlerKind::SingleNodeBaselevelHandler => {
                BoundaryHandler::SingleNode(SingleNodeBaselevelHandler::from_params(grid, params)?)
            }
        })
    }
}

impl std::fmt::Display for BoundaryHandlerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for BoundaryHandlerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .into_iter()
            .find(|k| k.name() == s)
            .ok_or_else(|| {
                format!(
                    "'{}' is not a supported boundary handler. Supported handlers: {}",
                    s,
                    Self::supported_names()
                )
            })
    }
}

/// One registered handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BoundaryHandler {
    NormalFault(NormalFault),
    PrecipChanger(PrecipChanger),
    CaptureNode(CaptureNodeBaselevelHandler),
    ClosedNode(ClosedNodeBaselevelHandler),
    SingleNode(SingleNodeBaselevelHandler),
}

impl BoundaryHandler {
    pub fn kind(&self) -> BoundaryHandlerKind {
        match self {
            BoundaryHandler::NormalFault(_) => BoundaryHandlerKind::NormalFault,
            BoundaryHandler::PrecipChanger(_) => BoundaryHandlerKind::PrecipChanger,
            BoundaryHandler::CaptureNode(_) => BoundaryHandlerKind::CaptureNodeBaselevelHandler,
            BoundaryHandler::ClosedNode(_) => BoundaryHandlerKind::ClosedNodeBaselevelHandler,
            BoundaryHandler::SingleNode(_) => BoundaryHandlerKind::SingleNodeBaselevelHandler,
        }
    }
}

impl BoundaryCondition for BoundaryHandler {
    fn run_one_step(&mut self, grid: &mut ModelGrid, dt: f64) -> ModelResult<()> {
        match self {
            BoundaryHandler::NormalFault(h) => h.run_one_step(grid, dt),
            BoundaryHandler::PrecipChanger(h) => h.run_one_step(grid, dt),
            BoundaryHandler::CaptureNode(h) => h.run_one_step(grid, dt),
            BoundaryHandler::ClosedNode(h) => h.run_one_step(grid, dt),
            BoundaryHandler::SingleNode(h) => h.run_one_step(grid, dt),
        }
    }
}

/// At most one handler per kind, advanced together every step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundaryHandlerRegistry {
    handlers: Vec<BoundaryHandler>,
}

impl BoundaryHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds every handler named under `BoundaryHandlers`.
    pub fn from_params(grid: &mut ModelGrid, params: &Parameters) -> ModelResult<Self> {
        let mut registry = Self::new();
        for name in params.get_str_list(BOUNDARY_HANDLERS_KEY)? {
            registry.register(&name, grid, params)?;
        }
        Ok(registry)
    }

    /// Builds and registers the handler called `name`.
    ///
    /// A table stored under `name` is the handler's parameter set; otherwise
    /// it sees the global parameters.
    pub fn register(&mut self, name: &str, grid: &mut ModelGrid, params: &Parameters) -> ModelResult<()> {
        let kind: BoundaryHandlerKind = name
            .parse()
            .map_err(|msg: String| ModelError::config(BOUNDARY_HANDLERS_KEY, msg))?;
        let handler = kind.build(grid, &params.handler_parameters(name))?;
        debug!("Registered boundary handler {}", kind);
        self.insert(handler);
        Ok(())
    }

    /// Adds a handler, replacing any handler of the same kind.
    pub fn insert(&mut self, handler: BoundaryHandler) {
        let kind = handler.kind();
        match self.handlers.binary_search_by_key(&kind, BoundaryHandler::kind) {
            Ok(i) => self.handlers[i] = handler,
            Err(i) => self.handlers.insert(i, handler),
        }
    }

    pub fn get(&self, kind: BoundaryHandlerKind) -> Option<&BoundaryHandler> {
        self.handlers.iter().find(|h| h.kind() == kind)
    }

    pub fn contains(&self, kind: BoundaryHandlerKind) -> bool {
        self.get(kind).is_some()
    }

    pub fn kinds(&self) -> Vec<BoundaryHandlerKind> {
        self.handlers.iter().map(BoundaryHandler::kind).collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// The registered precipitation changer, if any.
    pub fn precip_changer(&self) -> Option<&PrecipChanger> {
        match self.get(BoundaryHandlerKind::PrecipChanger) {
            Some(BoundaryHandler::PrecipChanger(h)) => Some(h),
            _ => None,
        }
    }

    /// Advances every handler by `dt`.
    pub fn run_one_step(&mut self, grid: &mut ModelGrid, dt: f64) -> ModelResult<()> {
        for handler in &mut self.handlers {
            handler.run_one_step(grid, dt)?;
        }
        Ok(())
    }
}
