//! Reference landscape models.
//!
//! - [`Basic`]: stream power and linear diffusion under a constant climate.
//!   A registered `PrecipChanger` scales erodibility through time.
//! - [`BasicSt`]: the same processes driven by stochastic rainfall, with
//!   erosion proportional to runoff.

use crate::kernels::{drainage_area, flow_receivers, linear_diffusion, stream_power};
use ridgeline_core::{ModelError, ModelResult, ModelState, Parameters, PhysicalModel, ELEVATION};
use serde::{Deserialize, Serialize};

/// Field holding the drainage area of the last step.
pub const DRAINAGE_AREA: &str = "drainage_area";

/// Reference model identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelId {
    /// Stream power + linear diffusion, constant climate
    Basic,

    /// Stream power + linear diffusion, stochastic rainfall
    BasicSt,
}

impl ModelId {
    /// Returns a list of all models.
    pub fn all() -> Vec<ModelId> {
        vec![ModelId::Basic, ModelId::BasicSt]
    }

    /// Returns the model name.
    pub fn name(&self) -> &'static str {
        match self {
            ModelId::Basic => "basic",
            ModelId::BasicSt => "basic_st",
        }
    }

    /// Returns a description of the model.
    pub fn description(&self) -> &'static str {
        match self {
            ModelId::Basic => "Detachment-limited stream power with linear hillslope diffusion",
            ModelId::BasicSt => "Basic with stochastic storms and runoff-driven erosion",
        }
    }

    /// Returns true if this model runs on the stochastic engine.
    pub fn is_stochastic(&self) -> bool {
        matches!(self, ModelId::BasicSt)
    }
}

impl std::fmt::Display for ModelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ModelId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "basic" => Ok(ModelId::Basic),
            "basic_st" | "basicst" => Ok(ModelId::BasicSt),
            _ => Err(format!(
                "Unknown model: {} (available: {})",
                s,
                ModelId::all().iter().map(ModelId::name).collect::<Vec<_>>().join(", ")
            )),
        }
    }
}

/// Process rates shared by the reference models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErosionParameters {
    /// Stream-power coefficient K
    pub water_erodibility: f64,
    /// Drainage-area exponent
    pub m_sp: f64,
    /// Hillslope diffusivity D
    pub regolith_transport_parameter: f64,
}

impl ErosionParameters {
    /// Reads `water_erodibility` (or `water_erodibility_exp`), `m_sp`,
    /// `n_sp` and `regolith_transport_parameter`, converted by the length
    /// factor.
    pub fn from_params(params: &Parameters) -> ModelResult<Self> {
        let lf = params.length_factor();
        let m_sp = params.f64_or("m_sp", 0.5)?;
        let n_sp = params.f64_or("n_sp", 1.0)?;
        if n_sp != 1.0 {
            return Err(ModelError::config("n_sp", "only n_sp = 1 is supported"));
        }
        let k = params
            .get_parameter_from_exponent("water_erodibility", true)?
            .ok_or_else(|| ModelError::config("water_erodibility", "is required"))?;
        let d = params.f64_or("regolith_transport_parameter", 0.0)?;
        if k < 0.0 || d < 0.0 {
            return Err(ModelError::config("water_erodibility", "rates must not be negative"));
        }
        Ok(Self {
            water_erodibility: k * lf.powf(1.0 - 2.0 * m_sp),
            m_sp,
            regolith_transport_parameter: d * lf * lf,
        })
    }

    /// Routes flow, erodes at `k` and diffuses for one step.
    fn erode_and_diffuse(&self, state: &mut ModelState, k: f64, dt: f64) -> ModelResult<()> {
        let mut z = state.grid.require_field(ELEVATION)?.clone();
        let receivers = flow_receivers(&state.grid, &z);
        let area = drainage_area(&state.grid, &z, &receivers);
        stream_power(&mut z, &receivers, &area, k, self.m_sp, dt);
        linear_diffusion(&state.grid, &mut z, self.regolith_transport_parameter, dt);
        state.grid.add_field(ELEVATION, z)?;
        state.grid.add_field(DRAINAGE_AREA, area)
    }
}

/// Stream power and diffusion under a constant climate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Basic {
    pub rates: ErosionParameters,
}

impl Basic {
    pub fn from_state(state: &mut ModelState) -> ModelResult<Self> {
        Ok(Self {
            rates: ErosionParameters::from_params(&state.params)?,
        })
    }
}

impl PhysicalModel for Basic {
    fn run_one_step(&mut self, state: &mut ModelState, dt: f64) -> ModelResult<()> {
        let k = self.rates.water_erodibility * state.erodibility_adjustment_factor();
        self.rates.erode_and_diffuse(state, k, dt)
    }
}

/// Stream power and diffusion under stochastic rainfall.
///
/// Erosion scales with discharge `r A`, so the effective coefficient is
/// `K r^m` for the current runoff rate `r`; dry intervals only diffuse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicSt {
    pub rates: ErosionParameters,
}

impl BasicSt {
    pub fn from_state(state: &mut ModelState) -> ModelResult<Self> {
        Ok(Self {
            rates: ErosionParameters::from_params(&state.params)?,
        })
    }
}

impl PhysicalModel for BasicSt {
    fn run_one_step(&mut self, state: &mut ModelState, dt: f64) -> ModelResult<()> {
        let k = self.rates.water_erodibility * state.runoff_rate.max(0.0).powf(self.rates.m_sp);
        self.rates.erode_and_diffuse(state, k, dt)
    }
}
