//! Linear drift of the daily rainfall statistics through time.

use crate::boundary::BoundaryCondition;
use crate::error::{ModelError, ModelResult};
use crate::grid::ModelGrid;
use crate::params::Parameters;
use crate::storm::{gamma_function, runoff_rate};
use serde::{Deserialize, Serialize};

/// Probability-space quadrature points for the erosivity expectation.
const QUADRATURE_POINTS: usize = 1000;

/// Changes intermittency factor and mean intensity at constant rates inside a
/// time window.
///
/// The handler does not touch the grid. Models with a stochastic climate read
/// [`PrecipChanger::get_current_precip_params`] before each step, and models
/// with a constant climate scale their erodibility by
/// [`PrecipChanger::get_erodibility_adjustment_factor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrecipChanger {
    starting_intermittency: f64,
    intermittency_rate: f64,
    starting_intensity: f64,
    intensity_rate: f64,
    start_time: f64,
    stop_time: Option<f64>,
    shape_factor: f64,
    infiltration_capacity: f64,
    m_sp: f64,
    /// E[R^m] under the starting statistics
    reference_erosivity: f64,
    time: f64,
}

impl PrecipChanger {
    pub fn from_params(_grid: &mut ModelGrid, params: &Parameters) -> ModelResult<Self> {
        let lf = params.length_factor();
        let starting_intermittency = params.require_f64("daily_rainfall__intermittency_factor")?;
        if !(0.0..=1.0).contains(&starting_intermittency) {
            return Err(ModelError::config(
                "daily_rainfall__intermittency_factor",
                format!("must lie in [0, 1], got {}", starting_intermittency),
            ));
        }
        let start_time = params.f64_or("precipchanger_start_time", 0.0)?;
        let stop_time = params.get_f64("precipchanger_stop_time")?;
        if stop_time.map_or(false, |stop| stop < start_time) {
            return Err(ModelError::config(
                "precipchanger_stop_time",
                "stop time precedes start time",
            ));
        }

        let mut changer = Self {
            starting_intermittency,
            intermittency_rate: params.f64_or("daily_rainfall__intermittency_factor_time_rate_of_change", 0.0)?,
            starting_intensity: params.require_positive_f64("daily_rainfall__mean_intensity")? * lf,
            intensity_rate: params.f64_or("daily_rainfall__mean_intensity_time_rate_of_change", 0.0)? * lf,
            start_time,
            stop_time,
            shape_factor: params.f64_or("daily_rainfall__precipitation_shape_factor", 0.65)?,
            infiltration_capacity: params.f64_or("infiltration_capacity", 0.0)? * lf,
            m_sp: params.f64_or("m_sp", 0.5)?,
            reference_erosivity: 0.0,
            time: 0.0,
        };
        if changer.shape_factor <= 0.0 {
            return Err(ModelError::config(
                "daily_rainfall__precipitation_shape_factor",
                "must be positive",
            ));
        }
        changer.reference_erosivity = changer.erosivity(changer.starting_intensity);
        Ok(changer)
    }

    /// Time spent inside the change window so far.
    fn elapsed_change_time(&self) -> f64 {
        let end = self.stop_time.map_or(self.time, |stop| self.time.min(stop));
        (end - self.start_time).max(0.0)
    }

    /// Current `(intermittency_factor, mean_intensity)`.
    pub fn get_current_precip_params(&self) -> (f64, f64) {
        let t = self.elapsed_change_time();
        let f = (self.starting_intermittency + self.intermittency_rate * t).clamp(0.0, 1.0);
        let i = (self.starting_intensity + self.intensity_rate * t).max(0.0);
        (f, i)
    }

    /// Ratio of present to starting long-term erosivity, F·E[R^m].
    pub fn get_erodibility_adjustment_factor(&self) -> f64 {
        let reference = self.starting_intermittency * self.reference_erosivity;
        if reference <= 0.0 {
            return 1.0;
        }
        let (f, i) = self.get_current_precip_params();
        f * self.erosivity(i) / reference
    }

    /// E[R^m] for Weibull-distributed intensity with the given mean.
    fn erosivity(&self, mean_intensity: f64) -> f64 {
        if mean_intensity <= 0.0 {
            return 0.0;
        }
        let c = self.shape_factor;
        let scale = mean_intensity / gamma_function(1.0 + 1.0 / c);
        let sum: f64 = (0..QUADRATURE_POINTS)
            .map(|k| {
                let u = (k as f64 + 0.5) / QUADRATURE_POINTS as f64;
                let p = scale * (-(1.0 - u).ln()).powf(1.0 / c);
                runoff_rate(p, self.infiltration_capacity).powf(self.m_sp)
            })
            .sum();
        sum / QUADRATURE_POINTS as f64
    }

    pub fn time(&self) -> f64 {
        self.time
    }
}

impl BoundaryCondition for PrecipChanger {
    fn run_one_step(&mut self, _grid: &mut ModelGrid, dt: f64) -> ModelResult<()> {
        self.time += dt;
        Ok(())
    }
}
