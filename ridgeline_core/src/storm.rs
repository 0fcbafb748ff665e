//! Stochastic rainfall: alternating wet and dry intervals.
//!
//! Two modes share one seeded stream:
//!
//! - **Variable duration**: storm and interstorm lengths are exponential,
//!   storm depth is gamma distributed, and intensity is depth over duration.
//! - **Fixed duration**: each model step is split into a wet fraction (the
//!   intermittency factor) and a dry remainder, with the wet intensity drawn
//!   from a Weibull (stretched exponential) distribution.
//!
//! Distributions are rebuilt from their control parameters whenever they are
//! needed, so the sequencer serializes as plain numbers plus the stream
//! position.

use crate::error::{ModelError, ModelResult};
use crate::params::Parameters;
use crate::rng::SeededRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Exp, Gamma, Weibull};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Runoff rate for rainfall rate `p` over a soil with infiltration capacity
/// `i`: `p - i (1 - exp(-p / i))`, never negative.
pub fn runoff_rate(p: f64, i: f64) -> f64 {
    if p > 0.0 && i > 0.0 {
        (p - i * (1.0 - (-p / i).exp())).max(0.0)
    } else {
        p
    }
}

/// Gamma function for positive arguments (Lanczos, g = 7).
pub fn gamma_function(x: f64) -> f64 {
    const G: f64 = 7.0;
    const COEFFS: [f64; 9] = [
        0.999_999_999_999_809_9,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_1,
        -176.615_029_162_140_6,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_572e-6,
        1.505_632_735_149_311_6e-7,
    ];
    if x < 0.5 {
        // reflection
        return std::f64::consts::PI / ((std::f64::consts::PI * x).sin() * gamma_function(1.0 - x));
    }
    let x = x - 1.0;
    let mut a = COEFFS[0];
    let t = x + G + 0.5;
    for (i, c) in COEFFS.iter().enumerate().skip(1) {
        a += c / (x + i as f64);
    }
    (2.0 * std::f64::consts::PI).sqrt() * t.powf(x + 0.5) * (-t).exp() * a
}

/// Parameters of the variable-duration mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDuration {
    pub mean_storm_duration: f64,
    pub mean_interstorm_duration: f64,
    pub mean_storm_depth: f64,
    /// Gamma shape `k`; the depth scale is `mean_storm_depth / k`
    pub storm_depth_shape_factor: f64,
}

/// Parameters of the fixed-duration mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixedDuration {
    pub intermittency_factor: f64,
    pub mean_intensity: f64,
    pub shape_factor: f64,
    pub number_of_sub_time_steps: u64,
}

impl FixedDuration {
    /// Weibull scale giving the configured mean intensity.
    pub fn scale_factor(&self) -> f64 {
        self.mean_intensity / gamma_function(1.0 + 1.0 / self.shape_factor)
    }

    /// Daily intensity exceeded with the given daily frequency.
    ///
    /// Frequencies at or above the intermittency factor have no wet
    /// counterpart and map to zero.
    pub fn intensity_at_frequency(&self, frequency: f64) -> f64 {
        if frequency >= self.intermittency_factor || self.intermittency_factor <= 0.0 {
            return 0.0;
        }
        let q = frequency / self.intermittency_factor;
        self.scale_factor() * (-q.ln()).powf(1.0 / self.shape_factor)
    }
}

#[derive(Debug, Deserialize)]
struct ExceedancePoint {
    frequency: f64,
    intensity: f64,
}

#[derive(Debug, Deserialize)]
struct FrequencyTable {
    intermittency_factor: f64,
    exceedance: Vec<ExceedancePoint>,
}

/// Fits Weibull `(scale, shape)` to an exceedance-frequency table.
///
/// The conditional exceedance probability `q = f / F` of a wet-day intensity
/// `x` satisfies `ln(-ln q) = c ln x - c ln λ`, so a least-squares line
/// through the transformed points gives the shape `c` and scale `λ`.
pub fn fit_weibull_to_exceedance(intermittency: f64, points: &[(f64, f64)]) -> ModelResult<(f64, f64)> {
    let transformed: Vec<(f64, f64)> = points
        .iter()
        .filter_map(|&(frequency, intensity)| {
            let q = frequency / intermittency;
            (q > 0.0 && q < 1.0 && intensity > 0.0).then(|| (intensity.ln(), (-q.ln()).ln()))
        })
        .collect();
    if transformed.len() < 2 {
        return Err(ModelError::config(
            "frequency_filename",
            "at least two exceedance points with 0 < frequency < intermittency_factor are required",
        ));
    }
    let n = transformed.len() as f64;
    let mean_x = transformed.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = transformed.iter().map(|p| p.1).sum::<f64>() / n;
    let sxx: f64 = transformed.iter().map(|p| (p.0 - mean_x).powi(2)).sum();
    let sxy: f64 = transformed.iter().map(|p| (p.0 - mean_x) * (p.1 - mean_y)).sum();
    if sxx <= 0.0 {
        return Err(ModelError::config("frequency_filename", "exceedance intensities must differ"));
    }
    let shape = sxy / sxx;
    if shape <= 0.0 {
        return Err(ModelError::config(
            "frequency_filename",
            "intensity must decrease as exceedance frequency increases",
        ));
    }
    let intercept = mean_y - shape * mean_x;
    let scale = (-intercept / shape).exp();
    Ok((scale, shape))
}

/// Which way the sequencer splits time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum StormMode {
    Variable(VariableDuration),
    Fixed(FixedDuration),
}

/// Generates `(duration, intensity)` intervals from a seeded stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StormSequencer {
    mode: StormMode,
    rng: SeededRng,
}

impl StormSequencer {
    pub fn new(mode: StormMode, seed: u64) -> Self {
        Self {
            mode,
            rng: SeededRng::new(seed),
        }
    }

    /// Reads the storm configuration.
    ///
    /// `opt_stochastic_duration` selects variable-duration mode. A
    /// `frequency_filename` is only meaningful in fixed-duration mode, whose
    /// climate otherwise defaults to intermittency 0.1, mean intensity 1.0 and
    /// shape factor 0.6.
    pub fn from_params(params: &Parameters) -> ModelResult<Self> {
        let lf = params.length_factor();
        let seed = params.get_whole_number("random_seed")?.unwrap_or(0);
        let number_of_sub_time_steps = params.get_whole_number("number_of_sub_time_steps")?.unwrap_or(1);
        if number_of_sub_time_steps == 0 {
            return Err(ModelError::config("number_of_sub_time_steps", "must be at least 1"));
        }

        let mode = if params.get_bool("opt_stochastic_duration", false)? {
            if params.contains("frequency_filename") {
                return Err(ModelError::config(
                    "frequency_filename",
                    "an exceedance-frequency file cannot be used with opt_stochastic_duration",
                ));
            }
            let shape = params.f64_or("storm_depth_shape_factor", 1.0)?;
            if !(shape > 0.0) {
                return Err(ModelError::config("storm_depth_shape_factor", "must be positive"));
            }
            StormMode::Variable(VariableDuration {
                mean_storm_duration: params.require_positive_f64("mean_storm_duration")?,
                mean_interstorm_duration: params.require_positive_f64("mean_interstorm_duration")?,
                mean_storm_depth: params.require_positive_f64("mean_storm_depth")? * lf,
                storm_depth_shape_factor: shape,
            })
        } else {
            let fixed = match params.get_str("frequency_filename")? {
                Some(path) => Self::fixed_from_frequency_file(path, number_of_sub_time_steps, lf)?,
                None => {
                    let intermittency_factor = match params.get_f64("daily_rainfall__intermittency_factor")? {
                        Some(f) => f,
                        None => params.f64_or("daily_rainfall_intermittency_factor", 0.1)?,
                    };
                    let mean_intensity = params.f64_or("daily_rainfall__mean_intensity", 1.0)?;
                    let shape_factor = params.f64_or("daily_rainfall__precipitation_shape_factor", 0.6)?;
                    if !(mean_intensity > 0.0) {
                        return Err(ModelError::config("daily_rainfall__mean_intensity", "must be positive"));
                    }
                    if !(shape_factor > 0.0) {
                        return Err(ModelError::config(
                            "daily_rainfall__precipitation_shape_factor",
                            "must be positive",
                        ));
                    }
                    FixedDuration {
                        intermittency_factor,
                        mean_intensity: mean_intensity * lf,
                        shape_factor,
                        number_of_sub_time_steps,
                    }
                }
            };
            check_intermittency(fixed.intermittency_factor)?;
            StormMode::Fixed(fixed)
        };
        Ok(Self::new(mode, seed))
    }

    fn fixed_from_frequency_file(path: &str, number_of_sub_time_steps: u64, lf: f64) -> ModelResult<FixedDuration> {
        let text = std::fs::read_to_string(Path::new(path))
            .map_err(|e| ModelError::config("frequency_filename", format!("cannot read {}: {}", path, e)))?;
        let table: FrequencyTable = serde_json::from_str(&text)
            .map_err(|e| ModelError::config("frequency_filename", format!("{}: {}", path, e)))?;
        check_intermittency(table.intermittency_factor)?;
        let points: Vec<(f64, f64)> = table
            .exceedance
            .iter()
            .map(|p| (p.frequency, p.intensity * lf))
            .collect();
        let (scale, shape) = fit_weibull_to_exceedance(table.intermittency_factor, &points)?;
        Ok(FixedDuration {
            intermittency_factor: table.intermittency_factor,
            mean_intensity: scale * gamma_function(1.0 + 1.0 / shape),
            shape_factor: shape,
            number_of_sub_time_steps,
        })
    }

    pub fn mode(&self) -> &StormMode {
        &self.mode
    }

    pub fn is_variable_duration(&self) -> bool {
        matches!(self.mode, StormMode::Variable(_))
    }

    pub fn seed(&self) -> u64 {
        self.rng.seed()
    }

    /// Restores the originally configured seed.
    pub fn reset_random_seed(&mut self) {
        self.rng.reset();
    }

    /// Updates the fixed-mode climate; ignored in variable-duration mode.
    pub fn set_precip_params(&mut self, intermittency_factor: f64, mean_intensity: f64) -> ModelResult<()> {
        check_intermittency(intermittency_factor)?;
        if let StormMode::Fixed(fixed) = &mut self.mode {
            fixed.intermittency_factor = intermittency_factor;
            fixed.mean_intensity = mean_intensity;
        }
        Ok(())
    }

    /// Lazily yields alternating storm and interstorm intervals summing to
    /// `span`, starting with a storm. The last interval is truncated.
    ///
    /// Fails outside variable-duration mode.
    pub fn storm_intervals(&mut self, span: f64) -> ModelResult<StormIntervals<'_>> {
        let StormMode::Variable(v) = &self.mode else {
            return Err(ModelError::config(
                "opt_stochastic_duration",
                "storm intervals are only generated in variable-duration mode",
            ));
        };
        let storm = Exp::new(1.0 / v.mean_storm_duration).map_err(|e| dist_error("mean_storm_duration", e))?;
        let interstorm =
            Exp::new(1.0 / v.mean_interstorm_duration).map_err(|e| dist_error("mean_interstorm_duration", e))?;
        let depth = Gamma::new(v.storm_depth_shape_factor, v.mean_storm_depth / v.storm_depth_shape_factor)
            .map_err(|e| dist_error("storm_depth_shape_factor", e))?;
        Ok(StormIntervals {
            rng: self.rng.inner(),
            storm,
            interstorm,
            depth,
            remaining: span.max(0.0),
            wet_next: true,
        })
    }

    /// Splits one step of length `dt` into `n` wet sub-intervals followed by
    /// one dry interval. Zero-length intervals are omitted.
    pub fn fixed_intervals(&mut self, dt: f64) -> ModelResult<Vec<(f64, f64)>> {
        let StormMode::Fixed(fixed) = &self.mode else {
            return Err(ModelError::config(
                "opt_stochastic_duration",
                "fixed intervals are only generated in fixed-duration mode",
            ));
        };
        let f = fixed.intermittency_factor;
        let n = fixed.number_of_sub_time_steps;
        // Zero mean intensity leaves the wet intervals without rain.
        let weibull = if fixed.mean_intensity > 0.0 {
            Some(
                Weibull::new(fixed.scale_factor(), fixed.shape_factor)
                    .map_err(|e| dist_error("daily_rainfall__precipitation_shape_factor", e))?,
            )
        } else {
            None
        };

        let mut intervals = Vec::with_capacity(n as usize + 1);
        let wet = dt * f / n as f64;
        if wet > 0.0 {
            for _ in 0..n {
                let intensity = weibull.as_ref().map_or(0.0, |w| self.rng.sample(w));
                intervals.push((wet, intensity));
            }
        }
        let dry = dt * (1.0 - f);
        if dry > 0.0 {
            intervals.push((dry, 0.0));
        }
        Ok(intervals)
    }
}

fn check_intermittency(f: f64) -> ModelResult<()> {
    if (0.0..=1.0).contains(&f) {
        Ok(())
    } else {
        Err(ModelError::config(
            "daily_rainfall__intermittency_factor",
            format!("must lie in [0, 1], got {}", f),
        ))
    }
}

fn dist_error(key: &str, e: impl std::fmt::Display) -> ModelError {
    ModelError::config(key, e.to_string())
}

/// Iterator over variable-duration intervals.
pub struct StormIntervals<'a> {
    rng: &'a mut ChaCha8Rng,
    storm: Exp<f64>,
    interstorm: Exp<f64>,
    depth: Gamma<f64>,
    remaining: f64,
    wet_next: bool,
}

impl Iterator for StormIntervals<'_> {
    type Item = (f64, f64);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining <= 0.0 {
            return None;
        }
        let (duration, intensity) = if self.wet_next {
            let duration = self.storm.sample(&mut *self.rng);
            let depth = self.depth.sample(&mut *self.rng);
            let intensity = if duration > 0.0 { depth / duration } else { 0.0 };
            (duration, intensity)
        } else {
            (self.interstorm.sample(&mut *self.rng), 0.0)
        };
        self.wet_next = !self.wet_next;
        let duration = if duration >= self.remaining {
            let last = self.remaining;
            self.remaining = 0.0;
            last
        } else {
            self.remaining -= duration;
            duration
        };
        Some((duration, intensity))
    }
}
