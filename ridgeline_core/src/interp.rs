//! Piecewise-linear curves used by time-varying boundary forcing.
//!
//! A curve serializes as its control points only. The per-segment slopes are
//! derived data and are rebuilt whenever a curve is deserialized, so a
//! checkpoint never carries anything that could drift from the points.

use crate::error::{ModelError, ModelResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Control points of a curve, the serialized form of [`LinearInterpolator`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlPoints {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

/// Piecewise-linear interpolation through strictly increasing `x`.
///
/// Queries outside `[x_first, x_last]` clamp to the end values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ControlPoints", into = "ControlPoints")]
pub struct LinearInterpolator {
    x: Vec<f64>,
    y: Vec<f64>,
    slopes: Vec<f64>,
}

impl LinearInterpolator {
    /// Fits a curve through the given points.
    pub fn new(x: Vec<f64>, y: Vec<f64>) -> ModelResult<Self> {
        if x.len() != y.len() {
            return Err(ModelError::config(
                "interpolation",
                format!("{} x values but {} y values", x.len(), y.len()),
            ));
        }
        if x.is_empty() {
            return Err(ModelError::config("interpolation", "at least one control point is required"));
        }
        if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
            return Err(ModelError::config("interpolation", "control points must be finite"));
        }
        if x.windows(2).any(|w| w[1] <= w[0]) {
            return Err(ModelError::config("interpolation", "x values must be strictly increasing"));
        }
        let slopes = x
            .windows(2)
            .zip(y.windows(2))
            .map(|(xs, ys)| (ys[1] - ys[0]) / (xs[1] - xs[0]))
            .collect();
        Ok(Self { x, y, slopes })
    }

    /// Reads a two-column whitespace- or comma-separated text file.
    ///
    /// Blank lines and lines starting with `#` are ignored.
    pub fn from_file(path: impl AsRef<Path>) -> ModelResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let mut x = Vec::new();
        let mut y = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let cols: Vec<&str> = line
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|s| !s.is_empty())
                .collect();
            let parse = |s: &str| {
                s.parse::<f64>().map_err(|_| {
                    ModelError::config(
                        path.display().to_string(),
                        format!("line {}: '{}' is not a number", lineno + 1, s),
                    )
                })
            };
            match cols.as_slice() {
                [a, b] => {
                    x.push(parse(a)?);
                    y.push(parse(b)?);
                }
                _ => {
                    return Err(ModelError::config(
                        path.display().to_string(),
                        format!("line {}: expected two columns", lineno + 1),
                    ))
                }
            }
        }
        Self::new(x, y)
    }

    /// Evaluates the curve at `t`.
    pub fn eval(&self, t: f64) -> f64 {
        let last = self.x.len() - 1;
        if t <= self.x[0] {
            return self.y[0];
        }
        if t >= self.x[last] {
            return self.y[last];
        }
        // partition_point gives the first x > t; t lies in segment i-1.
        let i = self.x.partition_point(|&xi| xi <= t) - 1;
        self.y[i] + self.slopes[i] * (t - self.x[i])
    }

    pub fn x(&self) -> &[f64] {
        &self.x
    }

    pub fn y(&self) -> &[f64] {
        &self.y
    }
}

impl TryFrom<ControlPoints> for LinearInterpolator {
    type Error = ModelError;

    fn try_from(points: ControlPoints) -> Result<Self, Self::Error> {
        Self::new(points.x, points.y)
    }
}

impl From<LinearInterpolator> for ControlPoints {
    fn from(curve: LinearInterpolator) -> Self {
        Self { x: curve.x, y: curve.y }
    }
}
