//! The parameter store: a validated view over a JSON object.
//!
//! Every model, handler and sequencer reads its configuration through
//! [`Parameters`]. Getters never panic; a value of the wrong shape is a
//! [`ModelError::Configuration`] naming the offending key.

use crate::error::{ModelError, ModelResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

/// Feet per meter, used by the unit-conversion flags.
pub const FEET_PER_METER: f64 = 3.28084;

/// Key under which the resolved length factor is stored.
pub const LENGTH_FACTOR_KEY: &str = "length_factor";

/// Key/value configuration for a model run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Parameters(Map<String, Value>);

impl Parameters {
    /// Creates an empty parameter set.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Wraps a JSON value, which must be an object.
    pub fn from_value(value: Value) -> ModelResult<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(ModelError::config(
                "<root>",
                format!("parameters must be a JSON object, found {}", other),
            )),
        }
    }

    /// Reads a parameter file (a JSON object).
    pub fn from_file(path: impl AsRef<Path>) -> ModelResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ModelError::config("input_file", format!("cannot read {}: {}", path.display(), e))
        })?;
        let value: Value = serde_json::from_str(&text).map_err(|e| {
            ModelError::config("input_file", format!("{} is not valid JSON: {}", path.display(), e))
        })?;
        Self::from_value(value)
    }

    /// Builder-style insert.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Inserts or replaces a value.
    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    /// Removes a value, returning it.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// Returns a float, accepting JSON numbers and numeric strings.
    pub fn get_f64(&self, key: &str) -> ModelResult<Option<f64>> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n
                .as_f64()
                .map(Some)
                .ok_or_else(|| not_float(key)),
            Some(Value::String(s)) => s.trim().parse::<f64>().map(Some).map_err(|_| not_float(key)),
            Some(_) => Err(not_float(key)),
        }
    }

    /// Returns a float or `default` when absent.
    pub fn f64_or(&self, key: &str, default: f64) -> ModelResult<f64> {
        Ok(self.get_f64(key)?.unwrap_or(default))
    }

    /// Returns a float that must be present.
    pub fn require_f64(&self, key: &str) -> ModelResult<f64> {
        self.get_f64(key)?
            .ok_or_else(|| ModelError::config(key, "required parameter was not provided"))
    }

    /// Returns a float that must be present, finite and strictly positive.
    pub fn require_positive_f64(&self, key: &str) -> ModelResult<f64> {
        let value = self.require_f64(key)?;
        if value.is_finite() && value > 0.0 {
            Ok(value)
        } else {
            Err(ModelError::config(key, format!("must be a positive number, got {}", value)))
        }
    }

    /// Returns a boolean or `default` when absent.
    pub fn get_bool(&self, key: &str, default: bool) -> ModelResult<bool> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(default),
            Some(Value::Bool(b)) => Ok(*b),
            Some(other) => Err(ModelError::config(
                key,
                format!("expected true or false, found {}", other),
            )),
        }
    }

    /// Returns a string slice, if present.
    pub fn get_str(&self, key: &str) -> ModelResult<Option<&str>> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(other) => Err(ModelError::config(key, format!("expected a string, found {}", other))),
        }
    }

    /// Returns a non-negative whole number.
    ///
    /// Accepts `3` and `3.0`; rejects `1.5` and negative values.
    pub fn get_whole_number(&self, key: &str) -> ModelResult<Option<u64>> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => {
                if let Some(v) = n.as_u64() {
                    return Ok(Some(v));
                }
                match n.as_f64() {
                    Some(f) if f >= 0.0 && f.fract() == 0.0 && f <= u64::MAX as f64 => Ok(Some(f as u64)),
                    _ => Err(ModelError::config(key, format!("must be a whole number, got {}", n))),
                }
            }
            Some(other) => Err(ModelError::config(key, format!("must be a whole number, got {}", other))),
        }
    }

    /// Returns a list of strings; a single string counts as a one-item list.
    pub fn get_str_list(&self, key: &str) -> ModelResult<Vec<String>> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::String(s)) => Ok(vec![s.clone()]),
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| {
                    v.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| ModelError::config(key, format!("expected a string, found {}", v)))
                })
                .collect(),
            Some(other) => Err(ModelError::config(key, format!("expected a string or list, found {}", other))),
        }
    }

    /// Deserializes a structured value such as a point list or a table.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> ModelResult<Option<T>> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => T::deserialize(value)
                .map(Some)
                .map_err(|e| ModelError::config(key, e.to_string())),
        }
    }

    /// Returns a nested object as its own parameter set.
    pub fn get_table(&self, key: &str) -> Option<Parameters> {
        match self.0.get(key) {
            Some(Value::Object(map)) => Some(Parameters(map.clone())),
            _ => None,
        }
    }

    /// Resolves a parameter given either as `name` or as `name_exp` (10^x).
    ///
    /// Supplying both forms is a configuration error. When neither is present
    /// the result is an error if `raise_error`, otherwise `None`.
    pub fn get_parameter_from_exponent(&self, name: &str, raise_error: bool) -> ModelResult<Option<f64>> {
        let exp_key = format!("{}_exp", name);
        match (self.contains(name), self.contains(&exp_key)) {
            (true, true) => Err(ModelError::config(
                name,
                format!("both '{}' and '{}' were supplied", name, exp_key),
            )),
            (true, false) => self.get_f64(name),
            (false, true) => Ok(self.get_f64(&exp_key)?.map(|e| 10f64.powf(e))),
            (false, false) if raise_error => Err(ModelError::config(
                name,
                format!("neither '{}' nor '{}' was supplied", name, exp_key),
            )),
            (false, false) => Ok(None),
        }
    }

    /// Resolves the internal length scale from the unit-conversion flags and
    /// stores it under `length_factor`.
    pub fn resolve_length_factor(&mut self) -> ModelResult<f64> {
        let feet_to_meters = self.get_bool("feet_to_meters", false)?;
        let meters_to_feet = self.get_bool("meters_to_feet", false)?;
        let factor = match (feet_to_meters, meters_to_feet) {
            (true, true) => {
                return Err(ModelError::config(
                    "feet_to_meters",
                    "both 'feet_to_meters' and 'meters_to_feet' are set",
                ))
            }
            (true, false) => 1.0 / FEET_PER_METER,
            (false, true) => FEET_PER_METER,
            (false, false) => 1.0,
        };
        self.insert(LENGTH_FACTOR_KEY, factor);
        Ok(factor)
    }

    /// Returns the resolved length factor (1.0 before resolution).
    pub fn length_factor(&self) -> f64 {
        self.get_f64(LENGTH_FACTOR_KEY).ok().flatten().unwrap_or(1.0)
    }

    /// Parameters handed to the boundary handler called `name`.
    ///
    /// A table stored under the handler's own name takes precedence (with the
    /// length factor copied in); otherwise the whole global set is passed.
    pub fn handler_parameters(&self, name: &str) -> Parameters {
        match self.get_table(name) {
            Some(mut own) => {
                own.insert(LENGTH_FACTOR_KEY, self.length_factor());
                own
            }
            None => self.clone(),
        }
    }
}

fn not_float(key: &str) -> ModelError {
    ModelError::config(key, "value is not compatible with type float")
}
