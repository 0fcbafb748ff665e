//! Engine specialization driven by stochastic rainfall.
//!
//! A [`StochasticSimulationEngine`] is a [`SimulationEngine`] whose time
//! advance walks through storm and interstorm intervals from a
//! [`StormSequencer`]. Before each interval the rainfall and runoff rates in
//! [`ModelState`] are updated so the physical model sees the current climate.

use crate::engine::{advance_steps, step_count, step_model, EngineBuilder, ModelState, PhysicalModel, SimulationEngine, TimeAdvance};
use crate::error::{ModelError, ModelResult};
use crate::params::Parameters;
use crate::rain::{RainRecord, StormEvent};
use crate::storm::{runoff_rate, StormMode, StormSequencer};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::ops::{Deref, DerefMut};
use tracing::info;

/// Daily frequencies reported in the exceedance-frequency file.
const EXCEEDANCE_FREQUENCIES: [f64; 6] = [0.1, 0.05, 0.02, 0.01, 0.005, 0.001];

/// Storm sequencer plus everything recorded about the rain it produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StochasticClimate {
    sequencer: StormSequencer,
    rain_record: Option<RainRecord>,
    infiltration_capacity: f64,
    storm_sequence_filename: Option<String>,
    exceedance_frequency_filename: Option<String>,
}

impl StochasticClimate {
    pub fn from_params(params: &Parameters) -> ModelResult<Self> {
        let record_rain = params.get_bool("record_rain", false)?;
        let storm_sequence_filename = params.get_str("storm_sequence_filename")?.map(str::to_string);
        let exceedance_frequency_filename = params.get_str("exceedance_frequency_filename")?.map(str::to_string);
        for (key, requested) in [
            ("storm_sequence_filename", storm_sequence_filename.is_some()),
            ("exceedance_frequency_filename", exceedance_frequency_filename.is_some()),
        ] {
            if requested && !record_rain {
                return Err(ModelError::config(key, "requires record_rain to be true"));
            }
        }
        let infiltration_capacity = params.f64_or("infiltration_capacity", 0.0)? * params.length_factor();
        if infiltration_capacity < 0.0 {
            return Err(ModelError::config("infiltration_capacity", "must not be negative"));
        }
        Ok(Self {
            sequencer: StormSequencer::from_params(params)?,
            rain_record: record_rain.then(RainRecord::new),
            infiltration_capacity,
            storm_sequence_filename,
            exceedance_frequency_filename,
        })
    }

    pub fn sequencer(&self) -> &StormSequencer {
        &self.sequencer
    }

    pub fn sequencer_mut(&mut self) -> &mut StormSequencer {
        &mut self.sequencer
    }

    /// The record of every interval, when `record_rain` is set.
    pub fn rain_record(&self) -> Option<&RainRecord> {
        self.rain_record.as_ref()
    }

    pub fn infiltration_capacity(&self) -> f64 {
        self.infiltration_capacity
    }

    /// Sets the state's rates for an interval and records it.
    fn begin_interval(&mut self, state: &mut ModelState, duration: f64, rainfall_rate: f64) {
        state.rainfall_rate = rainfall_rate;
        state.runoff_rate = runoff_rate(rainfall_rate, self.infiltration_capacity);
        if let Some(record) = &mut self.rain_record {
            record.push(StormEvent {
                event_start_time: state.clock.current_time,
                event_duration: duration,
                rainfall_rate,
                runoff_rate: state.runoff_rate,
            });
        }
    }

    /// Advances the model by `duration`. Returns the number of model steps.
    ///
    /// Variable-duration mode steps through each storm and interstorm
    /// interval in sub-steps of at most `step`. Fixed-duration mode splits
    /// every step into its wet and dry parts, each taken as one model step.
    pub(crate) fn advance<M: PhysicalModel>(
        &mut self,
        state: &mut ModelState,
        model: &mut M,
        step: f64,
        duration: f64,
    ) -> ModelResult<usize> {
        let mut calls = 0;
        if self.sequencer.is_variable_duration() {
            let intervals: Vec<(f64, f64)> = self.sequencer.storm_intervals(duration)?.collect();
            for (interval, intensity) in intervals {
                self.begin_interval(state, interval, intensity);
                calls += advance_steps(state, model, step, interval)?;
            }
            return Ok(calls);
        }

        let start = state.clock.current_time;
        let n = step_count(step, duration);
        for k in 0..n {
            let step_start = state.clock.current_time;
            let dt = if k + 1 == n { start + duration - step_start } else { step };
            if let Some(changer) = state.boundary_handlers.precip_changer() {
                let (intermittency, intensity) = changer.get_current_precip_params();
                self.sequencer.set_precip_params(intermittency, intensity)?;
            }
            for (interval, intensity) in self.sequencer.fixed_intervals(dt)? {
                self.begin_interval(state, interval, intensity);
                step_model(state, model, interval)?;
                calls += 1;
            }
            state.clock.current_time = step_start + dt;
        }
        Ok(calls)
    }

    /// Writes the storm sequence and exceedance-frequency files, if requested.
    pub(crate) fn finalize(&self) -> ModelResult<()> {
        let Some(record) = &self.rain_record else {
            return Ok(());
        };
        if let Some(path) = &self.storm_sequence_filename {
            record.write_tsv(path)?;
            info!("Storm sequence ({} events) written to {}", record.len(), path);
        }
        if let Some(path) = &self.exceedance_frequency_filename {
            let summary = self.exceedance_summary(record);
            std::fs::write(path, serde_json::to_string_pretty(&summary)?)?;
            info!("Exceedance frequencies written to {}", path);
        }
        Ok(())
    }

    /// Fitted and recorded daily intensities at standard frequencies.
    fn exceedance_summary(&self, record: &RainRecord) -> serde_json::Value {
        let exceedance: Vec<serde_json::Value> = EXCEEDANCE_FREQUENCIES
            .iter()
            .map(|&frequency| {
                let predicted = match self.sequencer.mode() {
                    StormMode::Fixed(fixed) => Some(fixed.intensity_at_frequency(frequency)),
                    StormMode::Variable(_) => None,
                };
                json!({
                    "frequency": frequency,
                    "predicted_intensity": predicted,
                    "recorded_intensity": record.intensity_exceeded(frequency),
                })
            })
            .collect();
        match self.sequencer.mode() {
            StormMode::Fixed(fixed) => json!({
                "intermittency_factor": fixed.intermittency_factor,
                "mean_intensity": fixed.mean_intensity,
                "shape_factor": fixed.shape_factor,
                "scale_factor": fixed.scale_factor(),
                "exceedance": exceedance,
            }),
            StormMode::Variable(_) => json!({ "exceedance": exceedance }),
        }
    }
}

impl EngineBuilder {
    /// Builds an engine whose time advance follows a storm sequence.
    pub fn build_stochastic<M, F>(self, init: F) -> ModelResult<StochasticSimulationEngine<M>>
    where
        M: PhysicalModel,
        F: FnOnce(&mut ModelState) -> ModelResult<M>,
    {
        let engine = self.build_with(
            |params| StochasticClimate::from_params(params).map(TimeAdvance::Stochastic),
            init,
        )?;
        if !matches!(engine.time_advance(), TimeAdvance::Stochastic(_)) {
            return Err(ModelError::config(
                "load_from_checkpoint",
                "the checkpoint was written by an engine without stochastic rainfall",
            ));
        }
        Ok(StochasticSimulationEngine { engine })
    }
}

/// [`SimulationEngine`] with stochastic rainfall.
///
/// Dereferences to the base engine for running, output and checkpoints.
#[derive(Debug)]
pub struct StochasticSimulationEngine<M: PhysicalModel> {
    engine: SimulationEngine<M>,
}

impl<M: PhysicalModel> StochasticSimulationEngine<M> {
    fn climate(&self) -> Option<&StochasticClimate> {
        match self.engine.time_advance() {
            TimeAdvance::Stochastic(climate) => Some(climate),
            TimeAdvance::Fixed => None,
        }
    }

    fn climate_mut(&mut self) -> Option<&mut StochasticClimate> {
        match self.engine.time_advance_mut() {
            TimeAdvance::Stochastic(climate) => Some(climate),
            TimeAdvance::Fixed => None,
        }
    }

    pub fn sequencer(&self) -> Option<&StormSequencer> {
        self.climate().map(StochasticClimate::sequencer)
    }

    /// The rain record, when `record_rain` is set.
    pub fn rain_record(&self) -> Option<&RainRecord> {
        self.climate().and_then(StochasticClimate::rain_record)
    }

    /// Restores the storm sequencer's configured seed.
    pub fn reset_random_seed(&mut self) {
        if let Some(climate) = self.climate_mut() {
            climate.sequencer_mut().reset_random_seed();
        }
    }

    pub fn into_inner(self) -> SimulationEngine<M> {
        self.engine
    }
}

impl<M: PhysicalModel> Deref for StochasticSimulationEngine<M> {
    type Target = SimulationEngine<M>;

    fn deref(&self) -> &Self::Target {
        &self.engine
    }
}

impl<M: PhysicalModel> DerefMut for StochasticSimulationEngine<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::ELEVATION;
    use crate::testing::{params, ScriptedEnv, Uplift};
    use crate::RunOutcome;
    use approx::assert_relative_eq;
    use serde_json::json;

    fn build(params: Parameters, env: ScriptedEnv) -> ModelResult<StochasticSimulationEngine<Uplift>> {
        EngineBuilder::new()
            .params(params)
            .environment(env)
            .build_stochastic(|_| Ok(Uplift::new(0.01)))
    }

    fn variable() -> serde_json::Value {
        json!({
            "opt_stochastic_duration": true,
            "mean_storm_duration": 1.0,
            "mean_interstorm_duration": 9.0,
            "mean_storm_depth": 1.0,
            "random_seed": 11,
            "record_rain": true
        })
    }

    #[test]
    fn test_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let climate = StochasticClimate::from_params(&params(dir.path(), json!({}))).unwrap();
        assert!(!climate.sequencer().is_variable_duration());
        assert!(climate.rain_record().is_none());
        assert_eq!(climate.infiltration_capacity(), 0.0);
        let StormMode::Fixed(fixed) = climate.sequencer().mode() else {
            panic!("fixed-duration mode expected");
        };
        assert_eq!(fixed.intermittency_factor, 0.1);
        assert_eq!(fixed.mean_intensity, 1.0);
    }

    #[test]
    fn test_output_files_require_record_rain() {
        let dir = tempfile::tempdir().unwrap();
        for key in ["storm_sequence_filename", "exceedance_frequency_filename"] {
            let p = params(dir.path(), json!({})).with(key, "rain.txt");
            let err = StochasticClimate::from_params(&p).unwrap_err();
            assert!(matches!(err, ModelError::Configuration { key: ref k, .. } if k == key));
        }
    }

    #[test]
    fn test_fixed_mode_splits_each_step() {
        let dir = tempfile::tempdir().unwrap();
        let p = params(
            dir.path(),
            json!({"dt": 10.0, "output_interval": 10.0, "record_rain": true, "infiltration_capacity": 0.0}),
        );
        let mut engine = build(p, ScriptedEnv::unscheduled()).unwrap();
        assert_eq!(engine.advance_for(10.0, 10.0).unwrap(), 2);
        assert_eq!(engine.model_time(), 10.0);

        let record = engine.rain_record().unwrap();
        assert_eq!(record.len(), 2);
        let wet = record.get(0).unwrap();
        let dry = record.get(1).unwrap();
        assert_relative_eq!(wet.event_duration, 1.0);
        assert!(wet.rainfall_rate > 0.0);
        assert_eq!(wet.runoff_rate, wet.rainfall_rate);
        assert_relative_eq!(dry.event_start_time, 1.0);
        assert_relative_eq!(dry.event_duration, 9.0);
        assert_eq!(dry.rainfall_rate, 0.0);
    }

    #[test]
    fn test_variable_mode_statistics() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = params(dir.path(), variable());
        p.insert("dt", 1.0e6);
        p.insert("output_interval", 20_000.0);
        p.insert("run_duration", 20_000.0);
        let mut engine = build(p, ScriptedEnv::unscheduled()).unwrap();
        assert_eq!(engine.run(None).unwrap(), RunOutcome::Completed);

        let record = engine.rain_record().unwrap();
        assert_relative_eq!(record.total_duration(), 20_000.0, max_relative = 1e-9);
        let storms: Vec<f64> = record
            .events()
            .filter(|e| e.rainfall_rate > 0.0)
            .map(|e| e.event_duration)
            .collect();
        let wet_fraction = storms.iter().sum::<f64>() / record.total_duration();
        let mean_storm = storms.iter().sum::<f64>() / storms.len() as f64;
        assert!((wet_fraction - 0.1).abs() < 0.02, "wet fraction {}", wet_fraction);
        assert!((mean_storm - 1.0).abs() < 0.15, "mean storm {}", mean_storm);
        assert_eq!(engine.model().steps, record.len());
    }

    #[test]
    fn test_variable_mode_sub_steps_long_intervals() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = params(dir.path(), variable());
        p.insert("dt", 0.25);
        let mut engine = build(p, ScriptedEnv::unscheduled()).unwrap();
        let steps = engine.advance_for(0.25, 10.0).unwrap();

        let record = engine.rain_record().unwrap();
        let expected: usize = record
            .event_duration()
            .iter()
            .map(|&d| crate::engine::step_count(0.25, d))
            .sum();
        assert_eq!(steps, expected);
        assert!(steps >= record.len());
        assert_eq!(engine.model_time(), 10.0);
    }

    #[test]
    fn test_finalize_writes_rain_files() {
        let dir = tempfile::tempdir().unwrap();
        let sequence = dir.path().join("storms.tsv");
        let exceedance = dir.path().join("exceedance.json");
        let p = params(
            dir.path(),
            json!({
                "record_rain": true,
                "storm_sequence_filename": sequence.to_string_lossy(),
                "exceedance_frequency_filename": exceedance.to_string_lossy(),
            }),
        );
        let mut engine = build(p, ScriptedEnv::unscheduled()).unwrap();
        engine.run(None).unwrap();

        let events = engine.rain_record().unwrap().len();
        let text = std::fs::read_to_string(&sequence).unwrap();
        assert_eq!(text.lines().count(), events + 1);
        assert!(text.starts_with("event_start_time\t"));

        let summary: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&exceedance).unwrap()).unwrap();
        assert_eq!(summary["exceedance"].as_array().unwrap().len(), EXCEEDANCE_FREQUENCIES.len());
        assert_eq!(summary["intermittency_factor"], json!(0.1));
    }

    #[test]
    fn test_reset_random_seed() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = build(params(dir.path(), variable()), ScriptedEnv::unscheduled()).unwrap();
        let fresh = engine.sequencer().unwrap().clone();
        engine.advance_for(1.0, 50.0).unwrap();
        assert_ne!(engine.sequencer().unwrap(), &fresh);
        engine.reset_random_seed();
        assert_eq!(engine.sequencer().unwrap(), &fresh);
    }

    #[test]
    fn test_precip_changer_drives_fixed_climate() {
        let dir = tempfile::tempdir().unwrap();
        let p = params(
            dir.path(),
            json!({
                "BoundaryHandlers": ["PrecipChanger"],
                "daily_rainfall__intermittency_factor": 0.1,
                "daily_rainfall__intermittency_factor_time_rate_of_change": 0.01,
                "daily_rainfall__mean_intensity": 1.0,
            }),
        );
        let mut engine = build(p, ScriptedEnv::unscheduled()).unwrap();
        engine.advance_for(1.0, 10.0).unwrap();

        let StormMode::Fixed(fixed) = engine.sequencer().unwrap().mode() else {
            panic!("fixed-duration mode expected");
        };
        assert_relative_eq!(fixed.intermittency_factor, 0.19, epsilon = 1e-9);
    }

    fn changing_climate(dir: &std::path::Path, intermittency: (f64, f64), intensity: (f64, f64)) -> Parameters {
        params(
            dir,
            json!({
                "BoundaryHandlers": ["PrecipChanger"],
                "record_rain": true,
                "daily_rainfall__intermittency_factor": intermittency.0,
                "daily_rainfall__intermittency_factor_time_rate_of_change": intermittency.1,
                "daily_rainfall__mean_intensity": intensity.0,
                "daily_rainfall__mean_intensity_time_rate_of_change": intensity.1,
            }),
        )
    }

    #[test]
    fn test_precip_changer_intensity_reaches_zero() {
        let dir = tempfile::tempdir().unwrap();
        let p = changing_climate(dir.path(), (0.1, 0.0), (1.0, -0.25));
        let mut engine = build(p, ScriptedEnv::unscheduled()).unwrap();
        assert_eq!(engine.run(None).unwrap(), RunOutcome::Completed);
        assert_eq!(engine.model_time(), 10.0);

        let StormMode::Fixed(fixed) = engine.sequencer().unwrap().mode() else {
            panic!("fixed-duration mode expected");
        };
        assert_eq!(fixed.mean_intensity, 0.0);

        let record = engine.rain_record().unwrap();
        assert_eq!(record.len(), 20);
        let late: Vec<StormEvent> = record.events().filter(|e| e.event_start_time >= 5.0).collect();
        assert_eq!(late.len(), 10);
        assert!(late.iter().all(|e| e.rainfall_rate == 0.0 && e.runoff_rate == 0.0));
        assert!(late.iter().any(|e| (e.event_duration - 0.1).abs() < 1e-9));
    }

    #[test]
    fn test_precip_changer_intermittency_reaches_zero() {
        let dir = tempfile::tempdir().unwrap();
        let p = changing_climate(dir.path(), (0.1, -0.1), (1.0, 0.0));
        let mut engine = build(p, ScriptedEnv::unscheduled()).unwrap();
        assert_eq!(engine.run(None).unwrap(), RunOutcome::Completed);
        assert_eq!(engine.model_time(), 10.0);

        let record = engine.rain_record().unwrap();
        let late: Vec<StormEvent> = record.events().filter(|e| e.event_start_time >= 2.0).collect();
        assert_eq!(late.len(), 8);
        for event in late {
            assert_eq!(event.rainfall_rate, 0.0);
            assert_relative_eq!(event.event_duration, 1.0);
        }
        assert_relative_eq!(record.total_duration(), 10.0, epsilon = 1e-9);
    }

    #[test]
    fn test_precip_changer_intermittency_reaches_one() {
        let dir = tempfile::tempdir().unwrap();
        let p = changing_climate(dir.path(), (0.9, 0.1), (1.0, 0.0));
        let mut engine = build(p, ScriptedEnv::unscheduled()).unwrap();
        assert_eq!(engine.run(None).unwrap(), RunOutcome::Completed);

        let record = engine.rain_record().unwrap();
        let late: Vec<StormEvent> = record.events().filter(|e| e.event_start_time >= 2.0).collect();
        assert_eq!(late.len(), 8);
        for event in late {
            assert!(event.rainfall_rate > 0.0);
            assert_relative_eq!(event.event_duration, 1.0);
        }
    }

    #[test]
    fn test_fixed_checkpoint_is_not_stochastic() {
        let dir = tempfile::tempdir().unwrap();
        let p = params(dir.path(), json!({"load_from_checkpoint": true}));
        let fixed = EngineBuilder::new()
            .params(p.clone())
            .environment(ScriptedEnv::unscheduled())
            .build(|_| Ok(Uplift::new(0.01)))
            .unwrap();
        fixed.save_checkpoint().unwrap();

        let err = build(p, ScriptedEnv::unscheduled()).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_wall_time_checkpoint_and_resume() {
        let mut extra = variable();
        for (key, value) in [
            ("dt", json!(0.5)),
            ("run_duration", json!(20.0)),
            ("infiltration_capacity", json!(0.05)),
            ("opt_walltime", json!(true)),
            ("opt_save", json!(true)),
            ("cut_off_time", json!(5.0)),
            ("load_from_checkpoint", json!(true)),
        ] {
            extra[key] = value;
        }

        let dir = tempfile::tempdir().unwrap();
        let env = ScriptedEnv::new(1.0, &[100, 100, 1], Some(100));
        let mut first = build(params(dir.path(), extra.clone()), env.clone()).unwrap();
        assert_eq!(first.run(None).unwrap(), RunOutcome::Checkpointed);
        assert!(env.terminated());
        assert_eq!(first.model_time(), 6.0);
        assert_eq!(first.clock().iteration, 4);
        let checkpoint = first.checkpoint_path().to_path_buf();
        assert!(checkpoint.exists());

        let mut resumed = build(params(dir.path(), extra.clone()), ScriptedEnv::plenty()).unwrap();
        assert_eq!(resumed.model_time(), 6.0);
        assert_eq!(resumed.clock().iteration, 4);
        assert_eq!(resumed.sequencer(), first.sequencer());
        assert_eq!(resumed.run(None).unwrap(), RunOutcome::Completed);
        assert!(!checkpoint.exists());

        let reference_dir = tempfile::tempdir().unwrap();
        let mut reference = build(params(reference_dir.path(), extra), ScriptedEnv::plenty()).unwrap();
        assert_eq!(reference.run(None).unwrap(), RunOutcome::Completed);

        assert_eq!(resumed.clock(), reference.clock());
        assert_eq!(resumed.model(), reference.model());
        assert_eq!(resumed.sequencer(), reference.sequencer());
        assert_eq!(resumed.rain_record(), reference.rain_record());
        assert_eq!(resumed.grid().field(ELEVATION), reference.grid().field(ELEVATION));
    }
}
