//! Storm events and the optional record of every event in a run.

use crate::error::ModelResult;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

/// One wet or dry interval as it was applied to the model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StormEvent {
    pub event_start_time: f64,
    pub event_duration: f64,
    pub rainfall_rate: f64,
    pub runoff_rate: f64,
}

/// Append-only record of storm events, kept as four parallel columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RainRecord {
    event_start_time: Vec<f64>,
    event_duration: Vec<f64>,
    rainfall_rate: Vec<f64>,
    runoff_rate: Vec<f64>,
}

impl RainRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: StormEvent) {
        self.event_start_time.push(event.event_start_time);
        self.event_duration.push(event.event_duration);
        self.rainfall_rate.push(event.rainfall_rate);
        self.runoff_rate.push(event.runoff_rate);
    }

    pub fn len(&self) -> usize {
        self.event_start_time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.event_start_time.is_empty()
    }

    pub fn get(&self, i: usize) -> Option<StormEvent> {
        Some(StormEvent {
            event_start_time: *self.event_start_time.get(i)?,
            event_duration: self.event_duration[i],
            rainfall_rate: self.rainfall_rate[i],
            runoff_rate: self.runoff_rate[i],
        })
    }

    pub fn events(&self) -> impl Iterator<Item = StormEvent> + '_ {
        (0..self.len()).filter_map(move |i| self.get(i))
    }

    pub fn event_start_time(&self) -> &[f64] {
        &self.event_start_time
    }

    pub fn event_duration(&self) -> &[f64] {
        &self.event_duration
    }

    pub fn rainfall_rate(&self) -> &[f64] {
        &self.rainfall_rate
    }

    pub fn runoff_rate(&self) -> &[f64] {
        &self.runoff_rate
    }

    /// Total recorded time.
    pub fn total_duration(&self) -> f64 {
        self.event_duration.iter().sum()
    }

    /// Rainfall rate exceeded for a fraction `frequency` of the recorded time.
    ///
    /// Returns `None` for an empty record or a frequency outside (0, 1].
    pub fn intensity_exceeded(&self, frequency: f64) -> Option<f64> {
        let total = self.total_duration();
        if total <= 0.0 || !(frequency > 0.0 && frequency <= 1.0) {
            return None;
        }
        let mut by_rate: Vec<(f64, f64)> = self
            .rainfall_rate
            .iter()
            .copied()
            .zip(self.event_duration.iter().copied())
            .collect();
        by_rate.sort_by(|a, b| b.0.total_cmp(&a.0));
        let mut covered = 0.0;
        for (rate, duration) in by_rate {
            covered += duration;
            if covered / total >= frequency {
                return Some(rate);
            }
        }
        None
    }

    /// Writes the record as tab-separated text with a header line.
    pub fn write_tsv(&self, path: impl AsRef<Path>) -> ModelResult<()> {
        let mut out = std::io::BufWriter::new(std::fs::File::create(path)?);
        writeln!(out, "event_start_time\tevent_duration\trainfall_rate\trunoff_rate")?;
        for e in self.events() {
            writeln!(
                out,
                "{}\t{}\t{}\t{}",
                e.event_start_time, e.event_duration, e.rainfall_rate, e.runoff_rate
            )?;
        }
        out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(start: f64, duration: f64, rate: f64) -> StormEvent {
        StormEvent {
            event_start_time: start,
            event_duration: duration,
            rainfall_rate: rate,
            runoff_rate: rate,
        }
    }

    #[test]
    fn test_columns_stay_parallel() {
        let mut record = RainRecord::new();
        record.push(event(0.0, 1.0, 2.0));
        record.push(event(1.0, 9.0, 0.0));
        assert_eq!(record.len(), 2);
        assert_eq!(record.event_start_time(), &[0.0, 1.0]);
        assert_eq!(record.rainfall_rate(), &[2.0, 0.0]);
        assert_eq!(record.get(1), Some(event(1.0, 9.0, 0.0)));
        assert_eq!(record.get(2), None);
    }

    #[test]
    fn test_intensity_exceeded() {
        let mut record = RainRecord::new();
        record.push(event(0.0, 1.0, 5.0));
        record.push(event(1.0, 1.0, 2.0));
        record.push(event(2.0, 8.0, 0.0));
        assert_eq!(record.intensity_exceeded(0.1), Some(5.0));
        assert_eq!(record.intensity_exceeded(0.2), Some(2.0));
        assert_eq!(record.intensity_exceeded(0.5), Some(0.0));
        assert_eq!(record.intensity_exceeded(0.0), None);
    }

    #[test]
    fn test_write_tsv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storms.txt");
        let mut record = RainRecord::new();
        record.push(event(0.0, 1.0, 2.0));
        record.write_tsv(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], "0\t1\t2\t2");
    }
}
