//! Common types for the ridgeline environment abstraction.

use crate::EnvError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Remaining wall-clock budget reported by a batch scheduler.
///
/// Parsed from the scheduler's `[days-]HH:MM:SS` / `HH:MM:SS` / `MM:SS`
/// representation. A missing days segment means zero days and a missing
/// hours segment means zero hours. When a days segment is present the
/// seconds may be omitted (`D-HH:MM`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WallTime {
    pub days: u64,
    pub hours: u64,
    pub minutes: u64,
    pub seconds: u64,
}

impl WallTime {
    /// Total remaining time in minutes.
    pub fn as_minutes(&self) -> f64 {
        (self.days * 24 * 60 + self.hours * 60 + self.minutes) as f64 + self.seconds as f64 / 60.0
    }
    
    /// Builds a wall time from a whole number of minutes.
    pub fn from_minutes(minutes: u64) -> Self {
        Self {
            days: minutes / (24 * 60),
            hours: (minutes / 60) % 24,
            minutes: minutes % 60,
            seconds: 0,
        }
    }
}

impl std::fmt::Display for WallTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.days > 0 {
            write!(f, "{}-", self.days)?;
        }
        write!(f, "{:02}:{:02}:{:02}", self.hours, self.minutes, self.seconds)
    }
}

fn parse_segment(segment: &str, raw: &str) -> Result<u64, EnvError> {
    segment.trim().parse::<u64>().map_err(|_| EnvError::malformed(raw))
}

impl FromStr for WallTime {
    type Err = EnvError;
    
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        if raw.is_empty() {
            return Err(EnvError::malformed(s));
        }
        
        let (days, clock) = match raw.split_once('-') {
            Some((d, rest)) => (Some(parse_segment(d, raw)?), rest),
            None => (None, raw),
        };
        
        let parts = clock
            .split(':')
            .map(|p| parse_segment(p, raw))
            .collect::<Result<Vec<u64>, EnvError>>()?;
        
        let (hours, minutes, seconds) = match (days.is_some(), parts.as_slice()) {
            (_, [h, m, s]) => (*h, *m, *s),
            // With a days prefix the scheduler always reports hours first.
            (true, [h, m]) => (*h, *m, 0),
            (false, [m, s]) => (0, *m, *s),
            (false, [s]) => (0, 0, *s),
            _ => return Err(EnvError::malformed(raw)),
        };
        
        Ok(Self {
            days: days.unwrap_or(0),
            hours,
            minutes,
            seconds,
        })
    }
}
