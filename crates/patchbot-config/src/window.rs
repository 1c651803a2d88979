//! Allowed running hours.

use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::ConfigError;

/// A set of local-time hour ranges such as `"06-18"`, `"22-07"` or
/// `"10-12,14-18"`. A single hour `"17"` means `17-18`.
///
/// A range whose start is not below its end wraps around midnight, so the
/// default `"0-0"` always allows running.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeWindow {
    raw: String,
    ranges: Vec<(f64, f64)>,
}

impl TimeWindow {
    pub fn always() -> Self {
        Self {
            raw: "0-0".to_string(),
            ranges: vec![(0.0, 0.0)],
        }
    }

    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let hour = |part: &str| -> Result<f64, ConfigError> {
            part.trim()
                .parse::<f64>()
                .map_err(|_| ConfigError::invalid("time-of-day", format!("bad hour {part:?} in {s:?}")))
        };

        let mut ranges = Vec::new();
        for interval in s.split(',') {
            let interval = interval.trim();
            match interval.split_once('-') {
                Some((start, end)) => ranges.push((hour(start)?, hour(end)?)),
                None => {
                    let start = hour(interval)?;
                    ranges.push((start, start + 1.0));
                }
            }
        }

        Ok(Self {
            raw: s.to_string(),
            ranges,
        })
    }

    /// Whether `hour` (fractional, 0 to 24) falls inside the window.
    pub fn contains(&self, hour: f64) -> bool {
        self.ranges.iter().any(|&(start, end)| {
            if start < end {
                start <= hour && hour <= end
            } else {
                hour <= end || start <= hour
            }
        })
    }

    /// Whether the current local time falls inside the window.
    pub fn is_open_now(&self) -> bool {
        use chrono::Timelike;
        let now = chrono::Local::now();
        self.contains(now.hour() as f64 + now.minute() as f64 / 60.0)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl Default for TimeWindow {
    fn default() -> Self {
        Self::always()
    }
}

impl FromStr for TimeWindow {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Serialize for TimeWindow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}
