//! # CF Time Decoding
//!
//! Converts numeric time coordinates carrying a CF `units` attribute such as
//! `hours since 1979-01-01 00:00:00` into epoch milliseconds, the physical
//! representation of a polars `Datetime(Milliseconds)` column. A time variable
//! without a `units` attribute is read as seconds since the Unix epoch.

use chrono::{NaiveDate, NaiveDateTime};
use std::str::FromStr;

/// Step of a CF time axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Days,
    Hours,
    Minutes,
    Seconds,
    Milliseconds,
}

impl TimeUnit {
    pub fn millis(&self) -> f64 {
        match self {
            TimeUnit::Days => 86_400_000.0,
            TimeUnit::Hours => 3_600_000.0,
            TimeUnit::Minutes => 60_000.0,
            TimeUnit::Seconds => 1_000.0,
            TimeUnit::Milliseconds => 1.0,
        }
    }
}

impl FromStr for TimeUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "days" | "day" | "d" => Ok(TimeUnit::Days),
            "hours" | "hour" | "hrs" | "hr" | "h" => Ok(TimeUnit::Hours),
            "minutes" | "minute" | "mins" | "min" => Ok(TimeUnit::Minutes),
            "seconds" | "second" | "secs" | "sec" | "s" => Ok(TimeUnit::Seconds),
            "milliseconds" | "millisecond" | "msecs" | "msec" | "ms" => {
                Ok(TimeUnit::Milliseconds)
            }
            other => Err(format!("Unsupported time unit '{}'", other)),
        }
    }
}

/// Parsed `<unit> since <reference>` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CfTimeUnits {
    pub unit: TimeUnit,
    pub reference: NaiveDateTime,
}

impl CfTimeUnits {
    /// Seconds since 1970-01-01, assumed when a time variable has no units.
    pub fn unix_seconds() -> Self {
        CfTimeUnits {
            unit: TimeUnit::Seconds,
            reference: NaiveDateTime::default(),
        }
    }

    /// Milliseconds since the Unix epoch for one encoded value.
    pub fn to_epoch_millis(&self, value: f64) -> Option<i64> {
        if !value.is_finite() {
            return None;
        }
        let offset = (value * self.unit.millis()).round();
        let base = self.reference.and_utc().timestamp_millis();
        if offset.abs() > i64::MAX as f64 / 2.0 {
            return None;
        }
        base.checked_add(offset as i64)
    }

    pub fn decode(&self, values: &[f64]) -> Vec<Option<i64>> {
        values.iter().map(|v| self.to_epoch_millis(*v)).collect()
    }
}

impl FromStr for CfTimeUnits {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (unit, reference) = s
            .split_once(" since ")
            .ok_or_else(|| format!("Time units '{}' lack a 'since' clause", s))?;
        Ok(CfTimeUnits {
            unit: unit.parse()?,
            reference: parse_reference(reference)
                .ok_or_else(|| format!("Invalid reference date in '{}'", s))?,
        })
    }
}

const REFERENCE_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

fn parse_reference(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    let s = s
        .strip_suffix("UTC")
        .or_else(|| s.strip_suffix("+00:00"))
        .or_else(|| s.strip_suffix("+0000"))
        .or_else(|| s.strip_suffix('Z'))
        .unwrap_or(s)
        .trim();

    REFERENCE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Decodes a time axis; `None` when the units are present but not understood.
pub fn decode_time_axis(units: Option<&str>, values: &[f64]) -> Option<Vec<Option<i64>>> {
    let units = match units {
        Some(text) => text.parse::<CfTimeUnits>().ok()?,
        None => CfTimeUnits::unix_seconds(),
    };
    Some(units.decode(values))
}
