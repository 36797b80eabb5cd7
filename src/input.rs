//! # Input Configuration Module
//!
//! This module defines the parameters of a pipeline run and their loading from
//! JSON or YAML files.
//!
//! ## Configuration Structure
//!
//! A configuration specifies:
//! - **bounding_box**: Region of interest in degrees (west, south, east, north)
//! - **time_range**: Inclusive start and end timestamps (`YYYY-MM-DD HH:MM:SS`)
//! - **directory**: Local directory receiving the downloaded granules
//! - **dataset**: Catalog short name, `NLDAS_FORA0125_H` by default
//!
//! Everything else (endpoints, link access class, worker count) has defaults.
//!
//! ## Example Usage
//!
//! ```rust
//! use nldas2parquet::input::PipelineConfig;
//!
//! let json = r#"
//! {
//!   "bounding_box": { "west": -74.236732, "south": 42.044819, "east": -73.236732, "north": 43.044819 },
//!   "time_range": { "start": "2023-12-20 00:00:00", "end": "2023-12-21 00:00:00" },
//!   "directory": "content/files"
//! }"#;
//! let config = PipelineConfig::from_json(json)?;
//! assert_eq!(config.dataset, "NLDAS_FORA0125_H");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::error::{PipelineError, PipelineResult};
use chrono::{NaiveDate, NaiveDateTime};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Catalog short name of the NLDAS-2 hourly primary forcing product
pub const DEFAULT_DATASET: &str = "NLDAS_FORA0125_H";
/// Extension of the granule files kept by the link resolver
pub const NETCDF_EXTENSION: &str = ".nc";
/// Timestamp layout used by the catalog query and configuration files
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub const DEFAULT_CMR_URL: &str = "https://cmr.earthdata.nasa.gov";
pub const DEFAULT_URS_URL: &str = "https://urs.earthdata.nasa.gov";
pub const DEFAULT_S3_CREDENTIALS_URL: &str = "https://data.gesdisc.earthdata.nasa.gov/s3credentials";

/// Rectangular geographic filter in degrees.
///
/// The corners may be given in any order; every consumer goes through
/// [`BoundingBox::normalized`] before comparing coordinates.
///
/// # Examples
///
/// ```rust
/// use nldas2parquet::input::BoundingBox;
///
/// let reversed = BoundingBox::new(-89.495, 30.712, -90.258, 30.139);
/// let canonical = BoundingBox::new(-90.258, 30.139, -89.495, 30.712);
/// assert_eq!(reversed.normalized(), canonical.normalized());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl BoundingBox {
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        BoundingBox {
            west,
            south,
            east,
            north,
        }
    }

    /// Returns the same box with `west <= east` and `south <= north`.
    pub fn normalized(&self) -> Self {
        BoundingBox {
            west: self.west.min(self.east),
            south: self.south.min(self.north),
            east: self.west.max(self.east),
            north: self.south.max(self.north),
        }
    }

    /// `(lon_min, lon_max)` of the normalized box
    pub fn lon_range(&self) -> (f64, f64) {
        let b = self.normalized();
        (b.west, b.east)
    }

    /// `(lat_min, lat_max)` of the normalized box
    pub fn lat_range(&self) -> (f64, f64) {
        let b = self.normalized();
        (b.south, b.north)
    }

    /// Strict containment: points on an edge are outside.
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        let (lon_min, lon_max) = self.lon_range();
        let (lat_min, lat_max) = self.lat_range();
        lon > lon_min && lon < lon_max && lat > lat_min && lat < lat_max
    }

    /// Formats the normalized box as the catalog's `west,south,east,north` parameter.
    pub fn to_query_string(&self) -> String {
        let b = self.normalized();
        format!("{},{},{},{}", b.west, b.south, b.east, b.north)
    }

    pub fn validate(&self) -> PipelineResult<()> {
        let values = [self.west, self.south, self.east, self.north];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(PipelineError::Config(format!(
                "Bounding box values must be finite: {}",
                self
            )));
        }
        for lat in [self.south, self.north] {
            if !(-90.0..=90.0).contains(&lat) {
                return Err(PipelineError::Config(format!(
                    "Latitude {} is outside [-90, 90]",
                    lat
                )));
            }
        }
        for lon in [self.west, self.east] {
            if !(-180.0..=180.0).contains(&lon) {
                return Err(PipelineError::Config(format!(
                    "Longitude {} is outside [-180, 180]",
                    lon
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.west, self.south, self.east, self.north)
    }
}

impl FromStr for BoundingBox {
    type Err = String;

    /// Parses `west,south,east,north`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let values: Result<Vec<f64>, _> = s.split(',').map(|v| v.trim().parse::<f64>()).collect();
        let values = values.map_err(|_| format!("Invalid number in bounding box '{}'", s))?;
        if values.len() != 4 {
            return Err("Bounding box must be in format 'west,south,east,north'".to_string());
        }
        Ok(BoundingBox::new(values[0], values[1], values[2], values[3]))
    }
}

/// Inclusive time window of the catalog search, at second precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    #[serde(with = "timestamp_format")]
    pub start: NaiveDateTime,
    #[serde(with = "timestamp_format")]
    pub end: NaiveDateTime,
}

impl TimeRange {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        TimeRange { start, end }
    }

    pub fn parse(start: &str, end: &str) -> Result<Self, String> {
        Ok(TimeRange {
            start: parse_timestamp(start)?,
            end: parse_timestamp(end)?,
        })
    }

    /// Formats the range as the catalog's ISO 8601 `start,end` parameter.
    pub fn to_query_string(&self) -> String {
        format!(
            "{},{}",
            self.start.format("%Y-%m-%dT%H:%M:%SZ"),
            self.end.format("%Y-%m-%dT%H:%M:%SZ")
        )
    }

    pub fn validate(&self) -> PipelineResult<()> {
        if self.start > self.end {
            return Err(PipelineError::Config(format!(
                "Start time {} is after end time {}",
                self.start.format(TIMESTAMP_FORMAT),
                self.end.format(TIMESTAMP_FORMAT)
            )));
        }
        Ok(())
    }
}

/// Parses `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DDTHH:MM:SS` or a bare `YYYY-MM-DD`
/// (midnight).
pub fn parse_timestamp(s: &str) -> Result<NaiveDateTime, String> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .or_else(|_| NaiveDateTime::parse_from_str(s.trim_end_matches('Z'), "%Y-%m-%dT%H:%M:%S"))
        .or_else(|_| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d").map(|d| d.and_hms_opt(0, 0, 0).unwrap_or_default())
        })
        .map_err(|_| {
            format!(
                "Invalid timestamp '{}', expected 'YYYY-MM-DD HH:MM:SS'",
                s
            )
        })
}

mod timestamp_format {
    use super::{parse_timestamp, TIMESTAMP_FORMAT};
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.format(TIMESTAMP_FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse_timestamp(&s).map_err(serde::de::Error::custom)
    }
}

/// Which class of download link the resolver keeps.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkAccess {
    /// Direct-access `s3://` links, valid from inside the archive's cloud region
    #[default]
    Internal,
    /// Public `https://` links
    External,
}

impl fmt::Display for LinkAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkAccess::Internal => write!(f, "internal"),
            LinkAccess::External => write!(f, "external"),
        }
    }
}

/// Parameters of one pipeline run.
///
/// # Examples
///
/// ```rust
/// use nldas2parquet::input::{BoundingBox, PipelineConfig, TimeRange};
///
/// let config = PipelineConfig::new(
///     BoundingBox::new(-74.236732, 42.044819, -73.236732, 43.044819),
///     TimeRange::parse("2023-12-20 00:00:00", "2023-12-21 00:00:00").unwrap(),
///     "content/files",
/// );
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Region of interest
    pub bounding_box: BoundingBox,
    /// Inclusive search window
    pub time_range: TimeRange,
    /// Directory holding the downloaded granules
    pub directory: PathBuf,
    /// Catalog short name
    #[serde(default = "default_dataset")]
    pub dataset: String,
    /// Restrict the search to cloud-hosted granules
    #[serde(default = "default_true")]
    pub cloud_hosted: bool,
    /// Link class handed to the downloader
    #[serde(default)]
    pub access: LinkAccess,
    /// File extension kept by the link resolver and the directory scan
    #[serde(default = "default_extension")]
    pub extension: String,
    /// Upper bound on granules; `None` returns every match
    #[serde(default)]
    pub max_granules: Option<usize>,
    /// Size of the per-file filter pool
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Concurrent downloads
    #[serde(default = "default_download_concurrency")]
    pub download_concurrency: usize,
    #[serde(default = "default_cmr_url")]
    pub cmr_url: String,
    #[serde(default = "default_urs_url")]
    pub urs_url: String,
    #[serde(default = "default_s3_credentials_url")]
    pub s3_credentials_url: String,
}

fn default_dataset() -> String {
    DEFAULT_DATASET.to_string()
}

fn default_true() -> bool {
    true
}

fn default_extension() -> String {
    NETCDF_EXTENSION.to_string()
}

/// Host parallelism, falling back to a single worker.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn default_download_concurrency() -> usize {
    8
}

fn default_cmr_url() -> String {
    DEFAULT_CMR_URL.to_string()
}

fn default_urs_url() -> String {
    DEFAULT_URS_URL.to_string()
}

fn default_s3_credentials_url() -> String {
    DEFAULT_S3_CREDENTIALS_URL.to_string()
}

impl PipelineConfig {
    pub fn new(
        bounding_box: BoundingBox,
        time_range: TimeRange,
        directory: impl Into<PathBuf>,
    ) -> Self {
        PipelineConfig {
            bounding_box,
            time_range,
            directory: directory.into(),
            dataset: default_dataset(),
            cloud_hosted: true,
            access: LinkAccess::default(),
            extension: default_extension(),
            max_granules: None,
            workers: default_workers(),
            download_concurrency: default_download_concurrency(),
            cmr_url: default_cmr_url(),
            urs_url: default_urs_url(),
            s3_credentials_url: default_s3_credentials_url(),
        }
    }

    /// St. Tammany Parish, first half of 2024: the query run when no parameters are given.
    pub fn baseline() -> Self {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap_or_default();
        let end = NaiveDate::from_ymd_opt(2024, 7, 1)
            .and_then(|d| d.and_hms_opt(23, 59, 59))
            .unwrap_or_default();
        PipelineConfig::new(
            BoundingBox::new(-90.258, 30.139, -89.495, 30.712),
            TimeRange::new(start, end),
            "nc_files",
        )
    }

    /// Loads a configuration from a JSON or YAML file.
    ///
    /// Files ending in `.yaml` or `.yml` are parsed as YAML, everything else as JSON.
    pub fn from_file<P: AsRef<Path>>(path: P) -> PipelineResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        if is_yaml {
            Self::from_yaml(&content)
        } else {
            Self::from_json(&content)
        }
    }

    pub fn from_json(json_str: &str) -> PipelineResult<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| PipelineError::Config(format!("Invalid JSON configuration: {}", e)))
    }

    pub fn from_yaml(yaml_str: &str) -> PipelineResult<Self> {
        serde_yaml::from_str(yaml_str)
            .map_err(|e| PipelineError::Config(format!("Invalid YAML configuration: {}", e)))
    }

    pub fn to_json(&self) -> PipelineResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| PipelineError::Config(e.to_string()))
    }

    pub fn to_yaml(&self) -> PipelineResult<String> {
        serde_yaml::to_string(self).map_err(|e| PipelineError::Config(e.to_string()))
    }

    pub fn validate(&self) -> PipelineResult<()> {
        self.bounding_box.validate()?;
        self.time_range.validate()?;
        if self.dataset.trim().is_empty() {
            return Err(PipelineError::Config("Dataset short name cannot be empty".to_string()));
        }
        if self.extension.trim().is_empty() {
            return Err(PipelineError::Config("File extension cannot be empty".to_string()));
        }
        if self.workers == 0 {
            return Err(PipelineError::Config("Worker count must be positive".to_string()));
        }
        if self.download_concurrency == 0 {
            return Err(PipelineError::Config(
                "Download concurrency must be positive".to_string(),
            ));
        }
        if self.max_granules == Some(0) {
            return Err(PipelineError::Config("max_granules must be positive".to_string()));
        }
        Ok(())
    }
}
