//! # CLI Module
//!
//! Command-line interface for nldas2parquet:
//! - Argument parsing with clap
//! - Configuration file loading (JSON/YAML)
//! - Environment variable support with the NLDAS2PARQUET_ prefix
//! - Configuration merging: flags > environment > config file > baseline query

use crate::error::PipelineResult;
use crate::input::{parse_timestamp, BoundingBox, LinkAccess, PipelineConfig};
use chrono::NaiveDateTime;
use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::{Path, PathBuf};

/// Hourly NLDAS-2 forcing means for a region, from the Earthdata archive
#[derive(Parser, Debug)]
#[command(name = "nldas2parquet")]
#[command(about = "Aggregate NLDAS-2 hourly forcing data over a bounding box")]
#[command(version)]
#[command(long_about = "
nldas2parquet searches the Earthdata catalog for NLDAS-2 hourly primary forcing
granules, downloads them, keeps the grid cells strictly inside a bounding box and
reports hourly means of air temperature (Fahrenheit), convective rainfall fraction
and total precipitation.

Credentials are read from EARTHDATA_TOKEN, EARTHDATA_USERNAME/EARTHDATA_PASSWORD,
or the urs.earthdata.nasa.gov entry of ~/.netrc.

EXAMPLES:
  # Default query (St. Tammany Parish, first half of 2024), printed to stdout
  nldas2parquet fetch

  # Custom region and window, saved as Parquet
  nldas2parquet fetch --bbox=-74.236732,42.044819,-73.236732,43.044819 \\
    --start '2023-12-20 00:00:00' --end '2023-12-21 00:00:00' \\
    --dir content/files -o hourly.parquet

  # Re-aggregate a directory downloaded earlier
  nldas2parquet process content/files --bbox=-74.24,42.04,-73.24,43.04

  # List links only
  nldas2parquet search --access external --max-granules 5

  # Generate a configuration template
  nldas2parquet template --format yaml > query.yaml
")]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Quiet mode - suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Configuration file path (JSON or YAML)
    #[arg(short, long, global = true, env = "NLDAS2PARQUET_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Catalog query overrides shared by `fetch` and `search`
#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct QueryArgs {
    /// Bounding box: west,south,east,north (degrees)
    #[arg(long, value_parser = parse_bbox, allow_hyphen_values = true, env = "NLDAS2PARQUET_BBOX")]
    pub bbox: Option<BoundingBox>,

    /// Start of the time window: 'YYYY-MM-DD HH:MM:SS'
    #[arg(long, value_parser = parse_timestamp_arg, env = "NLDAS2PARQUET_START")]
    pub start: Option<NaiveDateTime>,

    /// End of the time window (inclusive): 'YYYY-MM-DD HH:MM:SS'
    #[arg(long, value_parser = parse_timestamp_arg, env = "NLDAS2PARQUET_END")]
    pub end: Option<NaiveDateTime>,

    /// Catalog short name of the dataset
    #[arg(long, env = "NLDAS2PARQUET_DATASET")]
    pub dataset: Option<String>,

    /// Link class to download: in-region S3 or public HTTPS
    #[arg(long, value_enum, env = "NLDAS2PARQUET_ACCESS")]
    pub access: Option<LinkAccess>,

    /// Stop after this many granules (default: all matches)
    #[arg(long, env = "NLDAS2PARQUET_MAX_GRANULES")]
    pub max_granules: Option<usize>,
}

impl QueryArgs {
    pub fn apply(&self, config: &mut PipelineConfig) {
        if let Some(bbox) = self.bbox {
            config.bounding_box = bbox;
        }
        if let Some(start) = self.start {
            config.time_range.start = start;
        }
        if let Some(end) = self.end {
            config.time_range.end = end;
        }
        if let Some(ref dataset) = self.dataset {
            config.dataset = dataset.clone();
        }
        if let Some(access) = self.access {
            config.access = access;
        }
        if let Some(max) = self.max_granules {
            config.max_granules = Some(max);
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Search, download, filter and aggregate
    #[command(long_about = "
Run the whole pipeline: catalog search, link resolution, download into the
working directory, per-file filtering and hourly aggregation.

Without arguments the default query is run and the table is printed to stdout.

EXAMPLES:
  nldas2parquet fetch
  nldas2parquet fetch --bbox=-90.258,30.139,-89.495,30.712 -o hourly.csv
  nldas2parquet --config query.yaml fetch --workers 4 --raw -o rows.parquet
")]
    Fetch {
        #[command(flatten)]
        query: QueryArgs,

        /// Directory receiving the granules
        #[arg(short, long, env = "NLDAS2PARQUET_DIR")]
        dir: Option<PathBuf>,

        /// Number of files filtered in parallel
        #[arg(short, long, env = "NLDAS2PARQUET_WORKERS")]
        workers: Option<usize>,

        /// Number of concurrent downloads
        #[arg(long, env = "NLDAS2PARQUET_DOWNLOAD_CONCURRENCY")]
        download_concurrency: Option<usize>,

        /// Output file (.parquet or .csv, local or s3://); prints to stdout when omitted
        #[arg(short, long, env = "NLDAS2PARQUET_OUTPUT")]
        output: Option<String>,

        /// Emit the filtered rows instead of hourly means
        #[arg(long)]
        raw: bool,
    },

    /// Filter and aggregate granules already on disk
    #[command(long_about = "
Run the filter and aggregation stages over a directory filled by an earlier
fetch, without contacting the archive.

EXAMPLES:
  nldas2parquet process nc_files
  nldas2parquet process content/files --bbox=-74.24,42.04,-73.24,43.04 -o hourly.parquet
")]
    Process {
        /// Directory holding the granules
        #[arg(value_name = "DIR", env = "NLDAS2PARQUET_DIR")]
        dir: Option<PathBuf>,

        /// Bounding box: west,south,east,north (degrees)
        #[arg(long, value_parser = parse_bbox, allow_hyphen_values = true, env = "NLDAS2PARQUET_BBOX")]
        bbox: Option<BoundingBox>,

        /// Number of files filtered in parallel
        #[arg(short, long, env = "NLDAS2PARQUET_WORKERS")]
        workers: Option<usize>,

        /// Output file (.parquet or .csv, local or s3://); prints to stdout when omitted
        #[arg(short, long, env = "NLDAS2PARQUET_OUTPUT")]
        output: Option<String>,

        /// Emit the filtered rows instead of hourly means
        #[arg(long)]
        raw: bool,
    },

    /// List the download links matching a query
    Search {
        #[command(flatten)]
        query: QueryArgs,

        /// Output format for the link list
        #[arg(long, value_enum, default_value_t = OutputFormat::Human)]
        format: OutputFormat,
    },

    /// Print a configuration template holding the default query
    Template {
        /// Output file path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Configuration format
        #[arg(long, value_enum, default_value_t = ConfigFormat::Json)]
        format: ConfigFormat,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,

        /// Output file path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// One link per line
    Human,
    /// JSON array
    Json,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigFormat {
    /// JSON configuration format
    Json,
    /// YAML configuration format
    Yaml,
}

impl ConfigFormat {
    pub fn render(&self, config: &PipelineConfig) -> PipelineResult<String> {
        match self {
            ConfigFormat::Json => config.to_json(),
            ConfigFormat::Yaml => config.to_yaml(),
        }
    }
}

/// Parses `west,south,east,north`
pub fn parse_bbox(s: &str) -> Result<BoundingBox, String> {
    s.parse()
}

fn parse_timestamp_arg(s: &str) -> Result<NaiveDateTime, String> {
    parse_timestamp(s)
}

/// Configuration file when given, the default query otherwise.
pub fn load_base_config(path: Option<&Path>) -> PipelineResult<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::from_file(path),
        None => Ok(PipelineConfig::baseline()),
    }
}

/// Overrides that apply to the filter and aggregation stages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOverrides {
    pub directory: Option<PathBuf>,
    pub workers: Option<usize>,
    pub download_concurrency: Option<usize>,
}

impl RunOverrides {
    pub fn apply(&self, config: &mut PipelineConfig) {
        if let Some(ref dir) = self.directory {
            config.directory = dir.clone();
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(n) = self.download_concurrency {
            config.download_concurrency = n;
        }
    }
}

/// Merges command-line values over the base configuration and validates the result.
pub fn resolve_config(
    base: PipelineConfig,
    query: &QueryArgs,
    overrides: &RunOverrides,
) -> PipelineResult<PipelineConfig> {
    let mut config = base;
    query.apply(&mut config);
    overrides.apply(&mut config);
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use std::sync::Mutex;

    // Global mutex to ensure environment variable tests run sequentially
    static ENV_TEST_MUTEX: Mutex<()> = Mutex::new(());

    const ENV_VARS: [&str; 5] = [
        "NLDAS2PARQUET_BBOX",
        "NLDAS2PARQUET_START",
        "NLDAS2PARQUET_WORKERS",
        "NLDAS2PARQUET_DIR",
        "NLDAS2PARQUET_CONFIG",
    ];

    #[test]
    fn test_parse_bbox() {
        let bbox = parse_bbox("-90.258,30.139,-89.495,30.712").unwrap();
        assert_eq!(bbox, BoundingBox::new(-90.258, 30.139, -89.495, 30.712));

        assert!(parse_bbox("-90.258,30.139,-89.495").is_err());
        assert!(parse_bbox("a,b,c,d").is_err());
        assert!(parse_bbox("1,2,3,4,5").is_err());
    }

    #[test]
    fn test_query_args_override_base() {
        let query = QueryArgs {
            bbox: Some(BoundingBox::new(-74.236732, 42.044819, -73.236732, 43.044819)),
            start: Some(parse_timestamp("2023-12-20 00:00:00").unwrap()),
            end: Some(parse_timestamp("2023-12-21 00:00:00").unwrap()),
            access: Some(LinkAccess::External),
            max_granules: Some(25),
            ..Default::default()
        };
        let overrides = RunOverrides {
            directory: Some(PathBuf::from("content/files")),
            workers: Some(3),
            ..Default::default()
        };

        let config = resolve_config(PipelineConfig::baseline(), &query, &overrides).unwrap();
        assert_eq!(config.bounding_box.west, -74.236732);
        assert_eq!(config.time_range.to_query_string(), "2023-12-20T00:00:00Z,2023-12-21T00:00:00Z");
        assert_eq!(config.access, LinkAccess::External);
        assert_eq!(config.max_granules, Some(25));
        assert_eq!(config.directory, PathBuf::from("content/files"));
        assert_eq!(config.workers, 3);
        assert_eq!(config.dataset, "NLDAS_FORA0125_H");
    }

    #[test]
    fn test_empty_overrides_keep_baseline() {
        let config =
            resolve_config(PipelineConfig::baseline(), &QueryArgs::default(), &RunOverrides::default())
                .unwrap();
        assert_eq!(config, PipelineConfig::baseline());
    }

    #[test]
    fn test_resolve_rejects_inverted_window() {
        let query = QueryArgs {
            start: Some(parse_timestamp("2024-02-01").unwrap()),
            end: Some(parse_timestamp("2024-01-01").unwrap()),
            ..Default::default()
        };
        assert!(matches!(
            resolve_config(PipelineConfig::baseline(), &query, &RunOverrides::default()),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn test_load_base_config_from_file() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("query.yaml");
        std::fs::write(
            &path,
            "bounding_box: { west: -74.2, south: 42.0, east: -73.2, north: 43.0 }\n\
             time_range: { start: \"2023-12-20 00:00:00\", end: \"2023-12-21 00:00:00\" }\n\
             directory: content/files\n\
             workers: 2\n",
        )?;

        let config = load_base_config(Some(&path))?;
        assert_eq!(config.directory, PathBuf::from("content/files"));
        assert_eq!(config.workers, 2);

        assert_eq!(load_base_config(None)?.directory, PathBuf::from("nc_files"));
        Ok(())
    }

    #[test]
    fn test_environment_variables_fill_missing_flags() {
        // Acquire mutex to ensure exclusive access to environment variables
        let _guard = ENV_TEST_MUTEX.lock().unwrap();

        let saved: Vec<(&str, Option<String>)> =
            ENV_VARS.iter().map(|k| (*k, std::env::var(k).ok())).collect();

        unsafe {
            for key in ENV_VARS {
                std::env::remove_var(key);
            }
            std::env::set_var("NLDAS2PARQUET_BBOX", "-74.2,42.0,-73.2,43.0");
            std::env::set_var("NLDAS2PARQUET_START", "2023-12-20 00:00:00");
            std::env::set_var("NLDAS2PARQUET_WORKERS", "6");
        }

        let cli = Cli::try_parse_from(["nldas2parquet", "fetch", "--workers", "2"]).unwrap();

        unsafe {
            for key in ENV_VARS {
                std::env::remove_var(key);
            }
            for (key, value) in &saved {
                if let Some(value) = value {
                    std::env::set_var(key, value);
                }
            }
        }

        match cli.command {
            Commands::Fetch { query, workers, .. } => {
                assert_eq!(query.bbox, Some(BoundingBox::new(-74.2, 42.0, -73.2, 43.0)));
                assert_eq!(query.start, Some(parse_timestamp("2023-12-20 00:00:00").unwrap()));
                assert_eq!(query.end, None);
                // Flag wins over the environment
                assert_eq!(workers, Some(2));
            }
            other => panic!("Expected Fetch command, got {:?}", other),
        }
    }

    #[test]
    fn test_config_format_render() {
        let config = PipelineConfig::baseline();
        let json = ConfigFormat::Json.render(&config).unwrap();
        assert!(json.contains("\"directory\": \"nc_files\""));
        let yaml = ConfigFormat::Yaml.render(&config).unwrap();
        assert!(yaml.contains("directory: nc_files"));
    }
}
