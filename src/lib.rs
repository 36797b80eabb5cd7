//! # nldas2parquet
//!
//! Fetches NLDAS-2 hourly forcing granules for a bounding box and time window,
//! keeps the grid cells strictly inside the box, and reduces them to one row
//! per hour: mean air temperature in Fahrenheit, mean convective rainfall
//! fraction and mean total precipitation.
//!
//! ## Pipeline
//!
//! 1. **Search** the catalog for granules of the dataset ([`catalog`])
//! 2. **Resolve** each granule to its NetCDF download links ([`links`])
//! 3. **Download** missing files into the working directory ([`download`])
//! 4. **Filter** every file in the directory on a bounded worker pool ([`worker`])
//! 5. **Aggregate** the filtered rows into hourly means ([`aggregate`])
//!
//! Steps 4 and 5 also run offline over a directory filled by an earlier run
//! ([`process_directory`]).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use nldas2parquet::auth::{Credentials, EarthdataSession};
//! use nldas2parquet::input::PipelineConfig;
//! use nldas2parquet::fetch_hourly_table;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PipelineConfig::baseline();
//! let session = EarthdataSession::login(&Credentials::discover()?, &config.urs_url).await?;
//! let hourly = fetch_hourly_table(&session, &config, false).await?;
//! println!("{}", hourly);
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration Example
//!
//! ```yaml
//! bounding_box: { west: -90.258, south: 30.139, east: -89.495, north: 30.712 }
//! time_range: { start: "2024-01-01 00:00:00", end: "2024-07-01 23:59:59" }
//! directory: nc_files
//! access: internal
//! ```

pub mod aggregate;
pub mod auth;
pub mod catalog;
pub mod cf_time;
pub mod cli;
pub mod download;
pub mod error;
pub mod extract;
pub mod filters;
pub mod input;
pub mod links;
pub mod log;
pub mod output;
pub mod postprocess;
pub mod storage;
pub mod worker;


use crate::aggregate::{concat_frames, hourly_means};
use crate::auth::EarthdataSession;
use crate::catalog::{CatalogClient, GranuleQuery};
use crate::download::{DownloadReport, Downloader};
use crate::error::PipelineResult;
use crate::input::PipelineConfig;
use crate::links::resolve_links;
use crate::worker::{filter_files, list_granule_files};
use ::log::info;
use polars::prelude::DataFrame;

/// Searches the catalog and resolves the matching granules to download links.
pub async fn search_links(
    session: &EarthdataSession,
    config: &PipelineConfig,
) -> PipelineResult<Vec<String>> {
    config.validate()?;
    let client = CatalogClient::new(session, &config.cmr_url);
    let granules = client.search(&GranuleQuery::from_config(config)).await?;
    let links = resolve_links(&granules, config.access, &config.extension);
    info!(
        "Resolved {} {} links from {} granules",
        links.len(),
        config.access,
        granules.len()
    );
    Ok(links)
}

/// Searches, resolves and downloads into `config.directory`.
pub async fn download_granules(
    session: &EarthdataSession,
    config: &PipelineConfig,
    show_progress: bool,
) -> PipelineResult<DownloadReport> {
    let links = search_links(session, config).await?;
    Downloader::new(session, config.download_concurrency, &config.s3_credentials_url)
        .with_progress(show_progress)
        .download_all(&links, &config.directory)
        .await
}

/// Runs the whole pipeline and returns the hourly means table.
///
/// Authentication and catalog failures abort the run. Failed downloads and
/// unreadable files only reduce the data that reaches the aggregation.
/// `show_progress` draws a download bar when stderr is a terminal.
pub async fn fetch_hourly_table(
    session: &EarthdataSession,
    config: &PipelineConfig,
    show_progress: bool,
) -> PipelineResult<DataFrame> {
    download_granules(session, config, show_progress).await?;
    process_directory(config).await
}

/// Runs the whole pipeline but stops before aggregation, returning every
/// filtered row.
pub async fn fetch_filtered_table(
    session: &EarthdataSession,
    config: &PipelineConfig,
    show_progress: bool,
) -> PipelineResult<DataFrame> {
    download_granules(session, config, show_progress).await?;
    filter_directory(config).await
}

/// Filters and aggregates the granules already in `config.directory`.
pub async fn process_directory(config: &PipelineConfig) -> PipelineResult<DataFrame> {
    hourly_means(filter_directory(config).await?)
}

/// Filters every granule in `config.directory` and concatenates the rows in
/// file-name order.
pub async fn filter_directory(config: &PipelineConfig) -> PipelineResult<DataFrame> {
    config.validate()?;
    let files = list_granule_files(&config.directory, &config.extension)?;
    let frames = filter_files(files, config.bounding_box, config.workers).await;
    concat_frames(frames)
}
