//! # Table Output
//!
//! Persists the aggregated table as Parquet or CSV, chosen by file extension.
//! Tables are encoded to a temporary file first and stored through the
//! backend matching the destination, local or `s3://`.

use crate::error::{PipelineError, PipelineResult};
use crate::storage::{StorageBackend, StorageFactory};
use log::debug;
use polars::prelude::*;
use std::fs::File;
use std::path::Path;

/// On-disk table encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFormat {
    Parquet,
    Csv,
}

impl TableFormat {
    pub fn from_path(path: &str) -> PipelineResult<Self> {
        let extension = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match extension.as_deref() {
            Some("parquet") | Some("pq") => Ok(TableFormat::Parquet),
            Some("csv") => Ok(TableFormat::Csv),
            _ => Err(PipelineError::Config(format!(
                "Unsupported output format for '{}': use .parquet or .csv",
                path
            ))),
        }
    }

    fn suffix(&self) -> &'static str {
        match self {
            TableFormat::Parquet => ".parquet",
            TableFormat::Csv => ".csv",
        }
    }
}

fn write_local(df: &DataFrame, path: &Path, format: TableFormat) -> PipelineResult<()> {
    debug!("Writing DataFrame {:?} to {}", df.shape(), path.display());
    debug!("DataFrame schema:\n{:?}", df.schema());

    let file = File::create(path)?;
    let mut df = df.clone();
    match format {
        TableFormat::Parquet => {
            ParquetWriter::new(file).finish(&mut df)?;
        }
        TableFormat::Csv => {
            CsvWriter::new(file).include_header(true).finish(&mut df)?;
        }
    }
    Ok(())
}

/// Writes `df` to a local path or an `s3://` object.
///
/// The table is encoded into a temporary file and handed to the backend
/// picked for `output_path`, which creates missing local directories.
pub async fn write_table_async(df: &DataFrame, output_path: &str) -> PipelineResult<()> {
    let format = TableFormat::from_path(output_path)?;

    let temp_file = tempfile::Builder::new().suffix(format.suffix()).tempfile()?;
    write_local(df, temp_file.path(), format)?;

    let storage = StorageFactory::from_path(output_path).await;
    storage.put_from(output_path, temp_file.path()).await?;

    debug!("Stored table at {}", output_path);
    Ok(())
}
