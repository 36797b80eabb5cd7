//! # Filter Worker Pool
//!
//! Runs the per-file filter over a directory of granules. Each file is read on
//! the blocking thread pool; at most `workers` files are in flight, and results
//! come back in the order the files were submitted.
//!
//! A file that cannot be read contributes an empty table: the failure is
//! logged with the file path and the remaining files are still processed.

use crate::error::PipelineResult;
use crate::extract::filter_granule_file;
use crate::input::BoundingBox;
use futures::stream::{self, StreamExt};
use log::{debug, error, info};
use polars::prelude::DataFrame;
use std::fs;
use std::path::{Path, PathBuf};

/// Files directly inside `dir` whose names end with `extension`, sorted by name.
pub fn list_granule_files(dir: &Path, extension: &str) -> PipelineResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let matches = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.ends_with(extension));
        if matches && entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    debug!("Found {} '{}' files in {}", files.len(), extension, dir.display());
    Ok(files)
}

/// Filters every file and returns one table per input path, in input order.
pub async fn filter_files(paths: Vec<PathBuf>, bbox: BoundingBox, workers: usize) -> Vec<DataFrame> {
    let total = paths.len();
    info!("Filtering {} files with {} workers", total, workers.max(1));

    let frames: Vec<DataFrame> = stream::iter(paths)
        .map(|path| async move {
            let task_path = path.clone();
            let joined =
                tokio::task::spawn_blocking(move || filter_granule_file(&task_path, &bbox)).await;
            match joined {
                Ok(Ok(df)) => df,
                Ok(Err(e)) => {
                    error!("Error processing file {}: {}", path.display(), e);
                    DataFrame::empty()
                }
                Err(e) => {
                    error!("Worker for {} did not complete: {}", path.display(), e);
                    DataFrame::empty()
                }
            }
        })
        .buffered(workers.max(1))
        .collect()
        .await;

    let contributing = frames.iter().filter(|df| df.height() > 0).count();
    info!("{} of {} files contributed rows", contributing, total);
    frames
}
