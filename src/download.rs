//! # Granule Downloader
//!
//! Fetches resolved links into a local directory. HTTPS links are streamed
//! with the session's bearer token; `s3://` links are read through the S3
//! backend using temporary credentials issued by the archive, requested once
//! on first use.
//!
//! Files already present under their final name are skipped, as are links
//! whose file name repeats an earlier link in the batch. Bytes are
//! written to a hidden temp file in the target directory and renamed into
//! place, so an interrupted transfer never leaves a truncated granule behind.
//! Failed links are logged and counted; they never abort the batch.

use crate::auth::EarthdataSession;
use crate::error::{PipelineError, PipelineResult};
use crate::links::link_file_name;
use crate::storage::{S3Storage, StorageBackend, StorageFactory};
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use std::collections::HashSet;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tokio::sync::OnceCell;

/// Per-link outcome counts of one batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DownloadReport {
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl DownloadReport {
    pub fn total(&self) -> usize {
        self.downloaded + self.skipped + self.failed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Downloaded,
    Skipped,
    Failed,
}

pub struct Downloader {
    session: EarthdataSession,
    max_concurrent: usize,
    s3_credentials_url: String,
    s3: OnceCell<S3Storage>,
    show_progress: bool,
}

impl Downloader {
    pub fn new(session: &EarthdataSession, max_concurrent: usize, s3_credentials_url: &str) -> Self {
        Downloader {
            session: session.clone(),
            max_concurrent: max_concurrent.max(1),
            s3_credentials_url: s3_credentials_url.to_string(),
            s3: OnceCell::new(),
            show_progress: true,
        }
    }

    /// Enables or disables the terminal progress bar.
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Downloads every link into `dir`, creating it if needed.
    pub async fn download_all(&self, links: &[String], dir: &Path) -> PipelineResult<DownloadReport> {
        tokio::fs::create_dir_all(dir).await?;
        info!(
            "Downloading {} granules into {} ({} concurrent)",
            links.len(),
            dir.display(),
            self.max_concurrent
        );

        let (unique, duplicates) = unique_by_file_name(links);
        let progress = self.progress_bar(unique.len());
        let outcomes: Vec<Outcome> = stream::iter(unique)
            .map(|link| {
                let progress = &progress;
                async move {
                    let outcome = match self.download_one(link, dir).await {
                        Ok(Some(path)) => {
                            debug!("Downloaded {} -> {}", link, path.display());
                            Outcome::Downloaded
                        }
                        Ok(None) => Outcome::Skipped,
                        Err(e) => {
                            warn!("Failed to download {}: {}", link, e);
                            Outcome::Failed
                        }
                    };
                    progress.inc(1);
                    outcome
                }
            })
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;
        progress.finish_and_clear();

        let mut report = DownloadReport {
            skipped: duplicates,
            ..DownloadReport::default()
        };
        for outcome in outcomes {
            match outcome {
                Outcome::Downloaded => report.downloaded += 1,
                Outcome::Skipped => report.skipped += 1,
                Outcome::Failed => report.failed += 1,
            }
        }
        info!(
            "Downloads finished: {} new, {} already present, {} failed",
            report.downloaded, report.skipped, report.failed
        );
        Ok(report)
    }

    /// Returns the written path, or `None` when the file was already present.
    async fn download_one(&self, link: &str, dir: &Path) -> PipelineResult<Option<PathBuf>> {
        let name = link_file_name(link).ok_or_else(|| {
            PipelineError::Config(format!("Cannot derive a file name from link '{}'", link))
        })?;
        let target = dir.join(name);
        if tokio::fs::try_exists(&target).await? {
            debug!("Skipping {}, already present", target.display());
            return Ok(None);
        }

        let temp = tempfile::Builder::new()
            .prefix(".")
            .suffix(".part")
            .tempfile_in(dir)?;

        if StorageFactory::is_s3_path(link) {
            self.s3_storage().await?.fetch_to(link, temp.path()).await?;
        } else {
            self.fetch_https(link, &temp).await?;
        }

        temp.persist(&target).map_err(|e| PipelineError::Io(e.error))?;
        Ok(Some(target))
    }

    async fn fetch_https(&self, link: &str, temp: &NamedTempFile) -> PipelineResult<()> {
        let response = self
            .session
            .authorized_get(link)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| PipelineError::http(link, e))?;

        let mut file = tokio::fs::File::from_std(temp.reopen()?);
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| PipelineError::http(link, e))?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }

    async fn s3_storage(&self) -> PipelineResult<&S3Storage> {
        self.s3
            .get_or_try_init(|| async {
                let credentials = self.session.s3_credentials(&self.s3_credentials_url).await?;
                debug!("Obtained temporary S3 credentials {:?}", credentials);
                Ok::<_, PipelineError>(S3Storage::from_temporary_credentials(&credentials))
            })
            .await
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if !self.show_progress || !std::io::stderr().is_terminal() {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} granules {msg}")
        {
            pb.set_style(style.progress_chars("##-"));
        }
        pb
    }
}

/// Keeps the first link per target file name. Links sharing a name would
/// race on the same file; the dropped ones are counted.
fn unique_by_file_name(links: &[String]) -> (Vec<&String>, usize) {
    let mut seen = HashSet::new();
    let mut duplicates = 0;
    let unique = links
        .iter()
        .filter(|link| match link_file_name(link) {
            Some(name) if !seen.insert(name.to_string()) => {
                debug!("Skipping {}, same file name as an earlier link", link);
                duplicates += 1;
                false
            }
            _ => true,
        })
        .collect();
    (unique, duplicates)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_existing_files_are_skipped() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let present = dir.path().join("A20240101.0000.020.nc");
        std::fs::write(&present, b"already here")?;

        let session = EarthdataSession::with_token("unused")?;
        let downloader = Downloader::new(&session, 2, "http://127.0.0.1:9/s3credentials")
            .with_progress(false);
        let links = vec!["https://127.0.0.1:9/data/A20240101.0000.020.nc".to_string()];

        let report = downloader.download_all(&links, dir.path()).await?;
        assert_eq!(
            report,
            DownloadReport {
                downloaded: 0,
                skipped: 1,
                failed: 0
            }
        );
        assert_eq!(std::fs::read(&present)?, b"already here");
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_links_are_counted_and_leave_no_files() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let target_dir = dir.path().join("nc_files");

        let session = EarthdataSession::with_token("unused")?;
        let downloader = Downloader::new(&session, 4, "http://127.0.0.1:9/s3credentials")
            .with_progress(false);
        let links = vec![
            "http://127.0.0.1:9/data/A.nc".to_string(),
            "http://127.0.0.1:9/data/".to_string(),
        ];

        let report = downloader.download_all(&links, &target_dir).await?;
        assert_eq!(report.failed, 2);
        assert_eq!(report.total(), 2);
        assert!(target_dir.is_dir());
        assert_eq!(std::fs::read_dir(&target_dir)?.count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_batch_creates_directory() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let target_dir = dir.path().join("a").join("b");
        let session = EarthdataSession::with_token("unused")?;
        let report = Downloader::new(&session, 1, "")
            .with_progress(false)
            .download_all(&[], &target_dir)
            .await?;
        assert_eq!(report, DownloadReport::default());
        assert!(target_dir.is_dir());
        Ok(())
    }

    #[test]
    fn test_unique_by_file_name_keeps_first() {
        let links = vec![
            "https://host/a/A20240101.0000.020.nc".to_string(),
            "s3://bucket/b/A20240101.0000.020.nc".to_string(),
            "https://host/a/A20240101.0100.020.nc".to_string(),
            "https://host/a/".to_string(),
        ];
        let (unique, duplicates) = unique_by_file_name(&links);
        assert_eq!(duplicates, 1);
        assert_eq!(unique, vec![&links[0], &links[2], &links[3]]);
    }

    #[tokio::test]
    async fn test_duplicate_names_download_once() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let session = EarthdataSession::with_token("unused")?;
        let downloader = Downloader::new(&session, 4, "http://127.0.0.1:9/s3credentials")
            .with_progress(false);
        let links = vec![
            "http://127.0.0.1:9/one/A20240101.0000.020.nc".to_string(),
            "http://127.0.0.1:9/two/A20240101.0000.020.nc".to_string(),
        ];

        let report = downloader.download_all(&links, dir.path()).await?;
        assert_eq!(
            report,
            DownloadReport {
                downloaded: 0,
                skipped: 1,
                failed: 1
            }
        );
        assert_eq!(report.total(), links.len());
        Ok(())
    }
}
