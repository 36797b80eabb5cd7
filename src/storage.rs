//! # Storage Abstraction Module
//!
//! Unified read/write access to local files and S3 objects. Granules linked
//! through direct access live in the archive's bucket and are read with the
//! temporary credentials the archive issues; output tables may be written to
//! any bucket reachable with the ambient AWS configuration.
//!
//! ## Path Patterns
//!
//! - **S3 paths**: `s3://bucket-name/path/to/file.nc`
//! - **Local paths**: `/absolute/path/to/file.nc` or `relative/path/to/file.nc`

use crate::auth::TemporaryS3Credentials;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::primitives::ByteStream;
use log::debug;
use std::path::Path;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Region hosting the archive's cloud collections
pub const ARCHIVE_REGION: &str = "us-west-2";

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("S3 download of '{path}' failed: {source}")]
    Get {
        path: String,
        #[source]
        source: aws_sdk_s3::error::SdkError<aws_sdk_s3::operation::get_object::GetObjectError>,
    },

    #[error("S3 upload to '{path}' failed: {source}")]
    Put {
        path: String,
        #[source]
        source: aws_sdk_s3::error::SdkError<aws_sdk_s3::operation::put_object::PutObjectError>,
    },

    #[error("Object body of '{path}' interrupted: {message}")]
    Body { path: String, message: String },

    #[error("Invalid S3 path format: {0}")]
    InvalidS3Path(String),

    #[error("Object not found: {0}")]
    NotFound(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Moves whole objects between a backend location and the local disk.
#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync {
    /// Copies the object at `path` into the local file `dest`, returning the byte count.
    async fn fetch_to(&self, path: &str, dest: &Path) -> StorageResult<u64>;

    /// Stores the local file `source` at `path`, replacing what is there.
    async fn put_from(&self, path: &str, source: &Path) -> StorageResult<()>;
}

/// Local filesystem backend
#[derive(Debug, Clone)]
pub struct LocalStorage;

#[async_trait::async_trait]
impl StorageBackend for LocalStorage {
    async fn fetch_to(&self, path: &str, dest: &Path) -> StorageResult<u64> {
        fs::copy(path, dest).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound(path.to_string()),
            _ => StorageError::Io(e),
        })
    }

    async fn put_from(&self, path: &str, source: &Path) -> StorageResult<()> {
        if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        fs::copy(source, path).await?;
        Ok(())
    }
}

/// Amazon S3 backend
#[derive(Debug, Clone)]
pub struct S3Storage {
    client: S3Client,
}

impl S3Storage {
    /// S3 client using the ambient AWS configuration (environment, profile, IAM role).
    pub async fn new() -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest()).load().await;
        S3Storage {
            client: S3Client::new(&config),
        }
    }

    /// S3 client for the archive's direct-access bucket, authenticated with
    /// the temporary credentials issued by the archive.
    pub fn from_temporary_credentials(credentials: &TemporaryS3Credentials) -> Self {
        let provider = aws_credential_types::Credentials::new(
            credentials.access_key_id.clone(),
            credentials.secret_access_key.clone(),
            Some(credentials.session_token.clone()),
            None,
            "earthdata-s3credentials",
        );
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(ARCHIVE_REGION))
            .credentials_provider(provider)
            .build();

        S3Storage {
            client: S3Client::from_conf(config),
        }
    }

    /// Splits `s3://bucket/key` into `(bucket, key)`.
    pub fn parse_s3_path(s3_path: &str) -> StorageResult<(String, String)> {
        let Some(rest) = s3_path.strip_prefix("s3://") else {
            return Err(StorageError::InvalidS3Path(format!(
                "expected an s3:// URL, got '{}'",
                s3_path
            )));
        };

        match rest.split_once('/') {
            Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => {
                Ok((bucket.to_string(), key.to_string()))
            }
            _ => Err(StorageError::InvalidS3Path(format!(
                "expected 's3://bucket/key', got '{}'",
                s3_path
            ))),
        }
    }
}

#[async_trait::async_trait]
impl StorageBackend for S3Storage {
    async fn fetch_to(&self, path: &str, dest: &Path) -> StorageResult<u64> {
        let (bucket, key) = Self::parse_s3_path(path)?;

        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| match &e {
                aws_sdk_s3::error::SdkError::ServiceError(service_err)
                    if service_err.err().is_no_such_key() =>
                {
                    StorageError::NotFound(path.to_string())
                }
                _ => StorageError::Get {
                    path: path.to_string(),
                    source: e,
                },
            })?;

        let mut file = fs::File::create(dest).await?;
        let mut body = response.body;
        let mut written = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| StorageError::Body {
                path: path.to_string(),
                message: e.to_string(),
            })?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        debug!("Fetched {} bytes from {}", written, path);
        Ok(written)
    }

    async fn put_from(&self, path: &str, source: &Path) -> StorageResult<()> {
        let (bucket, key) = Self::parse_s3_path(path)?;
        let body = ByteStream::from_path(source)
            .await
            .map_err(|e| StorageError::Body {
                path: source.display().to_string(),
                message: e.to_string(),
            })?;

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| StorageError::Put {
                path: path.to_string(),
                source: e,
            })?;
        Ok(())
    }
}

#[derive(Debug)]
pub enum Storage {
    Local(LocalStorage),
    S3(S3Storage),
}

#[async_trait::async_trait]
impl StorageBackend for Storage {
    async fn fetch_to(&self, path: &str, dest: &Path) -> StorageResult<u64> {
        match self {
            Storage::Local(storage) => storage.fetch_to(path, dest).await,
            Storage::S3(storage) => storage.fetch_to(path, dest).await,
        }
    }

    async fn put_from(&self, path: &str, source: &Path) -> StorageResult<()> {
        match self {
            Storage::Local(storage) => storage.put_from(path, source).await,
            Storage::S3(storage) => storage.put_from(path, source).await,
        }
    }
}

/// Picks a backend from the path: `s3://` paths use S3, everything else is local.
pub struct StorageFactory;

impl StorageFactory {
    pub async fn from_path(path: &str) -> Storage {
        if Self::is_s3_path(path) {
            Storage::S3(S3Storage::new().await)
        } else {
            Storage::Local(LocalStorage)
        }
    }

    pub fn is_s3_path(path: &str) -> bool {
        path.starts_with("s3://")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_local_put_then_fetch() -> Result<(), Box<dyn std::error::Error>> {
        let storage = LocalStorage;
        let temp_dir = TempDir::new()?;
        let source = temp_dir.path().join("hourly.parquet");
        std::fs::write(&source, b"PAR1 fake table")?;

        let stored = temp_dir.path().join("nested").join("copy.parquet");
        let stored_str = stored.to_str().unwrap();
        storage.put_from(stored_str, &source).await?;

        let fetched = temp_dir.path().join("fetched.parquet");
        let bytes = storage.fetch_to(stored_str, &fetched).await?;
        assert_eq!(bytes, 15);
        assert_eq!(std::fs::read(&fetched)?, b"PAR1 fake table");

        Ok(())
    }

    #[tokio::test]
    async fn test_local_fetch_not_found() -> Result<(), Box<dyn std::error::Error>> {
        let temp_dir = TempDir::new()?;
        let result = LocalStorage
            .fetch_to("/nonexistent/path/file.nc", &temp_dir.path().join("file.nc"))
            .await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
        Ok(())
    }

    #[test]
    fn test_s3_path_parsing() {
        let (bucket, key) = S3Storage::parse_s3_path(
            "s3://gesdisc-cumulus-prod-protected/NLDAS/NLDAS_FORA0125_H.2.0/2024/001/file.nc",
        )
        .unwrap();
        assert_eq!(bucket, "gesdisc-cumulus-prod-protected");
        assert_eq!(key, "NLDAS/NLDAS_FORA0125_H.2.0/2024/001/file.nc");

        assert!(S3Storage::parse_s3_path("https://bucket/file.nc").is_err());
        assert!(S3Storage::parse_s3_path("s3://").is_err());
        assert!(S3Storage::parse_s3_path("s3://bucket").is_err());
        assert!(S3Storage::parse_s3_path("s3:///file.nc").is_err());
    }

    #[tokio::test]
    async fn test_storage_factory_path_detection() {
        assert!(StorageFactory::is_s3_path("s3://my-bucket/hourly.parquet"));
        assert!(!StorageFactory::is_s3_path("/local/path/hourly.parquet"));
        assert!(!StorageFactory::is_s3_path("relative/hourly.csv"));

        let local_storage = StorageFactory::from_path("/local/path/hourly.parquet").await;
        assert!(matches!(local_storage, Storage::Local(_)));
    }

    #[test]
    fn test_s3_storage_from_temporary_credentials() {
        let credentials = TemporaryS3Credentials {
            access_key_id: "ASIA123".to_string(),
            secret_access_key: "secret".to_string(),
            session_token: "session".to_string(),
            expiration: None,
        };
        let storage = S3Storage::from_temporary_credentials(&credentials);
        let region = storage.client.config().region().map(|r| r.to_string());
        assert_eq!(region.as_deref(), Some(ARCHIVE_REGION));
    }
}
