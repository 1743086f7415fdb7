//! Upload configuration

use crate::{BucketName, CoreError, ObjectKey, ObjectTarget, Result, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_PART_SIZE: u64 = 30 * 1024 * 1024;
pub const DEFAULT_CONCURRENCY: usize = 4;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 2000;
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;

/// Everything needed to upload one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UploadConfig {
    /// Size of every part except the last
    #[serde(default = "default_part_size")]
    pub part_size_bytes: u64,

    /// Maximum simultaneous part uploads
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Attempts per part before giving up
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// Per-attempt deadline for a single part upload
    #[serde(default)]
    pub part_timeout_ms: Option<u64>,

    pub source_path: PathBuf,

    pub bucket: String,

    /// Defaults to the file name of `source_path`
    #[serde(default)]
    pub key: Option<String>,
}

fn default_part_size() -> u64 {
    DEFAULT_PART_SIZE
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_backoff_base_ms() -> u64 {
    DEFAULT_BACKOFF_BASE_MS
}

fn default_backoff_max_ms() -> u64 {
    DEFAULT_BACKOFF_MAX_MS
}

impl UploadConfig {
    /// Configuration with default tuning for `source_path` into `bucket`
    pub fn new(source_path: impl Into<PathBuf>, bucket: impl Into<String>) -> Self {
        UploadConfig {
            part_size_bytes: DEFAULT_PART_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
            part_timeout_ms: None,
            source_path: source_path.into(),
            bucket: bucket.into(),
            key: None,
        }
    }

    /// Load a JSON configuration file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read(path.as_ref())?;
        let config: UploadConfig = serde_json::from_slice(&raw)?;
        Ok(config)
    }

    /// Check every tunable before any remote call is made
    pub fn validate(&self) -> Result<()> {
        if self.part_size_bytes == 0 {
            return Err(CoreError::invalid_config("part_size_bytes must be positive"));
        }
        if self.concurrency == 0 {
            return Err(CoreError::invalid_config("concurrency must be positive"));
        }
        if self.max_retries == 0 {
            return Err(CoreError::invalid_config("max_retries must be positive"));
        }
        if self.backoff_max_ms < self.backoff_base_ms {
            return Err(CoreError::invalid_config(format!(
                "backoff_max_ms ({}) is below backoff_base_ms ({})",
                self.backoff_max_ms, self.backoff_base_ms
            )));
        }
        if self.part_timeout_ms == Some(0) {
            return Err(CoreError::invalid_config("part_timeout_ms must be positive"));
        }
        self.target()?;
        Ok(())
    }

    /// Destination bucket and key
    pub fn target(&self) -> Result<ObjectTarget> {
        let bucket = BucketName::new(&self.bucket)?;
        let key = match &self.key {
            Some(key) => ObjectKey::new(key)?,
            None => {
                let name = self
                    .source_path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .ok_or_else(|| {
                        CoreError::invalid_config(format!(
                            "no key given and '{}' has no file name",
                            self.source_path.display()
                        ))
                    })?;
                ObjectKey::new(&name)?
            }
        };
        Ok(ObjectTarget::new(bucket, key))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.backoff_base_ms),
            Duration::from_millis(self.backoff_max_ms),
        )
    }

    pub fn part_timeout(&self) -> Option<Duration> {
        self.part_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_minimal_json() {
        let config: UploadConfig =
            serde_json::from_str(r#"{"source_path": "/data/big.iso", "bucket": "backups"}"#)
                .unwrap();

        assert_eq!(config.part_size_bytes, 30 * 1024 * 1024);
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.backoff_base_ms, 2000);
        assert_eq!(config.backoff_max_ms, 30_000);
        assert!(config.part_timeout_ms.is_none());
        assert!(config.validate().is_ok());

        let target = config.target().unwrap();
        assert_eq!(target.bucket.as_str(), "backups");
        assert_eq!(target.key.as_str(), "big.iso");
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let result: std::result::Result<UploadConfig, _> = serde_json::from_str(
            r#"{"source_path": "a", "bucket": "b", "part_size": 5}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_validation_failures() {
        let base = UploadConfig::new("/tmp/file.bin", "bucket");

        let mut config = base.clone();
        config.concurrency = 0;
        assert!(matches!(config.validate(), Err(CoreError::InvalidConfiguration(_))));

        let mut config = base.clone();
        config.part_size_bytes = 0;
        assert!(matches!(config.validate(), Err(CoreError::InvalidConfiguration(_))));

        let mut config = base.clone();
        config.backoff_base_ms = 500;
        config.backoff_max_ms = 100;
        assert!(matches!(config.validate(), Err(CoreError::InvalidConfiguration(_))));

        let mut config = base.clone();
        config.bucket = "has spaces".to_string();
        assert!(matches!(config.validate(), Err(CoreError::InvalidBucketName(_))));
    }

    #[test]
    fn test_explicit_key_wins() {
        let mut config = UploadConfig::new("/tmp/file.bin", "bucket");
        config.key = Some("archive/2024/file.bin".to_string());
        assert_eq!(config.target().unwrap().key.as_str(), "archive/2024/file.bin");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.json");
        std::fs::write(
            &path,
            r#"{"source_path": "x.bin", "bucket": "b", "concurrency": 8, "max_retries": 5}"#,
        )
        .unwrap();

        let config = UploadConfig::from_json_file(&path).unwrap();
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.retry_policy().max_attempts, 5);
    }
}
