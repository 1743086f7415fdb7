//! Local multipart object store on fjall

use fjall::{Config, Keyspace, PersistMode};
use parcel_core::BucketName;
use std::path::Path;
use std::sync::Arc;

pub mod bucket;
pub mod error;
pub mod staging;
pub mod store;

pub use bucket::{Bucket, ObjectMetadata, PartEntry};
pub use error::StoreError;
pub use staging::{SessionRecord, StagedPart, Staging};
pub use store::LocalStore;

pub type Result<T> = std::result::Result<T, StoreError>;

/// Handle to the fjall keyspace shared by staging and buckets
#[derive(Clone)]
pub struct StoreEngine {
    keyspace: Arc<Keyspace>,
}

impl StoreEngine {
    /// Open or create a store at `path`
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let keyspace = Config::new(path).open().map_err(StoreError::storage)?;
        Ok(StoreEngine {
            keyspace: Arc::new(keyspace),
        })
    }

    /// Store in a fresh temporary directory
    #[cfg(any(test, feature = "test-utils"))]
    pub fn temp() -> Result<(Self, tempfile::TempDir)> {
        let temp_dir = tempfile::tempdir()?;
        let engine = Self::new(temp_dir.path())?;
        Ok((engine, temp_dir))
    }

    pub fn staging(&self) -> Result<Staging> {
        Staging::open(self.clone())
    }

    pub fn bucket(&self, name: &BucketName) -> Result<Bucket> {
        Bucket::open(self.clone(), name.clone())
    }

    pub(crate) fn keyspace(&self) -> &Keyspace {
        &self.keyspace
    }

    /// Flush and fsync everything written so far
    pub fn persist(&self) -> Result<()> {
        self.keyspace
            .persist(PersistMode::SyncAll)
            .map_err(StoreError::storage)
    }
}
