//! Committed objects, one fjall partition per bucket

use crate::error::StoreError;
use crate::{Result, StoreEngine};
use fjall::{Partition, PartitionCreateOptions};
use parcel_core::{BucketName, ETag, ObjectKey};
use serde::{Deserialize, Serialize};

/// One entry of an object's part manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartEntry {
    pub part_number: u32,
    pub size: u64,
    pub etag: ETag,
}

/// Metadata stored next to every committed object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub size: u64,
    /// ULID assigned at commit; part data is keyed by it
    pub version: String,
    pub etag: ETag,
    /// Unix milliseconds
    pub created_at: u64,
    pub parts: Vec<PartEntry>,
}

impl ObjectMetadata {
    pub fn part_count(&self) -> usize {
        self.parts.len()
    }
}

/// Bucket of committed objects.
///
/// Keys inside the partition:
/// - `meta:<object key>` holds the JSON [`ObjectMetadata`]
/// - `data:<version>:<part number, 10 digits>` holds the part bytes
pub struct Bucket {
    name: BucketName,
    pub(crate) partition: Partition,
    engine: StoreEngine,
}

impl Bucket {
    pub(crate) fn open(engine: StoreEngine, name: BucketName) -> Result<Self> {
        let partition_name = partition_name(&name);
        if !is_valid_partition_name(&partition_name) {
            return Err(StoreError::InvalidBucket(format!(
                "'{}' cannot be mapped to a partition name",
                name
            )));
        }

        let partition = engine
            .keyspace()
            .open_partition(&partition_name, PartitionCreateOptions::default())
            .map_err(StoreError::storage)?;

        Ok(Bucket { name, partition, engine })
    }

    pub fn name(&self) -> &BucketName {
        &self.name
    }

    pub fn head(&self, key: &ObjectKey) -> Result<Option<ObjectMetadata>> {
        match self.partition.get(metadata_key(key)) {
            Ok(Some(data)) => Ok(Some(serde_json::from_slice(&data)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::storage(e)),
        }
    }

    /// Full object contents, parts concatenated in order
    pub fn get(&self, key: &ObjectKey) -> Result<Option<Vec<u8>>> {
        let Some(metadata) = self.head(key)? else {
            return Ok(None);
        };

        let mut body = Vec::with_capacity(metadata.size as usize);
        for part in &metadata.parts {
            let data = self
                .partition
                .get(data_key(&metadata.version, part.part_number))
                .map_err(StoreError::storage)?
                .ok_or_else(|| {
                    StoreError::Storage(format!(
                        "object {}/{} is missing part {}",
                        self.name, key, part.part_number
                    ))
                })?;
            body.extend_from_slice(&data);
        }

        if body.len() as u64 != metadata.size {
            return Err(StoreError::Storage(format!(
                "object {}/{} has {} bytes, metadata says {}",
                self.name,
                key,
                body.len(),
                metadata.size
            )));
        }

        Ok(Some(body))
    }

    /// Remove an object and its part data
    pub fn delete(&self, key: &ObjectKey) -> Result<bool> {
        let Some(metadata) = self.head(key)? else {
            return Ok(false);
        };

        for part in &metadata.parts {
            self.partition
                .remove(data_key(&metadata.version, part.part_number))
                .map_err(StoreError::storage)?;
        }
        self.partition.remove(metadata_key(key)).map_err(StoreError::storage)?;
        self.engine.persist()?;

        Ok(true)
    }

    /// Object keys starting with `prefix`, in key order
    pub fn list(&self, prefix: &str) -> Result<Vec<ObjectKey>> {
        let scan = format!("{}{}", META_PREFIX, prefix);
        let mut keys = Vec::new();

        for item in self.partition.prefix(&scan) {
            let (raw, _) = item.map_err(StoreError::storage)?;
            let key = std::str::from_utf8(&raw)
                .ok()
                .and_then(|k| k.strip_prefix(META_PREFIX))
                .and_then(|k| ObjectKey::new(k).ok());
            if let Some(key) = key {
                keys.push(key);
            }
        }

        Ok(keys)
    }
}

const META_PREFIX: &str = "meta:";

/// fjall partition names allow `[A-Za-z0-9_#$-]`, so dots are mapped to `$`
pub(crate) fn partition_name(bucket: &BucketName) -> String {
    format!("bucket#{}", bucket.as_str().replace('.', "$"))
}

/// Same rule fjall asserts on when opening a partition
fn is_valid_partition_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_PARTITION_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '#' | '$'))
}

const MAX_PARTITION_NAME_LEN: usize = u8::MAX as usize;

pub(crate) fn metadata_key(key: &ObjectKey) -> Vec<u8> {
    format!("{}{}", META_PREFIX, key.as_str()).into_bytes()
}

pub(crate) fn data_key(version: &str, part_number: u32) -> Vec<u8> {
    format!("data:{}:{:010}", version, part_number).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_name_is_valid_for_dotted_buckets() {
        let name = partition_name(&BucketName::new("logs.example.com").unwrap());
        assert_eq!(name, "bucket#logs$example$com");

        let (engine, _temp) = StoreEngine::temp().unwrap();
        let bucket = engine.bucket(&BucketName::new("logs.example.com").unwrap()).unwrap();
        assert_eq!(bucket.name().as_str(), "logs.example.com");
    }

    #[test]
    fn test_partition_name_rule() {
        assert!(is_valid_partition_name(&partition_name(
            &BucketName::new(&"b".repeat(63)).unwrap()
        )));
        assert!(!is_valid_partition_name(&"b".repeat(300)));
        assert!(!is_valid_partition_name("bucket#with.dot"));
        assert!(!is_valid_partition_name(""));
    }

    #[test]
    fn test_missing_object() {
        let (engine, _temp) = StoreEngine::temp().unwrap();
        let bucket = engine.bucket(&BucketName::new("empty").unwrap()).unwrap();
        let key = ObjectKey::new("nothing-here").unwrap();

        assert!(bucket.head(&key).unwrap().is_none());
        assert!(bucket.get(&key).unwrap().is_none());
        assert!(!bucket.delete(&key).unwrap());
        assert!(bucket.list("").unwrap().is_empty());
    }
}
