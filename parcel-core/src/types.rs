//! Core data types for parcel

use serde::{Deserialize, Serialize};
use std::fmt;

/// Bucket name length bounds, as enforced by S3
pub const MIN_BUCKET_NAME_LEN: usize = 3;
pub const MAX_BUCKET_NAME_LEN: usize = 63;

/// Destination bucket name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BucketName(String);

impl BucketName {
    /// Create a new bucket name with validation
    pub fn new(name: &str) -> crate::Result<Self> {
        if !(MIN_BUCKET_NAME_LEN..=MAX_BUCKET_NAME_LEN).contains(&name.len()) {
            return Err(crate::CoreError::InvalidBucketName(format!(
                "'{}' must be {} to {} characters long",
                name, MIN_BUCKET_NAME_LEN, MAX_BUCKET_NAME_LEN
            )));
        }

        // Alphanumeric, hyphens, underscores and dots only
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        {
            return Err(crate::CoreError::InvalidBucketName(format!(
                "invalid characters in '{}'",
                name
            )));
        }

        Ok(BucketName(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for BucketName {
    type Error = crate::CoreError;

    fn try_from(value: String) -> crate::Result<Self> {
        BucketName::new(&value)
    }
}

impl From<BucketName> for String {
    fn from(value: BucketName) -> Self {
        value.0
    }
}

impl fmt::Display for BucketName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Object key within a bucket
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectKey(String);

impl ObjectKey {
    /// Create a new key with validation
    pub fn new(key: &str) -> crate::Result<Self> {
        if key.is_empty() {
            return Err(crate::CoreError::InvalidKey("empty key".to_string()));
        }

        if key.chars().any(|c| c.is_control()) {
            return Err(crate::CoreError::InvalidKey(
                "control characters not allowed".to_string(),
            ));
        }

        Ok(ObjectKey(key.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ObjectKey {
    type Error = crate::CoreError;

    fn try_from(value: String) -> crate::Result<Self> {
        ObjectKey::new(&value)
    }
}

impl From<ObjectKey> for String {
    fn from(value: ObjectKey) -> Self {
        value.0
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where an upload lands
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectTarget {
    pub bucket: BucketName,
    pub key: ObjectKey,
}

impl ObjectTarget {
    pub fn new(bucket: BucketName, key: ObjectKey) -> Self {
        ObjectTarget { bucket, key }
    }
}

impl fmt::Display for ObjectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// Opaque multipart session handle assigned by the remote
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        SessionId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque fingerprint the remote assigns to a part or object
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ETag(String);

impl ETag {
    pub fn new(tag: impl Into<String>) -> Self {
        ETag(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ETag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// BLAKE3 digest of a byte range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentDigest([u8; 32]);

impl ContentDigest {
    pub fn new(data: &[u8]) -> Self {
        ContentDigest(blake3::hash(data).into())
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        ContentDigest(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// One planned unit of work. Part numbers start at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartSpec {
    pub part_number: u32,
    pub byte_offset: u64,
    pub byte_length: u64,
}

impl PartSpec {
    /// Exclusive end of the range
    pub fn end(&self) -> u64 {
        self.byte_offset + self.byte_length
    }
}

/// Outcome of a successfully uploaded part
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartResult {
    pub part_number: u32,
    pub etag: ETag,
    pub attempts: u32,
    pub byte_length: u64,
    pub digest: ContentDigest,
}

impl PartResult {
    pub fn completed_part(&self) -> CompletedPart {
        CompletedPart {
            part_number: self.part_number,
            etag: self.etag.clone(),
        }
    }
}

/// A (partNumber, ETag) pair as sent on commit
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: ETag,
}

/// Identifier of a committed object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectId {
    pub bucket: BucketName,
    pub key: ObjectKey,
    /// Whole-object fingerprint, when the remote reports one
    pub etag: Option<ETag>,
    /// Remote-assigned version, when the remote versions objects
    pub version: Option<String>,
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)?;
        if let Some(version) = &self.version {
            write!(f, "@{}", version)?;
        }
        Ok(())
    }
}

/// Lifecycle of one multipart session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Planning,
    Active,
    Completing,
    Committed,
    Aborting,
    Aborted,
}

impl SessionState {
    /// Whether `self -> next` is an edge of the session state machine
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Planning, Active)
                | (Active, Completing)
                | (Active, Aborting)
                | (Completing, Committed)
                | (Aborting, Aborted)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Committed | SessionState::Aborted)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Minimum S3 part size (5 MiB), except for the final part
pub const S3_MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Maximum S3 part count per upload
pub const S3_MAX_PARTS: u32 = 10_000;

/// Part-size and part-count limits enforced by a remote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteLimits {
    pub min_part_size: u64,
    pub max_parts: u32,
}

impl Default for RemoteLimits {
    fn default() -> Self {
        RemoteLimits {
            min_part_size: S3_MIN_PART_SIZE,
            max_parts: S3_MAX_PARTS,
        }
    }
}

pub(crate) mod hex {
    use std::fmt::Write;

    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().fold(String::new(), |mut output, b| {
            let _ = write!(output, "{:02x}", b);
            output
        })
    }

    pub fn decode(s: &str) -> Option<Vec<u8>> {
        if s.len() % 2 != 0 {
            return None;
        }
        (0..s.len())
            .step_by(2)
            .map(|i| s.get(i..i + 2).and_then(|b| u8::from_str_radix(b, 16).ok()))
            .collect()
    }
}
