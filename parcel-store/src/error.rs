//! Store error types

use parcel_core::RemoteError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("No such upload: {0}")]
    NoSuchUpload(String),

    #[error("Invalid bucket: {0}")]
    InvalidBucket(String),

    #[error("Invalid part: {0}")]
    InvalidPart(String),

    #[error("Invalid part order: {0}")]
    InvalidPartOrder(String),

    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub(crate) fn storage(e: impl std::fmt::Display) -> Self {
        StoreError::Storage(e.to_string())
    }
}

/// Storage hiccups are worth retrying, rejected requests are not
impl From<StoreError> for RemoteError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Storage(_) | StoreError::Io(_) => RemoteError::transient(error.to_string()),
            StoreError::NoSuchUpload(_) | StoreError::ObjectNotFound(_) => {
                RemoteError::from_status(404, error.to_string())
            }
            StoreError::InvalidBucket(_)
            | StoreError::InvalidPart(_)
            | StoreError::InvalidPartOrder(_)
            | StoreError::Serialization(_) => RemoteError::from_status(400, error.to_string()),
        }
    }
}
