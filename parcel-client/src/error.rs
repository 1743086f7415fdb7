//! Upload error types

use parcel_core::{CoreError, ObjectTarget, PartError, RemoteError, SessionId, SessionState};
use std::path::PathBuf;
use thiserror::Error;

/// Terminal result of a failed upload
#[derive(Error, Debug)]
pub enum UploadError {
    /// Rejected before any remote call
    #[error(transparent)]
    InvalidConfiguration(#[from] CoreError),

    /// The local file could not be opened; no remote call was made
    #[error("Cannot read source {}: {source}", .path.display())]
    SourceUnavailable {
        path: PathBuf,
        source: std::io::Error,
    },

    /// No session was created, so there is nothing to abort
    #[error("Failed to initiate upload to {target}: {source}")]
    InitiateFailure {
        target: ObjectTarget,
        source: RemoteError,
    },

    /// At least one part failed and the session was aborted
    #[error("Upload {session_id} failed: {}", summarize(.failures))]
    UploadFailed {
        session_id: SessionId,
        failures: Vec<PartError>,
        /// Set when cleaning up the session failed as well
        abort_error: Option<RemoteError>,
    },

    /// Every part succeeded but the commit call failed. The remote may or
    /// may not have assembled the object; the session needs manual cleanup.
    #[error("Commit of upload {session_id} failed, remote state unknown: {source}")]
    CommitFailure {
        session_id: SessionId,
        source: RemoteError,
    },

    #[error("Illegal session transition {from} -> {to}")]
    InvalidState {
        from: SessionState,
        to: SessionState,
    },
}

impl UploadError {
    /// Part numbers that caused the upload to fail, ascending
    pub fn failed_parts(&self) -> Vec<u32> {
        match self {
            UploadError::UploadFailed { failures, .. } => {
                let mut parts: Vec<u32> = failures
                    .iter()
                    .filter(|f| !f.is_cancellation())
                    .map(PartError::part_number)
                    .collect();
                parts.sort_unstable();
                parts
            }
            _ => Vec::new(),
        }
    }

    pub fn is_invalid_configuration(&self) -> bool {
        matches!(self, UploadError::InvalidConfiguration(_))
    }
}

fn summarize(failures: &[PartError]) -> String {
    let causes: Vec<String> = failures
        .iter()
        .filter(|f| !f.is_cancellation())
        .map(ToString::to_string)
        .collect();

    if causes.is_empty() {
        "aborted".to_string()
    } else {
        causes.join("; ")
    }
}
