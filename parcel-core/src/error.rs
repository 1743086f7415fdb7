//! Error types for parcel

use std::fmt;
use thiserror::Error;

/// Errors raised before any remote call is made
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid bucket name: {0}")]
    InvalidBucketName(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        CoreError::InvalidConfiguration(reason.into())
    }
}

/// Whether retrying a remote call can help
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// Network blip, timeout, server overload
    Transient,
    /// Bad credentials, unknown session, rejected request
    Permanent,
}

/// Failure reported by a remote object-storage call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} remote error: {message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn transient(message: impl Into<String>) -> Self {
        RemoteError {
            kind: RemoteErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        RemoteError {
            kind: RemoteErrorKind::Permanent,
            message: message.into(),
        }
    }

    /// Classify an HTTP-style status code.
    ///
    /// 408, 429 and every 5xx are worth retrying; any other status is not.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = format!("status {}: {}", status, message.into());
        match status {
            408 | 429 | 500..=599 => RemoteError::transient(message),
            _ => RemoteError::permanent(message),
        }
    }

    pub fn timeout(after_ms: u64) -> Self {
        RemoteError::transient(format!("timed out after {} ms", after_ms))
    }

    pub fn is_transient(&self) -> bool {
        self.kind == RemoteErrorKind::Transient
    }
}

impl fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteErrorKind::Transient => write!(f, "transient"),
            RemoteErrorKind::Permanent => write!(f, "permanent"),
        }
    }
}

/// Terminal outcome of a part that never produced a `PartResult`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PartError {
    #[error("part {part_number} failed permanently after {attempts} attempt(s): {cause}")]
    Permanent {
        part_number: u32,
        attempts: u32,
        cause: RemoteError,
    },

    #[error("part {part_number} exhausted {attempts} attempt(s), last error: {last}")]
    Exhausted {
        part_number: u32,
        attempts: u32,
        last: RemoteError,
    },

    /// The local source could not produce the planned bytes
    #[error("part {part_number} could not be read on attempt {attempts}: {reason}")]
    Source {
        part_number: u32,
        attempts: u32,
        reason: String,
    },

    #[error("part {part_number} cancelled after {attempts} attempt(s)")]
    Cancelled { part_number: u32, attempts: u32 },
}

impl PartError {
    pub fn part_number(&self) -> u32 {
        match self {
            PartError::Permanent { part_number, .. }
            | PartError::Exhausted { part_number, .. }
            | PartError::Source { part_number, .. }
            | PartError::Cancelled { part_number, .. } => *part_number,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            PartError::Permanent { attempts, .. }
            | PartError::Exhausted { attempts, .. }
            | PartError::Source { attempts, .. }
            | PartError::Cancelled { attempts, .. } => *attempts,
        }
    }

    /// Cancelled parts were stopped by an abort, they did not cause one
    pub fn is_cancellation(&self) -> bool {
        matches!(self, PartError::Cancelled { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(RemoteError::from_status(500, "internal").is_transient());
        assert!(RemoteError::from_status(503, "slow down").is_transient());
        assert!(RemoteError::from_status(429, "throttled").is_transient());
        assert!(RemoteError::from_status(408, "request timeout").is_transient());

        assert!(!RemoteError::from_status(403, "access denied").is_transient());
        assert!(!RemoteError::from_status(404, "no such upload").is_transient());
        assert!(!RemoteError::from_status(400, "bad digest").is_transient());
    }

    #[test]
    fn test_part_error_accessors() {
        let err = PartError::Exhausted {
            part_number: 7,
            attempts: 3,
            last: RemoteError::timeout(100),
        };
        assert_eq!(err.part_number(), 7);
        assert_eq!(err.attempts(), 3);
        assert!(!err.is_cancellation());
        assert!(err.to_string().contains("part 7"));
    }
}
