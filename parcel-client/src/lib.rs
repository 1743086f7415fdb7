//! Concurrent multipart uploads with per-part retry

pub mod client;
pub mod coordinator;
pub mod error;
pub mod session;
pub mod signal;
pub mod uploader;

#[cfg(any(test, feature = "test-utils"))]
pub mod memory;

pub use client::{RemoteResult, SessionClient};
pub use coordinator::{UploadCoordinator, UploadOptions, UploadReport};
pub use error::UploadError;
pub use session::UploadSession;
pub use signal::AbortSignal;
pub use uploader::PartUploader;

#[cfg(any(test, feature = "test-utils"))]
pub use memory::MemorySessionClient;

pub type Result<T> = std::result::Result<T, UploadError>;
