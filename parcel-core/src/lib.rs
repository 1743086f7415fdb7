//! Core data models, planning and retry logic for parcel

pub mod config;
pub mod error;
pub mod integrity;
pub mod plan;
pub mod retry;
pub mod source;
pub mod types;

pub use config::*;
pub use error::*;
pub use plan::*;
pub use retry::*;
pub use source::*;
pub use types::*;

/// Result type alias for parcel core operations
pub type Result<T> = std::result::Result<T, CoreError>;
