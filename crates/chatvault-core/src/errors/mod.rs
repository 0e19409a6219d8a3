//! Error types for chatvault.
//! All errors derive `thiserror::Error` and expose a stable code via [`ErrorCode`].

pub mod error_code;
mod storage_error;

pub use error_code::ErrorCode;
pub use storage_error::{SourceFailure, StorageError, StorageResult};
