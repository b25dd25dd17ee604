//! Structured error types for heapscope
//!
//! Using thiserror for automatic Display implementation and error chaining.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("failed to resolve the underlying allocator symbols")]
    HookResolutionFailed,

    #[error("allocator interposition is not supported on this platform")]
    HookUnsupported,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to create data directory {path}")]
    DataDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("store has no data directory configured")]
    NoDataDir,

    #[error(transparent)]
    Export(#[from] ExportError),
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_error_display() {
        let err = CaptureError::HookResolutionFailed;
        assert_eq!(err.to_string(), "failed to resolve the underlying allocator symbols");
    }

    #[test]
    fn test_store_error_names_the_directory() {
        let err = StoreError::DataDir {
            path: PathBuf::from("/no/such/dir"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(err.to_string().contains("/no/such/dir"));
    }
}
