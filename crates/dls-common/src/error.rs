//! Error types shared across DLS crates

use thiserror::Error;

/// Result type alias for DLS common operations
pub type Result<T> = std::result::Result<T, DlsError>;

/// Main error type for DLS common utilities
#[derive(Error, Debug)]
pub enum DlsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
