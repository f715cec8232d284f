//! DLS Common Library
//!
//! Shared error handling, logging bootstrap and checksum helpers for the DLS
//! statistical series ingestion workspace.
//!
//! # Example
//!
//! ```no_run
//! use dls_common::checksum::cache_key_digest;
//!
//! let name = cache_key_digest("ecb/EXR/data.xml");
//! assert_eq!(name.len(), 64);
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod checksum;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{DlsError, Result};
