//! Error types for series ingestion
//!
//! Errors are split by how far they propagate:
//!
//! - [`SeriesError`]: raised while parsing one series. Rejects are counted and
//!   dropped; only document-level failures (`Xml`, `Io`) stop the sequence.
//! - [`StructureError`]: raised while reading a DSD. Fatal to the dataset.
//! - [`StoreError`]: raised by the storage gateway.
//! - [`IngestError`]: everything that can end a dataset or provider run.

use thiserror::Error;

use crate::period::PeriodError;

/// Result type for dataset and provider runs
pub type Result<T> = std::result::Result<T, IngestError>;

/// Result type for storage gateway calls
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Low-level XML failures
#[derive(Debug, Error)]
pub enum XmlError {
    #[error("XML syntax error: {0}")]
    Syntax(#[from] quick_xml::Error),

    #[error("Malformed XML attribute: {0}")]
    Attribute(#[from] quick_xml::events::attributes::AttrError),

    #[error("Unexpected end of document inside <{0}>")]
    UnexpectedEof(String),

    #[error("Document has no root element")]
    Empty,

    #[error("Unsupported document <{0}>")]
    UnsupportedDocument(String),
}

/// Per-series parse outcome errors
#[derive(Debug, Error)]
pub enum SeriesError {
    #[error("Rejected frequency '{frequency}' for series {key}")]
    RejectFrequency { key: String, frequency: String },

    #[error("Series {key} has no observations")]
    RejectEmptySeries { key: String },

    #[error("Series {key}: {source}")]
    Period {
        key: String,
        #[source]
        source: PeriodError,
    },

    #[error("Invalid series {key}: {reason}")]
    Invalid { key: String, reason: String },

    #[error("Unreadable data document: {0}")]
    Xml(#[from] XmlError),

    #[error("IO error while reading data document: {0}")]
    Io(#[from] std::io::Error),
}

impl SeriesError {
    /// Whether the error ends the whole document rather than one series
    pub fn is_fatal(&self) -> bool {
        matches!(self, SeriesError::Xml(_) | SeriesError::Io(_))
    }

    /// Natural key of the series the error belongs to, when known
    pub fn series_key(&self) -> Option<&str> {
        match self {
            SeriesError::RejectFrequency { key, .. }
            | SeriesError::RejectEmptySeries { key }
            | SeriesError::Period { key, .. }
            | SeriesError::Invalid { key, .. } => Some(key),
            SeriesError::Xml(_) | SeriesError::Io(_) => None,
        }
    }
}

/// Errors raised while reading structure definitions
#[derive(Debug, Error)]
pub enum StructureError {
    #[error("Unreadable structure document: {0}")]
    Xml(#[from] XmlError),

    #[error("IO error while reading structure document: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unrecognised structure schema on <{0}>")]
    UnsupportedSchema(String),

    #[error("Unknown data structure definition: {0}")]
    UnknownStructure(String),

    #[error("Unknown dataflow: {0}")]
    UnknownDataflow(String),

    #[error("Failed to resolve remote codelist {codelist}: {reason}")]
    RemoteCodelist { codelist: String, reason: String },
}

/// One failed operation of a bulk write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedOperation {
    /// Position of the operation in the submitted batch
    pub index: usize,
    pub kind: &'static str,
    pub key: String,
    pub message: String,
}

/// Storage gateway errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Bulk write to {collection} failed: {} of {attempted} operations failed", failed.len())]
    BulkWrite {
        collection: &'static str,
        attempted: usize,
        succeeded: usize,
        failed: Vec<FailedOperation>,
    },

    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[cfg(feature = "postgres")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    pub fn failed_operations(&self) -> &[FailedOperation] {
        match self {
            StoreError::BulkWrite { failed, .. } => failed,
            _ => &[],
        }
    }
}

/// Download errors
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl DownloadError {
    /// 4xx responses mean "this chunk does not exist"
    pub fn is_client_error(&self) -> bool {
        matches!(self, DownloadError::Status { status, .. } if (400..500).contains(status))
            || matches!(self, DownloadError::NotFound(_))
    }

    pub fn is_server_error(&self) -> bool {
        matches!(self, DownloadError::Status { status, .. } if *status >= 500)
    }
}

/// Which bulk write of a batch flush failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStage {
    Series,
    Revisions,
}

impl std::fmt::Display for WriteStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteStage::Series => write!(f, "series"),
            WriteStage::Revisions => write!(f, "revisions"),
        }
    }
}

/// Errors that end a dataset or provider run
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Dataset {provider}/{dataset} is locked")]
    LockedDataset { provider: String, dataset: String },

    #[error("Provider {0} is disabled or locked")]
    DisabledProvider(String),

    #[error("Provider {provider} exceeded its error budget ({errors} > {max})")]
    MaxErrors {
        provider: String,
        errors: usize,
        max: usize,
    },

    #[error("Dataset {provider}/{dataset} not found")]
    DatasetNotFound { provider: String, dataset: String },

    #[error("Bulk write of {stage} failed: {source}")]
    BulkWrite {
        stage: WriteStage,
        #[source]
        source: StoreError,
    },

    #[error("Structure error: {0}")]
    Structure(#[from] StructureError),

    #[error("Data document error: {0}")]
    Series(#[from] SeriesError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Download error: {0}")]
    Download(#[from] DownloadError),

    #[error("Reconciliation worker failed: {0}")]
    Worker(String),
}

impl IngestError {
    pub fn is_bulk_write(&self) -> bool {
        matches!(self, IngestError::BulkWrite { .. })
    }
}
