//! Storage gateway
//!
//! [`SeriesStore`] is the only way the ingestion core touches persistence.
//! Whether a series changed is decided by the reconciler; the store only
//! executes the writes it is handed.
//!
//! Bulk writes apply operations in submission order. A failing operation
//! does not stop the ones after it, and the call then returns
//! [`StoreError::BulkWrite`](crate::error::StoreError::BulkWrite) listing
//! every failure.

mod memory;
#[cfg(feature = "postgres")]
mod postgres;

pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PgStore;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{FailedOperation, StoreError, StoreResult};
use crate::models::{Category, Dataset, Provider, RevisionArchiveEntry, StoredSeries};

/// One operation of a series bulk write
#[derive(Debug, Clone, PartialEq)]
pub enum SeriesWrite {
    Insert(StoredSeries),
    /// Replace the document with the same storage id
    Replace(StoredSeries),
}

impl SeriesWrite {
    pub fn kind(&self) -> &'static str {
        match self {
            SeriesWrite::Insert(_) => "insert",
            SeriesWrite::Replace(_) => "replace",
        }
    }

    pub fn series(&self) -> &StoredSeries {
        match self {
            SeriesWrite::Insert(s) | SeriesWrite::Replace(s) => s,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkWriteResult {
    pub inserted: usize,
    pub replaced: usize,
}

/// Collects per-operation outcomes of a bulk write
#[derive(Debug)]
pub(crate) struct BulkOutcome {
    collection: &'static str,
    attempted: usize,
    result: BulkWriteResult,
    failed: Vec<FailedOperation>,
}

impl BulkOutcome {
    pub(crate) fn new(collection: &'static str, attempted: usize) -> Self {
        Self {
            collection,
            attempted,
            result: BulkWriteResult::default(),
            failed: Vec::new(),
        }
    }

    pub(crate) fn inserted(&mut self) {
        self.result.inserted += 1;
    }

    pub(crate) fn replaced(&mut self) {
        self.result.replaced += 1;
    }

    pub(crate) fn fail(&mut self, index: usize, kind: &'static str, key: &str, message: impl Into<String>) {
        self.failed.push(FailedOperation {
            index,
            kind,
            key: key.to_string(),
            message: message.into(),
        });
    }

    pub(crate) fn finish(self) -> StoreResult<BulkWriteResult> {
        if self.failed.is_empty() {
            return Ok(self.result);
        }
        Err(StoreError::BulkWrite {
            collection: self.collection,
            attempted: self.attempted,
            succeeded: self.result.inserted + self.result.replaced,
            failed: self.failed,
        })
    }
}

#[async_trait]
pub trait SeriesStore: Send + Sync {
    async fn find_provider(&self, name: &str) -> StoreResult<Option<Provider>>;

    /// Insert or update by name. Enable/lock flags of an existing provider
    /// are kept.
    async fn upsert_provider(&self, provider: &Provider) -> StoreResult<Provider>;

    /// Delete every category of the provider, then insert `categories`
    async fn replace_categories(&self, provider_name: &str, categories: &[Category]) -> StoreResult<usize>;

    async fn categories(&self, provider_name: &str) -> StoreResult<Vec<Category>>;

    async fn find_dataset(&self, provider_name: &str, dataset_code: &str) -> StoreResult<Option<Dataset>>;

    /// Write the whole dataset document, creating it when absent
    async fn replace_dataset(&self, dataset: &Dataset) -> StoreResult<()>;

    /// Update run bookkeeping only: enable, disable reason, run stats,
    /// download and update timestamps
    async fn update_dataset_status(&self, dataset: &Dataset) -> StoreResult<()>;

    async fn disable_dataset(&self, provider_name: &str, dataset_code: &str, reason: &str) -> StoreResult<()>;

    /// Stored series of a dataset among `keys`
    async fn find_series(
        &self,
        provider_name: &str,
        dataset_code: &str,
        keys: &[String],
    ) -> StoreResult<Vec<StoredSeries>>;

    async fn find_one_series(
        &self,
        provider_name: &str,
        dataset_code: &str,
        key: &str,
    ) -> StoreResult<Option<StoredSeries>>;

    async fn count_series(&self, provider_name: &str, dataset_code: &str) -> StoreResult<usize>;

    async fn bulk_write_series(&self, ops: &[SeriesWrite]) -> StoreResult<BulkWriteResult>;

    async fn bulk_insert_revisions(&self, entries: &[RevisionArchiveEntry]) -> StoreResult<BulkWriteResult>;

    /// Archived versions of one series, oldest first
    async fn revisions(&self, series_id: Uuid) -> StoreResult<Vec<RevisionArchiveEntry>>;
}
