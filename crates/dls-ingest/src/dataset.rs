//! One dataset's ingestion run
//!
//! [`DatasetRun`] owns the dataset document for the length of a run: its
//! key order, the union of declared and observed codes, lifecycle flags and
//! run statistics. A locked dataset is refused before any document is read.

use chrono::{DateTime, Utc};
use tracing::{error, info, instrument, warn};

use crate::error::{IngestError, Result};
use crate::models::{Dataset, RunStats};
use crate::reconcile::{DecisionContext, ReconcileOptions, Reconciler};
use crate::sdmx::{SeriesLayout, SeriesSource};
use crate::store::SeriesStore;

/// Append keys not yet present, keeping the existing order
fn merge_keys(existing: &mut Vec<String>, incoming: impl IntoIterator<Item = String>) {
    for key in incoming {
        if !existing.contains(&key) {
            existing.push(key);
        }
    }
}

pub struct DatasetRun<'a> {
    store: &'a dyn SeriesStore,
    dataset: Dataset,
    /// Whether the document already exists in the store
    stored: bool,
    options: ReconcileOptions,
}

impl<'a> DatasetRun<'a> {
    /// Load or create the dataset document. Fails with
    /// [`IngestError::LockedDataset`] when the stored document is locked.
    pub async fn open(
        store: &'a dyn SeriesStore,
        provider_name: &str,
        dataset_code: &str,
        options: ReconcileOptions,
    ) -> Result<Self> {
        let (dataset, stored) = match store.find_dataset(provider_name, dataset_code).await? {
            Some(dataset) => (dataset, true),
            None => (Dataset::new(provider_name, dataset_code), false),
        };

        if dataset.lock {
            return Err(IngestError::LockedDataset {
                provider: provider_name.to_string(),
                dataset: dataset_code.to_string(),
            });
        }

        Ok(Self {
            store,
            dataset,
            stored,
            options,
        })
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.dataset.name = name.into();
    }

    pub fn set_last_update(&mut self, last_update: Option<DateTime<Utc>>) {
        if last_update.is_some() {
            self.dataset.last_update = last_update;
        }
    }

    /// Record the declared keys, codes and concept names of a layout.
    /// Keys already known keep their position; new keys are appended.
    pub fn apply_layout(&mut self, layout: &SeriesLayout) {
        merge_keys(&mut self.dataset.dimension_keys, layout.dimension_keys());
        merge_keys(&mut self.dataset.attribute_keys, layout.attribute_keys());
        self.dataset.codelists.merge(&layout.codelists());
        for (key, name) in layout.concepts() {
            self.dataset.concepts.entry(key).or_insert(name);
        }
    }

    /// Why the dataset cannot be enabled, if it cannot
    pub fn is_recordable(&self, provider_stored: bool, series_count: usize) -> std::result::Result<(), String> {
        if !provider_stored {
            return Err(format!("provider {} is not stored", self.dataset.provider_name));
        }
        if self.dataset.codelists.is_empty() {
            return Err("no codelists".to_string());
        }
        if series_count == 0 {
            return Err("no series stored".to_string());
        }
        Ok(())
    }

    /// Reconcile every series of `source`, then store the dataset document
    #[instrument(skip_all, fields(provider = %self.dataset.provider_name, dataset = %self.dataset.dataset_code))]
    pub async fn update_database<S: SeriesSource + Send + ?Sized>(mut self, source: &mut S) -> Result<Dataset> {
        let now = Utc::now();
        self.dataset.download_first.get_or_insert(now);
        self.dataset.download_last = Some(now);

        let ctx = DecisionContext {
            provider_name: self.dataset.provider_name.clone(),
            dataset_code: self.dataset.dataset_code.clone(),
            last_update: self.dataset.last_update,
        };
        let mut reconciler = Reconciler::new(self.store, ctx, self.options);
        let stats = match reconciler.run(source).await {
            Ok(stats) => stats,
            Err(e) => {
                let partial = reconciler.stats().clone();
                return Err(self.record_failure(source, partial, e).await);
            },
        };

        self.dataset.codelists.merge(&source.take_observed_codes());

        let provider_stored = self
            .store
            .find_provider(&self.dataset.provider_name)
            .await?
            .is_some();
        let series_count = self
            .store
            .count_series(&self.dataset.provider_name, &self.dataset.dataset_code)
            .await?;

        match self.is_recordable(provider_stored, series_count) {
            Ok(()) => {
                self.dataset.enable = true;
                self.dataset.disable_reason = None;
            },
            Err(reason) => {
                warn!(%reason, "Dataset disabled");
                self.dataset.enable = false;
                self.dataset.disable_reason = Some(reason);
            },
        }
        self.dataset.last_run = Some(stats.clone());

        if stats.changed() > 0 || !self.stored {
            self.store.replace_dataset(&self.dataset).await?;
        } else {
            self.store.update_dataset_status(&self.dataset).await?;
        }

        info!(
            accepts = stats.accepts,
            rejects = stats.rejects,
            inserts = stats.inserts,
            updates = stats.updates,
            errors = stats.errors,
            series = series_count,
            enable = self.dataset.enable,
            "Dataset stored"
        );
        Ok(self.dataset)
    }

    /// Store the dataset disabled after a fatal run error, then hand the
    /// error back. Series that landed before the failure stay stored.
    async fn record_failure<S: SeriesSource + Send + ?Sized>(
        mut self,
        source: &mut S,
        stats: RunStats,
        error: IngestError,
    ) -> IngestError {
        let reason = match &error {
            IngestError::BulkWrite { stage, source } => format!("bulk write of {stage} failed: {source}"),
            other => other.to_string(),
        };
        warn!(%reason, "Dataset run failed");

        self.dataset.codelists.merge(&source.take_observed_codes());
        self.dataset.enable = false;
        self.dataset.disable_reason = Some(reason);
        let changed = stats.changed() > 0;
        self.dataset.last_run = Some(stats);

        let stored = if changed || !self.stored {
            self.store.replace_dataset(&self.dataset).await
        } else {
            self.store.update_dataset_status(&self.dataset).await
        };
        if let Err(store_err) = stored {
            error!(error = %store_err, "Failed to store dataset after run error");
        }
        error
    }
}
