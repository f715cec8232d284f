use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{BulkOutcome, BulkWriteResult, SeriesStore, SeriesWrite};
use crate::error::{StoreError, StoreResult};
use crate::models::{Category, Dataset, Provider, RevisionArchiveEntry, StoredSeries};

type DatasetKey = (String, String);
type SeriesKey = (String, String, String);

#[derive(Debug, Default)]
struct State {
    providers: HashMap<String, Provider>,
    categories: HashMap<String, Vec<Category>>,
    datasets: HashMap<DatasetKey, Dataset>,
    series: HashMap<Uuid, StoredSeries>,
    series_ids: HashMap<SeriesKey, Uuid>,
    revisions: Vec<RevisionArchiveEntry>,
    /// Series keys whose writes are forced to fail
    failing_keys: HashSet<String>,
}

/// In-process store used by tests and the CLI `parse`/`ingest` dry runs
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later bulk operation on series `key` fail
    pub async fn inject_write_failure(&self, key: &str) {
        self.state.write().await.failing_keys.insert(key.to_string());
    }

    pub async fn series_count(&self) -> usize {
        self.state.read().await.series.len()
    }

    pub async fn revision_count(&self) -> usize {
        self.state.read().await.revisions.len()
    }

    /// Mark a dataset locked, creating a placeholder when absent
    pub async fn lock_dataset(&self, provider_name: &str, dataset_code: &str) {
        let mut state = self.state.write().await;
        state
            .datasets
            .entry((provider_name.to_string(), dataset_code.to_string()))
            .or_insert_with(|| Dataset::new(provider_name, dataset_code))
            .lock = true;
    }
}

#[async_trait]
impl SeriesStore for MemoryStore {
    async fn find_provider(&self, name: &str) -> StoreResult<Option<Provider>> {
        Ok(self.state.read().await.providers.get(name).cloned())
    }

    async fn upsert_provider(&self, provider: &Provider) -> StoreResult<Provider> {
        let mut state = self.state.write().await;
        let stored = match state.providers.get(&provider.name) {
            Some(existing) => Provider {
                enable: existing.enable,
                lock: existing.lock,
                ..provider.clone()
            },
            None => provider.clone(),
        };
        state.providers.insert(provider.name.clone(), stored.clone());
        Ok(stored)
    }

    async fn replace_categories(&self, provider_name: &str, categories: &[Category]) -> StoreResult<usize> {
        let mut state = self.state.write().await;
        state
            .categories
            .insert(provider_name.to_string(), categories.to_vec());
        Ok(categories.len())
    }

    async fn categories(&self, provider_name: &str) -> StoreResult<Vec<Category>> {
        Ok(self
            .state
            .read()
            .await
            .categories
            .get(provider_name)
            .cloned()
            .unwrap_or_default())
    }

    async fn find_dataset(&self, provider_name: &str, dataset_code: &str) -> StoreResult<Option<Dataset>> {
        let key = (provider_name.to_string(), dataset_code.to_string());
        Ok(self.state.read().await.datasets.get(&key).cloned())
    }

    async fn replace_dataset(&self, dataset: &Dataset) -> StoreResult<()> {
        let key = (dataset.provider_name.clone(), dataset.dataset_code.clone());
        self.state.write().await.datasets.insert(key, dataset.clone());
        Ok(())
    }

    async fn update_dataset_status(&self, dataset: &Dataset) -> StoreResult<()> {
        let key = (dataset.provider_name.clone(), dataset.dataset_code.clone());
        let mut state = self.state.write().await;
        let stored = state
            .datasets
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound(dataset.slug.clone()))?;
        stored.enable = dataset.enable;
        stored.disable_reason = dataset.disable_reason.clone();
        stored.last_run = dataset.last_run.clone();
        stored.download_first = dataset.download_first;
        stored.download_last = dataset.download_last;
        stored.last_update = dataset.last_update;
        Ok(())
    }

    async fn disable_dataset(&self, provider_name: &str, dataset_code: &str, reason: &str) -> StoreResult<()> {
        let key = (provider_name.to_string(), dataset_code.to_string());
        let mut state = self.state.write().await;
        let stored = state
            .datasets
            .entry(key)
            .or_insert_with(|| Dataset::new(provider_name, dataset_code));
        stored.enable = false;
        stored.disable_reason = Some(reason.to_string());
        Ok(())
    }

    async fn find_series(
        &self,
        provider_name: &str,
        dataset_code: &str,
        keys: &[String],
    ) -> StoreResult<Vec<StoredSeries>> {
        let state = self.state.read().await;
        Ok(keys
            .iter()
            .filter_map(|key| {
                let id = state.series_ids.get(&(
                    provider_name.to_string(),
                    dataset_code.to_string(),
                    key.clone(),
                ))?;
                state.series.get(id).cloned()
            })
            .collect())
    }

    async fn find_one_series(
        &self,
        provider_name: &str,
        dataset_code: &str,
        key: &str,
    ) -> StoreResult<Option<StoredSeries>> {
        let found = self
            .find_series(provider_name, dataset_code, &[key.to_string()])
            .await?;
        Ok(found.into_iter().next())
    }

    async fn count_series(&self, provider_name: &str, dataset_code: &str) -> StoreResult<usize> {
        Ok(self
            .state
            .read()
            .await
            .series_ids
            .keys()
            .filter(|(p, d, _)| p == provider_name && d == dataset_code)
            .count())
    }

    async fn bulk_write_series(&self, ops: &[SeriesWrite]) -> StoreResult<BulkWriteResult> {
        let mut state = self.state.write().await;
        let mut outcome = BulkOutcome::new("series", ops.len());

        for (index, op) in ops.iter().enumerate() {
            let series = op.series();
            if state.failing_keys.contains(&series.key) {
                outcome.fail(index, op.kind(), &series.key, "injected write failure");
                continue;
            }
            let natural = (
                series.provider_name.clone(),
                series.dataset_code.clone(),
                series.key.clone(),
            );

            match op {
                SeriesWrite::Insert(_) => {
                    if state.series_ids.contains_key(&natural) || state.series.contains_key(&series.id) {
                        outcome.fail(index, op.kind(), &series.key, "duplicate key");
                        continue;
                    }
                    state.series_ids.insert(natural, series.id);
                    state.series.insert(series.id, series.clone());
                    outcome.inserted();
                },
                SeriesWrite::Replace(_) => {
                    let Some(slot) = state.series.get_mut(&series.id) else {
                        outcome.fail(index, op.kind(), &series.key, format!("no document with id {}", series.id));
                        continue;
                    };
                    *slot = series.clone();
                    outcome.replaced();
                },
            }
        }

        outcome.finish()
    }

    async fn bulk_insert_revisions(&self, entries: &[RevisionArchiveEntry]) -> StoreResult<BulkWriteResult> {
        let mut state = self.state.write().await;
        let mut outcome = BulkOutcome::new("series_revisions", entries.len());

        for (index, entry) in entries.iter().enumerate() {
            if state.revisions.iter().any(|r| r.id == entry.id) {
                outcome.fail(index, "insert", &entry.key, "duplicate revision id");
                continue;
            }
            state.revisions.push(entry.clone());
            outcome.inserted();
        }

        outcome.finish()
    }

    async fn revisions(&self, series_id: Uuid) -> StoreResult<Vec<RevisionArchiveEntry>> {
        let state = self.state.read().await;
        let mut found: Vec<_> = state
            .revisions
            .iter()
            .filter(|r| r.series_id == series_id)
            .cloned()
            .collect();
        found.sort_by_key(|r| r.version);
        Ok(found)
    }
}
