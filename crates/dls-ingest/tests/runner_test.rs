//! Provider runs over adapters and local documents

#![allow(clippy::unwrap_used)]

mod common;

use async_trait::async_trait;
use common::*;
use dls_ingest::categories::CategoryTree;
use dls_ingest::config::IngestConfig;
use dls_ingest::context::IngestContext;
use dls_ingest::error::IngestError;
use dls_ingest::fetch::LocalDownloader;
use dls_ingest::models::{Observation, Provider, RejectReason, SeriesRecord};
use dls_ingest::period::Frequency;
use dls_ingest::provider::ProviderProfile;
use dls_ingest::runner::{DatasetInfo, DatasetOutcome, DatasetSource, ProviderAdapter, ProviderRunner, SdmxAdapter};
use dls_ingest::sdmx::data::RecordSource;
use dls_ingest::sdmx::SeriesLayout;
use dls_ingest::store::{MemoryStore, SeriesStore};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

// ============================================================================
// Fixtures
// ============================================================================

/// Adapter serving canned records; datasets listed in `failing` cannot be opened
struct FakeAdapter {
    datasets: Vec<String>,
    failing: Vec<String>,
    tree: CategoryTree,
}

impl FakeAdapter {
    fn new(datasets: &[&str]) -> Self {
        Self {
            datasets: datasets.iter().map(|d| d.to_string()).collect(),
            failing: Vec::new(),
            tree: CategoryTree::new(),
        }
    }

    fn failing(mut self, datasets: &[&str]) -> Self {
        self.failing = datasets.iter().map(|d| d.to_string()).collect();
        self
    }
}

fn record(key: &str, dimensions: &[(&str, &str)]) -> SeriesRecord {
    SeriesRecord {
        key: key.to_string(),
        name: key.to_string(),
        frequency: Frequency::Annual,
        dimensions: dimensions
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        attributes: BTreeMap::new(),
        values: vec![Observation {
            period: "1970".to_string(),
            ordinal: 0,
            value: "1".to_string(),
            attributes: BTreeMap::new(),
        }],
        start_date: 0,
        end_date: 0,
        notes: None,
        last_update_ds: None,
    }
}

#[async_trait]
impl ProviderAdapter for FakeAdapter {
    fn provider(&self) -> Provider {
        Provider::new("FAKE", "Fake provider")
    }

    async fn build_data_tree(&self) -> dls_ingest::Result<CategoryTree> {
        Ok(self.tree.clone())
    }

    async fn datasets_list(&self) -> dls_ingest::Result<Vec<DatasetInfo>> {
        Ok(self
            .datasets
            .iter()
            .map(|code| DatasetInfo {
                code: code.clone(),
                name: code.clone(),
            })
            .collect())
    }

    async fn open_dataset(&self, dataset_code: &str) -> dls_ingest::Result<DatasetSource> {
        if self.failing.iter().any(|d| d == dataset_code) {
            return Err(IngestError::DatasetNotFound {
                provider: "FAKE".to_string(),
                dataset: dataset_code.to_string(),
            });
        }
        // a dataset code of "BARE" carries no dimensions at all
        let (layout, records) = if dataset_code == "BARE" {
            (SeriesLayout::inferred(&[], &[]), vec![Ok(record("S1", &[]))])
        } else {
            (
                SeriesLayout::inferred(&["REF_AREA"], &[]),
                vec![Ok(record("FR", &[("REF_AREA", "FR")]))],
            )
        };
        Ok(DatasetSource {
            name: format!("Dataset {dataset_code}"),
            layout,
            last_update: None,
            series: Box::new(RecordSource::new(records)),
        })
    }
}

fn context(store: Arc<MemoryStore>, root: &Path, config: IngestConfig) -> IngestContext {
    IngestContext::new(store, Arc::new(LocalDownloader::new(root)), config)
}

/// Catalog and EXR data message written to a temporary directory
fn local_documents() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("catalog.xml"), STRUCTURE_V21).unwrap();
    std::fs::write(dir.path().join("EXR.xml"), DATA_SPECIFIC21).unwrap();
    dir
}

fn exr_adapter(dir: &Path) -> SdmxAdapter {
    SdmxAdapter::new(
        ProviderProfile::generic("TEST"),
        Arc::new(LocalDownloader::new(dir)),
        "catalog.xml",
    )
    .with_data_url("EXR", "EXR.xml")
}

// ============================================================================
// SDMX adapter end to end
// ============================================================================

#[tokio::test]
async fn test_sdmx_provider_run() {
    init_tracing();
    let dir = local_documents();
    let store = Arc::new(MemoryStore::new());
    let ctx = context(store.clone(), dir.path(), IngestConfig::default());
    let adapter = exr_adapter(dir.path());

    let report = ProviderRunner::new(&ctx, &adapter).run(None).await.unwrap();
    assert_eq!(report.provider, "TEST");
    assert_eq!(report.errors, 0);
    assert!(!report.skipped);
    assert_eq!(report.categories, 2);
    assert_eq!(report.datasets.len(), 1);

    let (code, outcome) = &report.datasets[0];
    assert_eq!(code, "EXR");
    let DatasetOutcome::Stored(dataset) = outcome else {
        panic!("expected a stored dataset, got {outcome:?}");
    };
    assert_eq!(dataset.name, "Exchange rates");
    assert!(dataset.enable);
    assert_eq!(dataset.dimension_keys, ["FREQ", "REF_AREA"]);
    assert_eq!(dataset.attribute_keys, ["TITLE", "OBS_STATUS"]);
    assert_eq!(dataset.codelists.get("REF_AREA").unwrap().get("DE"), Some("Germany"));
    assert_eq!(dataset.concepts["REF_AREA"], "Reference area");
    assert!(dataset.last_update.is_some());
    assert_eq!(dataset.last_run.as_ref().unwrap().inserts, 2);

    assert_eq!(store.count_series("TEST", "EXR").await.unwrap(), 2);
    let categories = store.categories("TEST").await.unwrap();
    let rates = categories.iter().find(|c| c.category_code == "RATES").unwrap();
    assert_eq!(rates.parent.as_deref(), Some("MARKETS"));
    assert_eq!(rates.datasets, ["EXR"]);
}

#[tokio::test]
async fn test_unchanged_publication_is_skipped_unless_forced() {
    let dir = local_documents();
    let store = Arc::new(MemoryStore::new());
    let adapter = exr_adapter(dir.path());

    let ctx = context(store.clone(), dir.path(), IngestConfig::default());
    ProviderRunner::new(&ctx, &adapter).run(None).await.unwrap();

    let again = ProviderRunner::new(&ctx, &adapter).run(None).await.unwrap();
    assert!(matches!(&again.datasets[0].1, DatasetOutcome::Skipped(reason) if reason == "not updated"));

    let forced = IngestConfig {
        force_update: true,
        ..IngestConfig::default()
    };
    let ctx = context(store.clone(), dir.path(), forced);
    let report = ProviderRunner::new(&ctx, &adapter).run(None).await.unwrap();
    let DatasetOutcome::Stored(dataset) = &report.datasets[0].1 else {
        panic!("forced run must store the dataset");
    };
    let stats = dataset.last_run.as_ref().unwrap();
    assert_eq!(stats.changed(), 0);
    assert_eq!(stats.rejected(RejectReason::Unchanged), 2);
}

#[tokio::test]
async fn test_sharded_download_skips_missing_shards() {
    let dir = local_documents();
    let shards = dir.path().join("shards").join("EXR");
    std::fs::create_dir_all(&shards).unwrap();
    std::fs::write(
        shards.join("A..xml"),
        specific_message(&[("A", "DE", vec![("2000", "1")])]),
    )
    .unwrap();
    std::fs::write(
        shards.join("M..xml"),
        specific_message(&[("M", "FR", vec![("2000-01", "1")]), ("M", "DE", vec![("2000-01", "2")])]),
    )
    .unwrap();

    // no Q shard on disk: treated as a shard without data
    let profile = ProviderProfile {
        shard_dimension: Some("FREQ".to_string()),
        data_template: Some("shards/{dataset}/{key}.xml".to_string()),
        ..ProviderProfile::generic("TEST")
    };
    let adapter = SdmxAdapter::new(profile, Arc::new(LocalDownloader::new(dir.path())), "catalog.xml");
    let store = Arc::new(MemoryStore::new());
    let ctx = context(store.clone(), dir.path(), IngestConfig::default());

    let report = ProviderRunner::new(&ctx, &adapter)
        .run(Some(&["EXR".to_string()]))
        .await
        .unwrap();
    assert_eq!(report.errors, 0);
    assert!(matches!(report.datasets[0].1, DatasetOutcome::Stored(_)));
    assert_eq!(store.count_series("TEST", "EXR").await.unwrap(), 3);
}

#[tokio::test]
async fn test_rejected_frequency_shards_are_not_requested() {
    let dir = local_documents();
    let shards = dir.path().join("shards").join("EXR");
    std::fs::create_dir_all(&shards).unwrap();
    std::fs::write(
        shards.join("A..xml"),
        specific_message(&[("A", "DE", vec![("2000", "1")])]),
    )
    .unwrap();
    std::fs::write(
        shards.join("M..xml"),
        specific_message(&[("M", "FR", vec![("2000-01", "1")]), ("M", "DE", vec![("2000-01", "2")])]),
    )
    .unwrap();
    // read only if the Q shard is requested
    std::fs::write(
        shards.join("Q..xml"),
        specific_message(&[("Q", "FR", vec![("2000-Q1", "1")])]),
    )
    .unwrap();

    let profile = ProviderProfile {
        shard_dimension: Some("FREQ".to_string()),
        data_template: Some("shards/{dataset}/{key}.xml".to_string()),
        rejected: ["Q".to_string()].into_iter().collect(),
        ..ProviderProfile::generic("TEST")
    };
    let adapter = SdmxAdapter::new(profile, Arc::new(LocalDownloader::new(dir.path())), "catalog.xml");
    let store = Arc::new(MemoryStore::new());
    let ctx = context(store.clone(), dir.path(), IngestConfig::default());

    let report = ProviderRunner::new(&ctx, &adapter)
        .run(Some(&["EXR".to_string()]))
        .await
        .unwrap();
    assert_eq!(report.errors, 0);
    assert_eq!(store.count_series("TEST", "EXR").await.unwrap(), 3);

    let dataset = store.find_dataset("TEST", "EXR").await.unwrap().unwrap();
    let stats = dataset.last_run.as_ref().unwrap();
    assert_eq!(stats.inserts, 3);
    assert_eq!(stats.rejected(RejectReason::Frequency), 0);
}

// ============================================================================
// Lifecycle and error budget
// ============================================================================

#[tokio::test]
async fn test_error_budget_stops_the_provider() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    let config = IngestConfig {
        max_errors: 1,
        ..IngestConfig::default()
    };
    let ctx = context(store.clone(), dir.path(), config);
    let adapter = FakeAdapter::new(&["D1", "D2", "D3", "D4"]).failing(&["D2", "D3", "D4"]);

    let err = ProviderRunner::new(&ctx, &adapter).run(None).await.unwrap_err();
    match err {
        IngestError::MaxErrors { provider, errors, max } => {
            assert_eq!(provider, "FAKE");
            assert_eq!(errors, 2);
            assert_eq!(max, 1);
        },
        other => panic!("expected MaxErrors, got {other:?}"),
    }

    // D1 ran before the budget ran out, D4 never did
    assert!(store.find_dataset("FAKE", "D1").await.unwrap().is_some());
    assert!(store.find_dataset("FAKE", "D4").await.unwrap().is_none());
}

#[tokio::test]
async fn test_locked_dataset_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    store.lock_dataset("FAKE", "D2").await;
    let ctx = context(store.clone(), dir.path(), IngestConfig::default());
    let adapter = FakeAdapter::new(&["D1", "D2"]);

    let report = ProviderRunner::new(&ctx, &adapter).run(None).await.unwrap();
    assert_eq!(report.errors, 0);
    assert!(matches!(report.datasets[0].1, DatasetOutcome::Stored(_)));
    assert!(matches!(&report.datasets[1].1, DatasetOutcome::Skipped(reason) if reason == "locked"));
    assert_eq!(store.count_series("FAKE", "D2").await.unwrap(), 0);
}

#[tokio::test]
async fn test_disabled_provider_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    store
        .upsert_provider(&Provider {
            enable: false,
            ..Provider::new("FAKE", "Fake provider")
        })
        .await
        .unwrap();
    let ctx = context(store.clone(), dir.path(), IngestConfig::default());
    let adapter = FakeAdapter::new(&["D1"]);

    let report = ProviderRunner::new(&ctx, &adapter).run(None).await.unwrap();
    assert!(report.skipped);
    assert!(report.datasets.is_empty());
    assert!(store.find_dataset("FAKE", "D1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_cyclic_category_tree_keeps_stored_categories() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    let ctx = context(store.clone(), dir.path(), IngestConfig::default());

    let mut adapter = FakeAdapter::new(&[]);
    adapter.tree.insert("ROOT", "Root", None);
    adapter.tree.insert("CHILD", "Child", Some("ROOT"));
    let report = ProviderRunner::new(&ctx, &adapter).run(None).await.unwrap();
    assert_eq!(report.categories, 2);

    let mut broken = FakeAdapter::new(&[]);
    broken.tree.insert("A", "A", Some("B"));
    broken.tree.insert("B", "B", Some("A"));
    let report = ProviderRunner::new(&ctx, &broken).run(None).await.unwrap();
    assert_eq!(report.categories, 0);
    assert_eq!(store.categories("FAKE").await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_dataset_without_codelists_is_disabled() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    let ctx = context(store.clone(), dir.path(), IngestConfig::default());
    let adapter = FakeAdapter::new(&["BARE"]);

    let report = ProviderRunner::new(&ctx, &adapter).run(None).await.unwrap();
    let DatasetOutcome::Stored(dataset) = &report.datasets[0].1 else {
        panic!("dataset must still be stored");
    };
    assert!(!dataset.enable);
    assert_eq!(dataset.disable_reason.as_deref(), Some("no codelists"));

    let stored = store.find_dataset("FAKE", "BARE").await.unwrap().unwrap();
    assert!(!stored.enable);
    assert!(!stored.disable_reason.unwrap().is_empty());
}
