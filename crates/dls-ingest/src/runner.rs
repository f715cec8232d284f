//! Provider runs
//!
//! A [`ProviderAdapter`] knows where a publisher keeps its catalog and data.
//! [`ProviderRunner`] drives one adapter: it registers the provider,
//! rebuilds its categories and runs each dataset in turn, keeping a budget
//! of fatal dataset errors.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, instrument, warn};

use crate::categories::CategoryTree;
use crate::context::IngestContext;
use crate::dataset::DatasetRun;
use crate::error::{IngestError, Result, SeriesError, StructureError};
use crate::fetch::{CodelistResolver, Downloader, ShardedFetch};
use crate::models::{Dataset, Provider};
use crate::provider::ProviderProfile;
use crate::sdmx::{
    parse_structure, resolve_remote_codelists, ChainedSource, SeriesLayout, SeriesReader, SeriesSource,
    StructureDefinition,
};
use crate::xml::open_document;

/// Catalog entry of a dataset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetInfo {
    pub code: String,
    pub name: String,
}

/// Everything needed to ingest one dataset
pub struct DatasetSource {
    pub name: String,
    pub layout: SeriesLayout,
    /// Update time reported by the publisher
    pub last_update: Option<DateTime<Utc>>,
    pub series: Box<dyn SeriesSource + Send>,
}

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn provider(&self) -> Provider;

    async fn build_data_tree(&self) -> Result<CategoryTree>;

    async fn datasets_list(&self) -> Result<Vec<DatasetInfo>>;

    async fn open_dataset(&self, dataset_code: &str) -> Result<DatasetSource>;
}

/// Adapter for publishers with SDMX-ML structure and data messages
pub struct SdmxAdapter {
    profile: ProviderProfile,
    downloader: Arc<dyn Downloader>,
    resolver: Option<Arc<dyn CodelistResolver>>,
    catalog_url: String,
    catalog: OnceCell<StructureDefinition>,
    structure_urls: HashMap<String, String>,
    data_urls: HashMap<String, Vec<String>>,
}

impl SdmxAdapter {
    /// `catalog_url` points at a structure message listing categories and
    /// dataflows
    pub fn new(profile: ProviderProfile, downloader: Arc<dyn Downloader>, catalog_url: impl Into<String>) -> Self {
        Self {
            profile,
            downloader,
            resolver: None,
            catalog_url: catalog_url.into(),
            catalog: OnceCell::new(),
            structure_urls: HashMap::new(),
            data_urls: HashMap::new(),
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn CodelistResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Structure message of one dataset, instead of the profile's query
    pub fn with_structure_url(mut self, dataset_code: &str, url: impl Into<String>) -> Self {
        self.structure_urls.insert(dataset_code.to_string(), url.into());
        self
    }

    /// Data message of one dataset, instead of the profile's query. May be
    /// given several times; the messages are read in order.
    pub fn with_data_url(mut self, dataset_code: &str, url: impl Into<String>) -> Self {
        self.data_urls
            .entry(dataset_code.to_string())
            .or_default()
            .push(url.into());
        self
    }

    pub fn profile(&self) -> &ProviderProfile {
        &self.profile
    }

    async fn load_structure(&self, url: &str, cache_key: &str) -> Result<StructureDefinition> {
        let path = self.downloader.fetch(url, cache_key).await?;
        let document = open_document(&path).map_err(StructureError::Io)?;
        let mut def = parse_structure(document)?;

        if let Some(resolver) = &self.resolver {
            let resolved = resolve_remote_codelists(&mut def, resolver.as_ref()).await?;
            if resolved > 0 {
                debug!(url, resolved, "Resolved remote codelists");
            }
        }
        Ok(def)
    }

    async fn catalog(&self) -> Result<&StructureDefinition> {
        self.catalog
            .get_or_try_init(|| {
                let key = format!("{}/catalog", self.profile.name);
                async move { self.load_structure(&self.catalog_url, &key).await }
            })
            .await
    }

    async fn structure_for(&self, dataset_code: &str) -> Result<StructureDefinition> {
        let url = self
            .structure_urls
            .get(dataset_code)
            .cloned()
            .or_else(|| self.profile.datastructure_url(dataset_code));
        match url {
            Some(url) => {
                let key = format!("{}/{}/structure", self.profile.name, dataset_code);
                self.load_structure(&url, &key).await
            },
            None => Ok(self.catalog().await?.clone()),
        }
    }

    /// Local paths of every data message of a dataset
    async fn data_paths(&self, dataset_code: &str, layout: &SeriesLayout) -> Result<Vec<std::path::PathBuf>> {
        if let Some(urls) = self.data_urls.get(dataset_code) {
            let mut paths = Vec::with_capacity(urls.len());
            for (i, url) in urls.iter().enumerate() {
                let key = format!("{}/{}/data/{}", self.profile.name, dataset_code, i);
                paths.push(self.downloader.fetch(url, &key).await?);
            }
            return Ok(paths);
        }

        let shard_dimension = self.profile.shard_dimension.as_deref();
        // Shards of a rejected frequency are never requested.
        let on_frequency = shard_dimension.is_some() && shard_dimension == layout.frequency_key.as_deref();
        let shard_codes: Vec<String> = shard_dimension
            .and_then(|dim| layout.dimension(dim))
            .map(|d| {
                d.codes
                    .codes()
                    .filter(|code| !on_frequency || self.profile.resolve_frequency(code).is_some())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        if !shard_codes.is_empty() {
            if let Some(sharded) =
                ShardedFetch::for_dimension(&self.profile, dataset_code, &layout.dimension_keys(), &shard_codes)
            {
                let fetched = sharded.fetch_all(self.downloader.as_ref()).await?;
                return Ok(fetched.into_iter().map(|(_, path)| path).collect());
            }
        }

        let url = self
            .profile
            .data_url(dataset_code, "all")
            .ok_or_else(|| IngestError::DatasetNotFound {
                provider: self.profile.name.clone(),
                dataset: dataset_code.to_string(),
            })?;
        let key = format!("{}/{}/data", self.profile.name, dataset_code);
        Ok(vec![self.downloader.fetch(&url, &key).await?])
    }
}

#[async_trait]
impl ProviderAdapter for SdmxAdapter {
    fn provider(&self) -> Provider {
        self.profile.provider()
    }

    async fn build_data_tree(&self) -> Result<CategoryTree> {
        Ok(self.catalog().await?.categories.clone())
    }

    async fn datasets_list(&self) -> Result<Vec<DatasetInfo>> {
        Ok(self
            .catalog()
            .await?
            .dataflows
            .values()
            .map(|flow| DatasetInfo {
                code: flow.id.clone(),
                name: flow.name.clone(),
            })
            .collect())
    }

    #[instrument(skip(self), fields(provider = %self.profile.name))]
    async fn open_dataset(&self, dataset_code: &str) -> Result<DatasetSource> {
        let def = self.structure_for(dataset_code).await?;
        let layout = def.layout(dataset_code)?;
        let name = def
            .dataflows
            .get(dataset_code)
            .map(|flow| flow.name.clone())
            .unwrap_or_else(|| dataset_code.to_string());

        let paths = self.data_paths(dataset_code, &layout).await?;
        let mut last_update: Option<DateTime<Utc>> = None;
        let mut series = ChainedSource::default();
        for path in &paths {
            let document = open_document(path).map_err(SeriesError::Io)?;
            let reader = SeriesReader::new(document, layout.clone(), self.profile.clone())?;
            last_update = last_update.max(reader.prepared());
            series.push(Box::new(reader));
        }
        debug!(dataset = %dataset_code, messages = paths.len(), "Dataset opened");

        Ok(DatasetSource {
            name,
            layout,
            last_update,
            series: Box::new(series),
        })
    }
}

/// Outcome of one dataset within a provider run
#[derive(Debug)]
pub enum DatasetOutcome {
    Stored(Box<Dataset>),
    Skipped(String),
    Failed(IngestError),
}

#[derive(Debug, Default)]
pub struct ProviderReport {
    pub provider: String,
    pub categories: usize,
    pub datasets: Vec<(String, DatasetOutcome)>,
    pub errors: usize,
    /// Provider disabled or locked, nothing ran
    pub skipped: bool,
}

pub struct ProviderRunner<'a> {
    ctx: &'a IngestContext,
    adapter: &'a dyn ProviderAdapter,
}

impl<'a> ProviderRunner<'a> {
    pub fn new(ctx: &'a IngestContext, adapter: &'a dyn ProviderAdapter) -> Self {
        Self { ctx, adapter }
    }

    /// Run the datasets in `codes`, or every dataset of the catalog.
    ///
    /// Fails with [`IngestError::MaxErrors`] once more datasets have failed
    /// than the configured budget allows; datasets after that one are not
    /// run.
    #[instrument(skip_all, fields(provider = %self.adapter.provider().name))]
    pub async fn run(&self, codes: Option<&[String]>) -> Result<ProviderReport> {
        let store = self.ctx.store.as_ref();
        let provider = store.upsert_provider(&self.adapter.provider()).await?;
        let mut report = ProviderReport {
            provider: provider.name.clone(),
            ..Default::default()
        };
        if !provider.is_runnable() {
            warn!(provider = %provider.name, "Provider disabled or locked, skipped");
            report.skipped = true;
            return Ok(report);
        }

        let tree = self.adapter.build_data_tree().await?;
        match tree.validate() {
            Ok(()) => {
                let categories = tree.to_categories(&provider.name);
                report.categories = store.replace_categories(&provider.name, &categories).await?;
            },
            Err(e) => error!(provider = %provider.name, error = %e, "Category tree rejected, categories kept"),
        }

        let listed = self.adapter.datasets_list().await?;
        let selected: Vec<String> = match codes {
            Some(codes) => codes.to_vec(),
            None => listed.iter().map(|d| d.code.clone()).collect(),
        };

        for code in selected {
            let outcome = match self.run_dataset(&provider.name, &code).await {
                Ok(outcome) => outcome,
                Err(IngestError::LockedDataset { .. }) => {
                    warn!(provider = %provider.name, dataset = %code, "Dataset locked, skipped");
                    DatasetOutcome::Skipped("locked".to_string())
                },
                Err(e) => {
                    report.errors += 1;
                    error!(
                        provider = %provider.name,
                        dataset = %code,
                        errors = report.errors,
                        error = %e,
                        "Dataset failed"
                    );
                    DatasetOutcome::Failed(e)
                },
            };
            report.datasets.push((code, outcome));

            if report.errors > self.ctx.config.max_errors {
                return Err(IngestError::MaxErrors {
                    provider: provider.name.clone(),
                    errors: report.errors,
                    max: self.ctx.config.max_errors,
                });
            }
        }

        info!(
            provider = %provider.name,
            datasets = report.datasets.len(),
            errors = report.errors,
            "Provider run finished"
        );
        Ok(report)
    }

    async fn run_dataset(&self, provider_name: &str, dataset_code: &str) -> Result<DatasetOutcome> {
        let mut run = DatasetRun::open(
            self.ctx.store.as_ref(),
            provider_name,
            dataset_code,
            self.ctx.config.reconcile_options(),
        )
        .await?;
        let mut source = self.adapter.open_dataset(dataset_code).await?;

        let known = run.dataset().last_update;
        if !self.ctx.config.force_update && known.is_some() && source.last_update == known {
            info!(dataset = %dataset_code, "Dataset not updated since last run, skipped");
            return Ok(DatasetOutcome::Skipped("not updated".to_string()));
        }

        run.set_name(source.name.clone());
        run.set_last_update(source.last_update);
        run.apply_layout(&source.layout);
        let dataset = run.update_database(source.series.as_mut()).await?;
        Ok(DatasetOutcome::Stored(Box::new(dataset)))
    }
}
