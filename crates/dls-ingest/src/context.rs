//! Shared handles for one ingestion process
//!
//! Built once by the driver and passed to every provider and dataset run.

use reqwest::Client;
use std::sync::Arc;

use crate::config::IngestConfig;
use crate::error::DownloadError;
use crate::fetch::{Downloader, HttpCodelistResolver, HttpDownloader};
use crate::provider::ProviderProfile;
use crate::store::SeriesStore;

#[derive(Clone)]
pub struct IngestContext {
    pub store: Arc<dyn SeriesStore>,
    pub downloader: Arc<dyn Downloader>,
    pub http: Client,
    pub config: IngestConfig,
}

impl IngestContext {
    pub fn new(store: Arc<dyn SeriesStore>, downloader: Arc<dyn Downloader>, config: IngestConfig) -> Self {
        Self {
            store,
            downloader,
            http: Client::new(),
            config,
        }
    }

    /// HTTP client and cached downloader from `config`
    pub fn with_http(store: Arc<dyn SeriesStore>, config: IngestConfig) -> Result<Self, DownloadError> {
        let http = Client::builder()
            .timeout(config.http_timeout())
            .user_agent("DLS-Ingest/0.1")
            .build()?;
        let downloader =
            HttpDownloader::with_client(http.clone(), config.cache_dir.clone()).with_max_age(config.cache_max_age());
        Ok(Self {
            store,
            downloader: Arc::new(downloader),
            http,
            config,
        })
    }

    /// Remote codelist resolver of a provider, when it publishes a structure API
    pub fn codelist_resolver(&self, profile: &ProviderProfile) -> Option<HttpCodelistResolver> {
        profile
            .structure_url
            .as_ref()
            .map(|base| HttpCodelistResolver::new(self.http.clone(), base.clone()))
    }
}
