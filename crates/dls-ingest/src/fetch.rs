//! Document download and fetch strategies

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use reqwest::header::IF_MODIFIED_SINCE;
use reqwest::{Client, StatusCode};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use dls_common::checksum::{cache_key_digest, compute_file_checksum};

use crate::error::DownloadError;
use crate::provider::ProviderProfile;
use crate::sdmx::CodelistRef;

const USER_AGENT: &str = "DLS-Ingest/0.1";

/// Age after which a cached document is revalidated
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Turns a URL into a local file
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Local path holding the document behind `url`. Implementations may
    /// reuse an earlier download stored under the same `cache_key`.
    async fn fetch(&self, url: &str, cache_key: &str) -> Result<PathBuf, DownloadError>;
}

/// HTTP downloader with an on-disk cache.
///
/// A cached document younger than `max_age` is reused as is. An older one
/// is revalidated with `If-Modified-Since`: a 304 keeps it, anything else
/// replaces it.
pub struct HttpDownloader {
    client: Client,
    cache_dir: PathBuf,
    max_age: Duration,
}

impl HttpDownloader {
    pub fn new(cache_dir: impl Into<PathBuf>, timeout: Duration) -> Result<Self, DownloadError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self::with_client(client, cache_dir))
    }

    pub fn with_client(client: Client, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            cache_dir: cache_dir.into(),
            max_age: DEFAULT_CACHE_TTL,
        }
    }

    /// Zero revalidates on every fetch
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    fn is_fresh(&self, modified: SystemTime) -> bool {
        // a timestamp in the future counts as fresh
        modified.elapsed().map(|age| age < self.max_age).unwrap_or(true)
    }

    pub fn cache_path(&self, cache_key: &str) -> PathBuf {
        self.cache_dir.join(cache_key_digest(cache_key))
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn fetch(&self, url: &str, cache_key: &str) -> Result<PathBuf, DownloadError> {
        let target = self.cache_path(cache_key);
        let cached = cached_at(&target).await?;
        if let Some(modified) = cached {
            if self.is_fresh(modified) {
                debug!(%url, path = %target.display(), "Reusing cached document");
                return Ok(target);
            }
        }

        info!(%url, revalidate = cached.is_some(), "Downloading");
        let mut request = self.client.get(url);
        if let Some(modified) = cached {
            request = request.header(IF_MODIFIED_SINCE, http_date(modified));
        }
        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::NOT_MODIFIED && cached.is_some() {
            debug!(%url, path = %target.display(), "Cached document not modified");
            return Ok(target);
        }
        if !status.is_success() {
            return Err(DownloadError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        tokio::fs::create_dir_all(&self.cache_dir).await?;
        // partial downloads never land under the cache name
        let partial = target.with_extension("part");
        let mut file = tokio::fs::File::create(&partial).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0usize;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            written += chunk.len();
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        drop(file);
        tokio::fs::rename(&partial, &target).await?;

        let hashed = target.clone();
        match tokio::task::spawn_blocking(move || compute_file_checksum(hashed)).await {
            Ok(Ok(sha256)) => {
                info!(%url, bytes = written, %sha256, path = %target.display(), "Downloaded")
            },
            Ok(Err(e)) => warn!(%url, error = %e, "Downloaded but could not checksum"),
            Err(e) => warn!(%url, error = %e, "Checksum task failed"),
        }
        Ok(target)
    }
}

/// Modification time of a cached document, `None` when absent
async fn cached_at(path: &Path) -> Result<Option<SystemTime>, DownloadError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(Some(meta.modified()?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// IMF-fixdate, as HTTP conditional headers expect
fn http_date(time: SystemTime) -> String {
    DateTime::<Utc>::from(time)
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

/// Resolves `file://` URLs and paths relative to a root directory
#[derive(Debug, Clone)]
pub struct LocalDownloader {
    root: PathBuf,
}

impl LocalDownloader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Downloader for LocalDownloader {
    async fn fetch(&self, url: &str, _cache_key: &str) -> Result<PathBuf, DownloadError> {
        let raw = url.strip_prefix("file://").unwrap_or(url);
        let path = Path::new(raw);
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };

        if tokio::fs::try_exists(&path).await? {
            Ok(path)
        } else {
            Err(DownloadError::NotFound(path.display().to_string()))
        }
    }
}

/// One data query of a sharded download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shard {
    pub code: String,
    pub url: String,
    pub cache_key: String,
}

/// Splits a dataset download into one query per code of a dimension.
///
/// A 4xx answer means the shard has no data and it is skipped. Anything
/// else that fails aborts the whole fetch.
#[derive(Debug, Clone, Default)]
pub struct ShardedFetch {
    shards: Vec<Shard>,
}

impl ShardedFetch {
    /// One shard per code, the code placed at the shard dimension's position
    /// of an otherwise wildcarded key
    pub fn for_dimension(
        profile: &ProviderProfile,
        dataset_code: &str,
        dimension_keys: &[String],
        codes: &[String],
    ) -> Option<Self> {
        let dimension = profile.shard_dimension.as_deref()?;
        let position = dimension_keys.iter().position(|k| k == dimension)?;

        let shards = codes
            .iter()
            .filter_map(|code| {
                let key = dimension_keys
                    .iter()
                    .enumerate()
                    .map(|(i, _)| if i == position { code.as_str() } else { "" })
                    .collect::<Vec<_>>()
                    .join(".");
                let url = profile.data_url(dataset_code, &key)?;
                Some(Shard {
                    code: code.clone(),
                    cache_key: format!("{}/{}/{}", profile.name, dataset_code, code),
                    url,
                })
            })
            .collect();

        Some(Self { shards })
    }

    pub fn from_shards(shards: Vec<Shard>) -> Self {
        Self { shards }
    }

    pub fn shards(&self) -> &[Shard] {
        &self.shards
    }

    /// Fetch every shard in order, returning the code and path of those
    /// that exist
    pub async fn fetch_all(&self, downloader: &dyn Downloader) -> Result<Vec<(String, PathBuf)>, DownloadError> {
        let mut fetched = Vec::with_capacity(self.shards.len());
        for shard in &self.shards {
            match downloader.fetch(&shard.url, &shard.cache_key).await {
                Ok(path) => fetched.push((shard.code.clone(), path)),
                Err(e) if e.is_client_error() => {
                    warn!(shard = %shard.code, url = %shard.url, error = %e, "Shard skipped");
                },
                Err(e) => return Err(e),
            }
        }
        Ok(fetched)
    }
}

/// Source of codelists referenced but not included in a structure message
#[async_trait]
pub trait CodelistResolver: Send + Sync {
    /// Raw structure message containing the codelist
    async fn fetch_codelist(&self, reference: &CodelistRef) -> Result<Vec<u8>, DownloadError>;
}

/// Structure-query endpoint `{base}/codelist/{agency}/{id}/{version}`
pub struct HttpCodelistResolver {
    client: Client,
    base_url: String,
}

impl HttpCodelistResolver {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn url_for(&self, reference: &CodelistRef) -> String {
        format!(
            "{}/codelist/{}/{}/{}",
            self.base_url,
            reference.agency.as_deref().unwrap_or("all"),
            reference.id,
            reference.version.as_deref().unwrap_or("latest"),
        )
    }
}

#[async_trait]
impl CodelistResolver for HttpCodelistResolver {
    async fn fetch_codelist(&self, reference: &CodelistRef) -> Result<Vec<u8>, DownloadError> {
        let url = self.url_for(reference);
        debug!(%url, "Fetching codelist");
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Status {
                url,
                status: status.as_u16(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }
}
