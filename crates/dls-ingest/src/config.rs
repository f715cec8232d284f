//! Ingestion configuration
//!
//! Loaded from `DLS_*` environment variables (after `.env`, when present).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::fetch::DEFAULT_CACHE_TTL;
use crate::reconcile::{ReconcileOptions, DEFAULT_BATCH_SIZE};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestConfig {
    /// Series per reconciliation batch
    pub batch_size: usize,
    /// Fatal dataset errors a provider run tolerates
    pub max_errors: usize,
    /// Decision workers per batch, 1 keeps decisions on the calling task
    pub workers: usize,
    pub cache_dir: PathBuf,
    /// Age after which cached downloads are revalidated
    pub cache_ttl_secs: u64,
    pub http_timeout_secs: u64,
    /// Re-run datasets whose reported update time has not moved
    pub force_update: bool,
    pub database_url: Option<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_errors: 10,
            workers: 1,
            cache_dir: PathBuf::from("./cache"),
            cache_ttl_secs: DEFAULT_CACHE_TTL.as_secs(),
            http_timeout_secs: 120,
            force_update: false,
            database_url: None,
        }
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid {}='{}': {}", name, raw, e)),
        Err(_) => Ok(default),
    }
}

impl IngestConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();

        let config = Self {
            batch_size: env_or("DLS_BATCH_SIZE", defaults.batch_size)?,
            max_errors: env_or("DLS_MAX_ERRORS", defaults.max_errors)?,
            workers: env_or("DLS_WORKERS", defaults.workers)?,
            cache_dir: std::env::var("DLS_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),
            cache_ttl_secs: env_or("DLS_CACHE_TTL_SECS", defaults.cache_ttl_secs)?,
            http_timeout_secs: env_or("DLS_HTTP_TIMEOUT_SECS", defaults.http_timeout_secs)?,
            force_update: env_or("DLS_FORCE_UPDATE", defaults.force_update)?,
            database_url: std::env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.batch_size == 0 {
            anyhow::bail!("DLS_BATCH_SIZE must be greater than 0");
        }
        if self.workers == 0 {
            anyhow::bail!("DLS_WORKERS must be greater than 0");
        }
        if self.http_timeout_secs == 0 {
            anyhow::bail!("DLS_HTTP_TIMEOUT_SECS must be greater than 0");
        }
        Ok(())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Forced updates never trust the download cache
    pub fn cache_max_age(&self) -> Duration {
        if self.force_update {
            Duration::ZERO
        } else {
            Duration::from_secs(self.cache_ttl_secs)
        }
    }

    pub fn reconcile_options(&self) -> ReconcileOptions {
        ReconcileOptions {
            batch_size: self.batch_size,
            workers: self.workers,
        }
    }
}
