//! Persisted and transient record types
//!
//! Field names follow the stored document shapes: a [`Dataset`] and a
//! [`StoredSeries`] serialize to the same JSON the storage gateway keeps.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::codes::CodeDict;
use crate::period::Frequency;

/// Lowercase ASCII slug with runs of other characters collapsed to `-`
pub fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    let mut pending_dash = false;
    for c in value.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

/// UTC midnight of a calendar day
pub fn midnight_utc(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}

/// A statistics publisher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provider {
    pub name: String,
    pub long_name: String,
    pub slug: String,
    pub version: u32,
    pub region: Option<String>,
    pub website: Option<String>,
    pub enable: bool,
    pub lock: bool,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Provider {
    pub fn new(name: impl Into<String>, long_name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            slug: slugify(&name),
            name,
            long_name: long_name.into(),
            version: 1,
            region: None,
            website: None,
            enable: true,
            lock: false,
            metadata: BTreeMap::new(),
        }
    }

    pub fn is_runnable(&self) -> bool {
        self.enable && !self.lock
    }
}

/// One node of a provider's catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub provider_name: String,
    pub category_code: String,
    pub name: String,
    pub slug: String,
    /// Code of the parent node, `None` for roots
    pub parent: Option<String>,
    pub position: u32,
    #[serde(default)]
    pub datasets: Vec<String>,
}

/// Unit of ingestion, keyed by (provider_name, dataset_code)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub provider_name: String,
    pub dataset_code: String,
    pub slug: String,
    pub name: String,
    pub dimension_keys: Vec<String>,
    pub attribute_keys: Vec<String>,
    pub codelists: CodeDict,
    pub concepts: BTreeMap<String, String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub last_update: Option<DateTime<Utc>>,
    pub download_first: Option<DateTime<Utc>>,
    pub download_last: Option<DateTime<Utc>>,
    pub enable: bool,
    pub lock: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Why the last run left the dataset disabled
    pub disable_reason: Option<String>,
    pub last_run: Option<RunStats>,
}

impl Dataset {
    pub fn new(provider_name: impl Into<String>, dataset_code: impl Into<String>) -> Self {
        let provider_name = provider_name.into();
        let dataset_code = dataset_code.into();
        Self {
            slug: slugify(&format!("{}-{}", provider_name, dataset_code)),
            name: dataset_code.clone(),
            provider_name,
            dataset_code,
            dimension_keys: Vec::new(),
            attribute_keys: Vec::new(),
            codelists: CodeDict::new(),
            concepts: BTreeMap::new(),
            metadata: BTreeMap::new(),
            last_update: None,
            download_first: None,
            download_last: None,
            enable: true,
            lock: false,
            tags: Vec::new(),
            disable_reason: None,
            last_run: None,
        }
    }
}

/// One observation of a series
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub period: String,
    pub ordinal: i64,
    pub value: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// A parsed series, alive only until reconciliation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesRecord {
    pub key: String,
    pub name: String,
    pub frequency: Frequency,
    pub dimensions: BTreeMap<String, String>,
    pub attributes: BTreeMap<String, String>,
    pub values: Vec<Observation>,
    pub start_date: i64,
    pub end_date: i64,
    pub notes: Option<String>,
    pub last_update_ds: Option<DateTime<Utc>>,
}

/// A series as kept by the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSeries {
    pub id: Uuid,
    pub provider_name: String,
    pub dataset_code: String,
    pub key: String,
    pub slug: String,
    pub name: String,
    pub frequency: Frequency,
    pub dimensions: BTreeMap<String, String>,
    pub attributes: BTreeMap<String, String>,
    pub values: Vec<Observation>,
    pub start_date: i64,
    pub end_date: i64,
    pub start_ts: DateTime<Utc>,
    pub end_ts: DateTime<Utc>,
    pub last_update_ds: Option<DateTime<Utc>>,
    pub last_update_widu: DateTime<Utc>,
    pub version: u32,
    pub notes: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Snapshot of a superseded [`StoredSeries`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisionArchiveEntry {
    pub id: Uuid,
    pub series_id: Uuid,
    pub provider_name: String,
    pub dataset_code: String,
    pub key: String,
    pub version: u32,
    pub archived_at: DateTime<Utc>,
    pub document: StoredSeries,
}

impl RevisionArchiveEntry {
    pub fn snapshot(previous: &StoredSeries, archived_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            series_id: previous.id,
            provider_name: previous.provider_name.clone(),
            dataset_code: previous.dataset_code.clone(),
            key: previous.key.clone(),
            version: previous.version,
            archived_at,
            document: previous.clone(),
        }
    }
}

/// Why a parsed series was not written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    Frequency,
    EmptySeries,
    Unchanged,
}

/// Counters of one dataset run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub accepts: usize,
    pub rejects: usize,
    pub rejects_by_reason: BTreeMap<RejectReason, usize>,
    pub inserts: usize,
    pub updates: usize,
    pub errors: usize,
    pub archived: usize,
    pub elapsed_ms: u64,
    /// Parsed series per second
    pub throughput: f64,
}

impl RunStats {
    pub fn reject(&mut self, reason: RejectReason) {
        self.rejects += 1;
        *self.rejects_by_reason.entry(reason).or_insert(0) += 1;
    }

    pub fn rejected(&self, reason: RejectReason) -> usize {
        self.rejects_by_reason.get(&reason).copied().unwrap_or(0)
    }

    pub fn changed(&self) -> usize {
        self.inserts + self.updates
    }

    pub fn processed(&self) -> usize {
        self.accepts + self.rejects + self.errors
    }

    pub fn finish(&mut self, elapsed: std::time::Duration) {
        self.elapsed_ms = elapsed.as_millis() as u64;
        let secs = elapsed.as_secs_f64();
        self.throughput = if secs > 0.0 {
            self.processed() as f64 / secs
        } else {
            0.0
        };
    }
}
