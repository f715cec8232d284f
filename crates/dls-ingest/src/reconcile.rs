//! Reconciliation of parsed series against stored state
//!
//! Records are taken from a [`SeriesSource`] in batches. For each batch the
//! stored versions of all its keys are fetched in one query, every record
//! gets a [`Decision`], and the resulting writes go out as two ordered bulk
//! writes: series first, then revision snapshots.
//!
//! Per-series outcomes:
//!
//! - no stored version: validated, inserted with `version = 0`
//! - stored version differs: old document archived verbatim, replaced in
//!   place under the same id with `version + 1` and its tags carried over
//! - stored version identical: counted as unchanged, nothing written
//!
//! With more than one worker the decisions of a batch are computed on the
//! blocking pool, in order, and joined before the flush. Keys repeated
//! within a batch are then re-decided one after another so the later record
//! sees the earlier one.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::error::{IngestError, SeriesError, StoreError, WriteStage};
use crate::models::{midnight_utc, slugify, RejectReason, RevisionArchiveEntry, RunStats, SeriesRecord, StoredSeries};
use crate::period::{period_start_date, PeriodError};
use crate::sdmx::SeriesSource;
use crate::store::{SeriesStore, SeriesWrite};

pub const DEFAULT_BATCH_SIZE: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOptions {
    pub batch_size: usize,
    /// More than one enables the parallel decision pool
    pub workers: usize,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            workers: 1,
        }
    }
}

/// Dataset-level values every decision needs
#[derive(Debug, Clone)]
pub struct DecisionContext {
    pub provider_name: String,
    pub dataset_code: String,
    /// Dataset-reported update time, used when a series carries none
    pub last_update: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Insert(StoredSeries),
    Update {
        series: StoredSeries,
        archive: RevisionArchiveEntry,
    },
    Unchanged,
    Invalid(String),
}

/// Structural checks applied before a record may be stored
pub fn validate(record: &SeriesRecord) -> Result<(), String> {
    if record.key.trim().is_empty() {
        return Err("empty series key".to_string());
    }
    let (Some(first), Some(last)) = (record.values.first(), record.values.last()) else {
        return Err("no observations".to_string());
    };
    if record.start_date > record.end_date {
        return Err(format!("start {} after end {}", record.start_date, record.end_date));
    }
    if first.ordinal != record.start_date || last.ordinal != record.end_date {
        return Err("start/end do not match first/last observation".to_string());
    }
    if record.values.windows(2).any(|w| w[0].ordinal > w[1].ordinal) {
        return Err("observations not sorted by period".to_string());
    }
    if let Some((k, _)) = record
        .dimensions
        .iter()
        .find(|(k, v)| k.trim().is_empty() || v.trim().is_empty())
    {
        return Err(format!("empty dimension '{}'", k));
    }
    Ok(())
}

fn to_stored(
    record: &SeriesRecord,
    id: Uuid,
    version: u32,
    tags: Vec<String>,
    ctx: &DecisionContext,
    now: DateTime<Utc>,
) -> Result<StoredSeries, PeriodError> {
    let start_ts = midnight_utc(period_start_date(record.start_date, record.frequency)?);
    let end_ts = midnight_utc(period_start_date(record.end_date, record.frequency)?);

    Ok(StoredSeries {
        id,
        provider_name: ctx.provider_name.clone(),
        dataset_code: ctx.dataset_code.clone(),
        key: record.key.clone(),
        slug: slugify(&format!("{}-{}-{}", ctx.provider_name, ctx.dataset_code, record.key)),
        name: record.name.clone(),
        frequency: record.frequency,
        dimensions: record.dimensions.clone(),
        attributes: record.attributes.clone(),
        values: record.values.clone(),
        start_date: record.start_date,
        end_date: record.end_date,
        start_ts,
        end_ts,
        last_update_ds: record.last_update_ds.or(ctx.last_update),
        last_update_widu: now,
        version,
        notes: record.notes.clone(),
        tags,
    })
}

/// Whether `candidate` differs from `previous` in anything a revision tracks
pub fn is_changed(previous: &StoredSeries, candidate: &StoredSeries) -> bool {
    // cheap checks first
    if previous.values.len() != candidate.values.len()
        || previous.start_date != candidate.start_date
        || previous.end_date != candidate.end_date
    {
        return true;
    }
    let first_last = |s: &StoredSeries| {
        (
            s.values.first().map(|o| o.period.clone()),
            s.values.last().map(|o| o.period.clone()),
        )
    };
    if first_last(previous) != first_last(candidate) {
        return true;
    }

    previous
        .values
        .iter()
        .zip(&candidate.values)
        .any(|(old, new)| old.period != new.period || old.value != new.value || old.attributes != new.attributes)
        || previous.frequency != candidate.frequency
        || previous.name != candidate.name
        || previous.dimensions != candidate.dimensions
        || previous.attributes != candidate.attributes
        || previous.notes != candidate.notes
}

/// Decide what to do with one record given its stored version
pub fn decide(
    record: &SeriesRecord,
    previous: Option<&StoredSeries>,
    ctx: &DecisionContext,
    now: DateTime<Utc>,
) -> Decision {
    if let Err(reason) = validate(record) {
        return Decision::Invalid(reason);
    }

    match previous {
        None => match to_stored(record, Uuid::new_v4(), 0, Vec::new(), ctx, now) {
            Ok(series) => Decision::Insert(series),
            Err(e) => Decision::Invalid(e.to_string()),
        },
        Some(previous) => {
            let candidate = match to_stored(
                record,
                previous.id,
                previous.version + 1,
                previous.tags.clone(),
                ctx,
                now,
            ) {
                Ok(series) => series,
                Err(e) => return Decision::Invalid(e.to_string()),
            };
            if !is_changed(previous, &candidate) {
                return Decision::Unchanged;
            }
            Decision::Update {
                archive: RevisionArchiveEntry::snapshot(previous, now),
                series: candidate,
            }
        },
    }
}

/// Writes produced by one batch
#[derive(Debug, Default)]
struct PendingBatch {
    ops: Vec<SeriesWrite>,
    archives: Vec<RevisionArchiveEntry>,
}

/// Drives one dataset's records through decisions and bulk writes
pub struct Reconciler<'a> {
    store: &'a dyn SeriesStore,
    ctx: DecisionContext,
    options: ReconcileOptions,
    stats: RunStats,
}

impl<'a> Reconciler<'a> {
    pub fn new(store: &'a dyn SeriesStore, ctx: DecisionContext, options: ReconcileOptions) -> Self {
        Self {
            store,
            ctx,
            options,
            stats: RunStats::default(),
        }
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    /// Consume `source` completely. Counters are kept in [`Self::stats`] even
    /// when an error is returned.
    #[instrument(skip_all, fields(provider = %self.ctx.provider_name, dataset = %self.ctx.dataset_code))]
    pub async fn run<S: SeriesSource + Send + ?Sized>(&mut self, source: &mut S) -> Result<RunStats, IngestError> {
        let started = Instant::now();
        let batch_size = self.options.batch_size.max(1);
        let mut batch = Vec::with_capacity(batch_size);
        let mut fatal = None;

        loop {
            let Some(item) = source.next() else {
                break;
            };
            match item {
                Ok(record) => {
                    batch.push(record);
                    if batch.len() >= batch_size {
                        let full = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
                        self.process_batch(full).await?;
                    }
                },
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "Data document failed, flushing pending batch");
                    fatal = Some(e);
                    break;
                },
                Err(e) => self.count_series_error(&e),
            }
        }

        if !batch.is_empty() {
            self.process_batch(batch).await?;
        }
        self.stats.finish(started.elapsed());

        if let Some(e) = fatal {
            return Err(e.into());
        }

        info!(
            accepts = self.stats.accepts,
            rejects = self.stats.rejects,
            inserts = self.stats.inserts,
            updates = self.stats.updates,
            errors = self.stats.errors,
            "Reconciliation finished"
        );
        Ok(self.stats.clone())
    }

    fn count_series_error(&mut self, e: &SeriesError) {
        match e {
            SeriesError::RejectFrequency { .. } => self.stats.reject(RejectReason::Frequency),
            SeriesError::RejectEmptySeries { .. } => self.stats.reject(RejectReason::EmptySeries),
            _ => {
                self.stats.errors += 1;
                warn!(key = ?e.series_key(), error = %e, "Series skipped");
            },
        }
        debug!(key = ?e.series_key(), reason = %e, "Series rejected");
    }

    async fn process_batch(&mut self, records: Vec<SeriesRecord>) -> Result<(), IngestError> {
        let mut keys: Vec<String> = Vec::with_capacity(records.len());
        let mut seen = HashSet::new();
        let mut repeated = HashSet::new();
        for record in &records {
            if seen.insert(record.key.clone()) {
                keys.push(record.key.clone());
            } else {
                repeated.insert(record.key.clone());
            }
        }

        let stored: HashMap<String, StoredSeries> = self
            .store
            .find_series(&self.ctx.provider_name, &self.ctx.dataset_code, &keys)
            .await?
            .into_iter()
            .map(|s| (s.key.clone(), s))
            .collect();
        let now = Utc::now();

        let decided = if self.options.workers > 1 {
            self.decide_parallel(records, &stored, now).await?
        } else {
            records
                .into_iter()
                .map(|r| {
                    let decision = decide(&r, stored.get(&r.key), &self.ctx, now);
                    (r, decision)
                })
                .collect()
        };

        // latest decided version per key in this batch
        let mut pending: HashMap<String, StoredSeries> = HashMap::new();
        let mut batch = PendingBatch::default();

        for (record, decision) in decided {
            let decision = if repeated.contains(&record.key) {
                let previous = pending.get(&record.key).or_else(|| stored.get(&record.key));
                decide(&record, previous, &self.ctx, now)
            } else {
                decision
            };

            match decision {
                Decision::Insert(series) => {
                    pending.insert(series.key.clone(), series.clone());
                    batch.ops.push(SeriesWrite::Insert(series));
                },
                Decision::Update { series, archive } => {
                    pending.insert(series.key.clone(), series.clone());
                    batch.ops.push(SeriesWrite::Replace(series));
                    batch.archives.push(archive);
                },
                Decision::Unchanged => self.stats.reject(RejectReason::Unchanged),
                Decision::Invalid(reason) => {
                    self.stats.errors += 1;
                    warn!(key = %record.key, %reason, "Invalid series");
                },
            }
        }

        self.flush(batch).await
    }

    async fn decide_parallel(
        &self,
        records: Vec<SeriesRecord>,
        stored: &HashMap<String, StoredSeries>,
        now: DateTime<Utc>,
    ) -> Result<Vec<(SeriesRecord, Decision)>, IngestError> {
        let tasks = records.into_iter().map(|record| {
            let previous = stored.get(&record.key).cloned();
            let ctx = self.ctx.clone();
            tokio::task::spawn_blocking(move || {
                let decision = decide(&record, previous.as_ref(), &ctx, now);
                (record, decision)
            })
        });

        stream::iter(tasks)
            .buffered(self.options.workers)
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .map(|joined| joined.map_err(|e| IngestError::Worker(e.to_string())))
            .collect()
    }

    #[instrument(skip_all, fields(series = batch.ops.len(), revisions = batch.archives.len()))]
    async fn flush(&mut self, batch: PendingBatch) -> Result<(), IngestError> {
        if batch.ops.is_empty() {
            return Ok(());
        }

        if let Err(e) = self.store.bulk_write_series(&batch.ops).await {
            self.log_failures(WriteStage::Series, &e);
            let failed = failed_positions(&e, batch.ops.len());
            let failed_ids: HashSet<Uuid> = failed
                .iter()
                .filter_map(|&i| batch.ops.get(i))
                .map(|op| op.series().id)
                .collect();

            for (i, op) in batch.ops.iter().enumerate() {
                if failed.contains(&i) {
                    self.stats.errors += 1;
                } else {
                    self.count_write(op);
                }
            }

            // snapshots of the updates that did land
            let landed: Vec<_> = batch
                .archives
                .into_iter()
                .filter(|a| !failed_ids.contains(&a.series_id))
                .collect();
            if !landed.is_empty() {
                match self.store.bulk_insert_revisions(&landed).await {
                    Ok(r) => self.stats.archived += r.inserted,
                    Err(archive_err) => self.log_failures(WriteStage::Revisions, &archive_err),
                }
            }

            let reason = format!("bulk write of series failed: {}", e);
            if let Err(disable_err) = self
                .store
                .disable_dataset(&self.ctx.provider_name, &self.ctx.dataset_code, &reason)
                .await
            {
                error!(error = %disable_err, "Failed to disable dataset after bulk write error");
            }
            return Err(IngestError::BulkWrite {
                stage: WriteStage::Series,
                source: e,
            });
        }

        for op in &batch.ops {
            self.count_write(op);
        }

        if !batch.archives.is_empty() {
            match self.store.bulk_insert_revisions(&batch.archives).await {
                Ok(r) => self.stats.archived += r.inserted,
                Err(e) => {
                    self.log_failures(WriteStage::Revisions, &e);
                    self.stats.archived += batch.archives.len() - e.failed_operations().len().min(batch.archives.len());
                    self.stats.errors += e.failed_operations().len();
                    return Err(IngestError::BulkWrite {
                        stage: WriteStage::Revisions,
                        source: e,
                    });
                },
            }
        }

        debug!(
            inserts = self.stats.inserts,
            updates = self.stats.updates,
            archived = self.stats.archived,
            "Batch flushed"
        );
        Ok(())
    }

    fn count_write(&mut self, op: &SeriesWrite) {
        self.stats.accepts += 1;
        match op {
            SeriesWrite::Insert(_) => self.stats.inserts += 1,
            SeriesWrite::Replace(_) => self.stats.updates += 1,
        }
    }

    fn log_failures(&self, stage: WriteStage, e: &StoreError) {
        let failed = e.failed_operations();
        if failed.is_empty() {
            error!(
                provider = %self.ctx.provider_name,
                dataset = %self.ctx.dataset_code,
                %stage,
                error = %e,
                "Bulk write failed"
            );
        }
        for op in failed {
            error!(
                provider = %self.ctx.provider_name,
                dataset = %self.ctx.dataset_code,
                %stage,
                index = op.index,
                kind = op.kind,
                key = %op.key,
                error = %op.message,
                "Bulk write operation failed"
            );
        }
    }
}

/// Batch positions a failed bulk write did not apply. An error without a
/// usable per-operation list counts the whole batch as failed.
fn failed_positions(e: &StoreError, len: usize) -> HashSet<usize> {
    let reported = e.failed_operations();
    if reported.is_empty() {
        return (0..len).collect();
    }
    if let Some(bad) = reported.iter().find(|f| f.index >= len) {
        warn!(index = bad.index, batch = len, "Store reported an unknown operation index");
        return (0..len).collect();
    }
    reported.iter().map(|f| f.index).collect()
}
