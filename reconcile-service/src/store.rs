//! Canonical series persistence: read, merge in memory, rewrite.
//!
//! Every series lives in one flat CSV file under the data directory. A merge
//! holds that series' lock from read to rename, so two merges into the same
//! file never interleave; different series never contend.

use std::{
    collections::{BTreeMap, HashMap},
    fs,
    io::BufWriter,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use serde::Deserialize;
use series_client::{
    row::{read_series, write_series},
    CsvRow, Timestamped,
};
use time::OffsetDateTime;

use crate::pipeline::PipelineError;

/// How records with the same key are reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    /// Key is the whole persisted row; only identical rows collapse.
    ExactRow,
    /// Key is the timestamp; the most recently normalized record wins.
    #[default]
    LastWriteWins,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub existing: usize,
    pub incoming: usize,
    /// Keys that were not present before.
    pub added: usize,
    /// Same timestamp, different values; resolved in favour of the incoming record.
    pub conflicts: usize,
    pub total: usize,
}

/// Merges `incoming` into `existing`.
///
/// The result is sorted by timestamp and its key never repeats. Values are
/// compared in their persisted form so rounding noise is not a conflict.
pub fn merge<R>(existing: Vec<R>, incoming: Vec<R>, policy: DedupPolicy) -> (Vec<R>, MergeReport)
where
    R: Timestamped + CsvRow,
{
    let mut report = MergeReport {
        existing: existing.len(),
        incoming: incoming.len(),
        ..MergeReport::default()
    };

    let merged: Vec<R> = match policy {
        DedupPolicy::ExactRow => {
            let mut by_row: BTreeMap<(OffsetDateTime, Vec<String>), R> = BTreeMap::new();
            for r in existing {
                by_row.entry((r.timestamp(), r.to_row())).or_insert(r);
            }
            for r in incoming {
                let key = (r.timestamp(), r.to_row());
                if !by_row.contains_key(&key) {
                    by_row.insert(key, r);
                    report.added += 1;
                }
            }
            by_row.into_values().collect()
        }
        DedupPolicy::LastWriteWins => {
            let mut by_ts: BTreeMap<OffsetDateTime, R> = BTreeMap::new();
            for r in existing {
                by_ts.insert(r.timestamp(), r);
            }
            for r in incoming {
                let ts = r.timestamp();
                match by_ts.get(&ts) {
                    None => report.added += 1,
                    Some(old) if old.to_row() != r.to_row() => {
                        report.conflicts += 1;
                        tracing::debug!(ts = %ts, "merge conflict, keeping newer record");
                    }
                    Some(_) => {}
                }
                by_ts.insert(ts, r);
            }
            by_ts.into_values().collect()
        }
    };

    report.total = merged.len();
    (merged, report)
}

pub struct SeriesStore {
    data_dir: PathBuf,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SeriesStore {
    pub fn new<P: Into<PathBuf>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn path(&self, series: &str) -> PathBuf {
        self.data_dir.join(format!("{series}.csv"))
    }

    fn lock_for(&self, series: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(series.to_string()).or_default().clone()
    }

    /// Loads a series; a series that was never written is empty.
    pub async fn load<R>(&self, series: &str) -> Result<Vec<R>, PipelineError>
    where
        R: CsvRow + Send + 'static,
    {
        let lock = self.lock_for(series);
        let _guard = lock.lock().await;

        let path = self.path(series);
        blocking(move || read_file(&path)).await
    }

    pub async fn merge_into<R>(
        &self,
        series: &str,
        incoming: Vec<R>,
        policy: DedupPolicy,
    ) -> Result<MergeReport, PipelineError>
    where
        R: Timestamped + CsvRow + Send + 'static,
    {
        let lock = self.lock_for(series);
        let _guard = lock.lock().await;

        let path = self.path(series);
        let report = blocking(move || {
            let existing: Vec<R> = read_file(&path)?;
            let (merged, report) = merge(existing, incoming, policy);
            write_file(&path, &merged)?;
            Ok(report)
        })
        .await?;

        if report.conflicts > 0 {
            metrics::counter!("merge_conflicts_total", "series" => series.to_string())
                .increment(report.conflicts as u64);
            tracing::warn!(series, conflicts = report.conflicts, "replaced records with corrected values");
        }
        metrics::counter!("canonical_records_written_total", "series" => series.to_string())
            .increment(report.total as u64);
        tracing::info!(
            series,
            existing = report.existing,
            incoming = report.incoming,
            added = report.added,
            total = report.total,
            "canonical series merged"
        );

        Ok(report)
    }

    /// Replaces a series wholesale. Used for series derived from other series.
    pub async fn overwrite<R>(&self, series: &str, records: &[R]) -> Result<usize, PipelineError>
    where
        R: CsvRow + Clone + Send + 'static,
    {
        let lock = self.lock_for(series);
        let _guard = lock.lock().await;

        let path = self.path(series);
        let owned = records.to_vec();
        blocking(move || write_file(&path, &owned)).await?;
        metrics::counter!("canonical_records_written_total", "series" => series.to_string())
            .increment(records.len() as u64);
        tracing::info!(series, total = records.len(), "canonical series rewritten");
        Ok(records.len())
    }
}

/// Runs file work on the blocking pool; the caller keeps holding the series
/// lock across the await.
async fn blocking<T, F>(work: F) -> Result<T, PipelineError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, PipelineError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| PipelineError::Sink(format!("store task failed: {e}")))?
}

fn read_file<R: CsvRow>(path: &Path) -> Result<Vec<R>, PipelineError> {
    let file = match fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(PipelineError::Sink(format!("failed to open {}: {e}", path.display()))),
    };
    read_series(file).map_err(|e| PipelineError::Sink(format!("failed to read {}: {e}", path.display())))
}

/// Writes next to the target and renames over it, so readers only ever see
/// a complete file.
fn write_file<R: CsvRow>(path: &Path, records: &[R]) -> Result<(), PipelineError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| PipelineError::Sink(format!("failed to create {}: {e}", parent.display())))?;
    }

    let tmp = path.with_extension("csv.tmp");
    let file = fs::File::create(&tmp)
        .map_err(|e| PipelineError::Sink(format!("failed to create {}: {e}", tmp.display())))?;
    let stored = write_series(records, BufWriter::new(file))
        .map_err(|e| PipelineError::Sink(format!("failed to write {}: {e}", tmp.display())))
        .and_then(|()| {
            fs::rename(&tmp, path)
                .map_err(|e| PipelineError::Sink(format!("failed to replace {}: {e}", path.display())))
        });
    if stored.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    stored
}

#[cfg(test)]
mod tests {
    use super::*;
    use series_client::{ConsumptionRecord, PriceRecord};
    use time::macros::datetime;

    fn price(ts: OffsetDateTime, v: f64) -> PriceRecord {
        PriceRecord {
            start: ts,
            price_eur_per_mwh: v,
        }
    }

    fn sample_series() -> Vec<PriceRecord> {
        vec![
            price(datetime!(2024-04-01 00:00:00 UTC), 40.0),
            price(datetime!(2024-04-01 00:15:00 UTC), 41.5),
            price(datetime!(2024-04-01 00:30:00 UTC), 39.25),
        ]
    }

    #[test]
    fn merging_a_series_with_itself_is_identity() {
        for policy in [DedupPolicy::ExactRow, DedupPolicy::LastWriteWins] {
            let s = sample_series();
            let (merged, report) = merge(s.clone(), s.clone(), policy);
            assert_eq!(merged, s);
            assert_eq!(report.added, 0);
            assert_eq!(report.conflicts, 0);
        }
    }

    #[test]
    fn merging_nothing_is_a_noop() {
        for policy in [DedupPolicy::ExactRow, DedupPolicy::LastWriteWins] {
            let s = sample_series();
            let (merged, report) = merge(s.clone(), Vec::new(), policy);
            assert_eq!(merged, s);
            assert_eq!(report.total, 3);
        }
    }

    #[test]
    fn merging_the_same_batch_twice_equals_merging_once() {
        let incoming = vec![
            price(datetime!(2024-04-01 00:30:00 UTC), 50.0),
            price(datetime!(2024-04-01 00:45:00 UTC), 51.0),
        ];
        for policy in [DedupPolicy::ExactRow, DedupPolicy::LastWriteWins] {
            let (once, _) = merge(sample_series(), incoming.clone(), policy);
            let (twice, report) = merge(once.clone(), incoming.clone(), policy);
            assert_eq!(twice, once);
            assert_eq!(report.added, 0);
        }
    }

    #[test]
    fn last_write_wins_counts_conflict_and_keeps_newer_value() {
        let incoming = vec![price(datetime!(2024-04-01 00:15:00 UTC), 99.0)];
        let (merged, report) = merge(sample_series(), incoming, DedupPolicy::LastWriteWins);

        assert_eq!(merged.len(), 3);
        assert_eq!(merged[1].price_eur_per_mwh, 99.0);
        assert_eq!(report.conflicts, 1);
        assert_eq!(report.added, 0);
    }

    #[test]
    fn exact_row_keeps_both_rows_when_values_differ() {
        let incoming = vec![price(datetime!(2024-04-01 00:15:00 UTC), 99.0)];
        let (merged, report) = merge(sample_series(), incoming, DedupPolicy::ExactRow);

        assert_eq!(merged.len(), 4);
        assert_eq!(report.added, 1);
        assert!(merged.windows(2).all(|w| w[0].start <= w[1].start));
    }

    #[test]
    fn output_is_sorted_even_when_input_is_not() {
        let mut shuffled = sample_series();
        shuffled.reverse();
        let (merged, _) = merge(Vec::new(), shuffled, DedupPolicy::LastWriteWins);
        assert_eq!(merged, sample_series());
    }

    #[test]
    fn rounding_noise_is_not_a_conflict() {
        let existing = vec![ConsumptionRecord {
            start: datetime!(2024-04-01 00:00:00 UTC),
            consumption_kwh: 0.125,
            injection_kwh: 0.0,
        }];
        let incoming = vec![ConsumptionRecord {
            start: datetime!(2024-04-01 00:00:00 UTC),
            consumption_kwh: 0.12500001,
            injection_kwh: 0.0,
        }];
        let (_, report) = merge(existing, incoming, DedupPolicy::LastWriteWins);
        assert_eq!(report.conflicts, 0);
    }

    #[tokio::test]
    async fn store_round_trips_and_writes_empty_series_when_nothing_arrives() {
        let dir = tempfile::tempdir().unwrap();
        let store = SeriesStore::new(dir.path());

        let report = store
            .merge_into::<PriceRecord>("energy_prices", Vec::new(), DedupPolicy::LastWriteWins)
            .await
            .unwrap();
        assert_eq!(report.total, 0);
        let contents = fs::read_to_string(store.path("energy_prices")).unwrap();
        assert_eq!(contents.trim(), "starting_datetime,eur_per_mwh");

        store
            .merge_into("energy_prices", sample_series(), DedupPolicy::LastWriteWins)
            .await
            .unwrap();
        let loaded: Vec<PriceRecord> = store.load("energy_prices").await.unwrap();
        assert_eq!(loaded, sample_series());
        assert!(!store.path("energy_prices").with_extension("csv.tmp").exists());
    }

    #[tokio::test]
    async fn failed_rewrite_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = SeriesStore::new(dir.path());
        // A directory in place of the series file makes the final rename fail.
        fs::create_dir_all(store.path("energy_prices").join("occupied")).unwrap();

        let err = store
            .merge_into("energy_prices", sample_series(), DedupPolicy::LastWriteWins)
            .await;
        assert!(matches!(err, Err(PipelineError::Sink(_))));
        assert!(!store.path("energy_prices").with_extension("csv.tmp").exists());

        let err = store.overwrite("energy_prices", &sample_series()).await;
        assert!(err.is_err());
        assert!(!store.path("energy_prices").with_extension("csv.tmp").exists());
    }

    #[tokio::test]
    async fn concurrent_merges_into_one_series_do_not_lose_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SeriesStore::new(dir.path()));

        let mut handles = Vec::new();
        for i in 0..8i64 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let ts = datetime!(2024-04-01 00:00:00 UTC) + time::Duration::minutes(15 * i);
                store
                    .merge_into("energy_prices", vec![price(ts, i as f64)], DedupPolicy::LastWriteWins)
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let loaded: Vec<PriceRecord> = store.load("energy_prices").await.unwrap();
        assert_eq!(loaded.len(), 8);
    }
}
