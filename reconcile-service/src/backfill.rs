//! Planning and downloading of missing dated raw files.

use std::path::{Path, PathBuf};

use futures::StreamExt;
use time::Date;
use tracing::{info, warn};

use crate::{
    fetch::RawFetcher,
    pipeline::PipelineError,
    sources::{day_ahead_price, DayAheadPriceNormalizer, Normalize},
};

/// Dates in `[start, end]` for which `probe` says the input is absent,
/// ascending. Empty when `start > end`.
pub fn missing_dates<F>(start: Date, end: Date, probe: F) -> Vec<Date>
where
    F: Fn(Date) -> bool,
{
    let mut out = Vec::new();
    let mut day = Some(start);
    while let Some(d) = day.filter(|d| *d <= end) {
        if !probe(d) {
            out.push(d);
        }
        day = d.next_day();
    }
    out
}

/// Checks downloaded bytes before they are stored under a dated name.
pub type ContentCheck = fn(origin: &str, raw: &[u8]) -> Result<(), PipelineError>;

/// Where the raw file for a given date lives, and what a storable file looks
/// like.
#[derive(Debug, Clone)]
pub struct RawFileLayout {
    dir: PathBuf,
    file_name: fn(Date) -> String,
    check: ContentCheck,
}

impl RawFileLayout {
    pub fn new<P: Into<PathBuf>>(dir: P, file_name: fn(Date) -> String, check: ContentCheck) -> Self {
        Self {
            dir: dir.into(),
            file_name,
            check,
        }
    }

    /// Only bodies the price normalizer accepts are stored.
    pub fn day_ahead_prices<P: Into<PathBuf>>(dir: P) -> Self {
        Self::new(dir, day_ahead_price::file_name, |origin, raw| {
            DayAheadPriceNormalizer.normalize(origin, raw).map(|_| ())
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, date: Date) -> PathBuf {
        self.dir.join((self.file_name)(date))
    }

    pub fn exists(&self, date: Date) -> bool {
        self.path(date).is_file()
    }

    pub fn missing(&self, start: Date, end: Date) -> Vec<Date> {
        missing_dates(start, end, |d| self.exists(d))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackfillReport {
    pub fetched: Vec<Date>,
    /// Not published by the provider yet.
    pub unavailable: Vec<Date>,
    pub failed: Vec<(Date, String)>,
}

enum Outcome {
    Fetched,
    Unavailable,
    Failed(String),
}

/// Fetches every date with at most `workers` requests in flight.
///
/// Each date lands in its own file through a temp file and a rename, so a
/// failed date leaves nothing behind and is picked up again by the next
/// plan, while a fetched date is never requested again. A body the layout's
/// check rejects (an error page served with status 200, say) counts as
/// failed and is not stored.
pub async fn download_missing<F>(dates: Vec<Date>, fetcher: &F, layout: &RawFileLayout, workers: usize) -> BackfillReport
where
    F: RawFetcher + ?Sized,
{
    if dates.is_empty() {
        return BackfillReport::default();
    }
    if let Err(e) = tokio::fs::create_dir_all(layout.dir()).await {
        warn!(dir = %layout.dir().display(), error = %e, "cannot create raw directory");
        let failed = dates.into_iter().map(|d| (d, e.to_string())).collect();
        return BackfillReport {
            failed,
            ..BackfillReport::default()
        };
    }

    let outcomes: Vec<(Date, Outcome)> = futures::stream::iter(dates)
        .map(|date| async move {
            let outcome = match fetch_one(fetcher, layout, date).await {
                Ok(true) => Outcome::Fetched,
                Ok(false) => Outcome::Unavailable,
                Err(e) => {
                    warn!(%date, error = %e, "backfill fetch failed");
                    metrics::counter!("backfill_fetch_failures_total").increment(1);
                    Outcome::Failed(e.to_string())
                }
            };
            (date, outcome)
        })
        .buffer_unordered(workers.max(1))
        .collect()
        .await;

    let mut report = BackfillReport::default();
    for (date, outcome) in outcomes {
        match outcome {
            Outcome::Fetched => report.fetched.push(date),
            Outcome::Unavailable => report.unavailable.push(date),
            Outcome::Failed(e) => report.failed.push((date, e)),
        }
    }
    report.fetched.sort();
    report.unavailable.sort();
    report.failed.sort_by_key(|(d, _)| *d);

    info!(
        fetched = report.fetched.len(),
        unavailable = report.unavailable.len(),
        failed = report.failed.len(),
        "backfill finished"
    );
    report
}

async fn fetch_one<F>(fetcher: &F, layout: &RawFileLayout, date: Date) -> Result<bool, PipelineError>
where
    F: RawFetcher + ?Sized,
{
    let Some(bytes) = fetcher.fetch(date).await? else {
        return Ok(false);
    };

    let path = layout.path(date);
    (layout.check)(&path.display().to_string(), &bytes)?;

    let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    tmp_name.push(".part");
    let tmp = path.with_file_name(tmp_name);

    let io_err = |e: std::io::Error| PipelineError::Sink(format!("failed to store {}: {e}", path.display()));
    let stored = match tokio::fs::write(&tmp, &bytes).await {
        Ok(()) => tokio::fs::rename(&tmp, &path).await,
        Err(e) => Err(e),
    };
    if let Err(e) = stored {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(io_err(e));
    }
    Ok(true)
}
