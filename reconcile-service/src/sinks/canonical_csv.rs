use std::{sync::Arc, time::SystemTime};

use futures::StreamExt;
use series_client::{CsvRow, Timestamped};

use crate::{
    pipeline::{Envelope, PipelineError, RunSummary, Sink},
    store::{DedupPolicy, SeriesStore},
};

/// Drains a pipeline into one canonical series.
///
/// The whole run is merged in a single read-merge-rewrite so a batch either
/// lands completely or not at all. Upstream per-file and per-record errors
/// are logged, listed in the summary and skipped; anything else aborts the
/// run before the series is touched.
pub struct CanonicalSeriesSink {
    store: Arc<SeriesStore>,
    series: String,
    policy: DedupPolicy,
}

impl CanonicalSeriesSink {
    pub fn new(store: Arc<SeriesStore>, series: impl Into<String>, policy: DedupPolicy) -> Self {
        Self {
            store,
            series: series.into(),
            policy,
        }
    }
}

#[async_trait::async_trait]
impl<T> Sink<T> for CanonicalSeriesSink
where
    T: Timestamped + CsvRow + Send + 'static,
{
    async fn run<S>(&self, mut input: S) -> Result<RunSummary, PipelineError>
    where
        S: futures::Stream<Item = Result<Envelope<T>, PipelineError>> + Send + Unpin + 'static,
    {
        let mut records = Vec::new();
        let mut rejected = Vec::new();
        let mut earliest: Option<SystemTime> = None;

        while let Some(item) = input.next().await {
            match item {
                Ok(env) => {
                    earliest = Some(earliest.map_or(env.received_at, |t| t.min(env.received_at)));
                    records.push(env.payload);
                }
                Err(e) if e.is_recoverable() => {
                    tracing::warn!(series = %self.series, error = %e, "skipping rejected input");
                    rejected.push(e.to_string());
                }
                Err(e) => {
                    tracing::error!(series = %self.series, error = %e, "error in upstream pipeline, series left untouched");
                    return Err(e);
                }
            }
        }

        let accepted = records.len();
        let merge = self.store.merge_into(&self.series, records, self.policy).await?;

        if let Some(dur) = earliest.and_then(|t| SystemTime::now().duration_since(t).ok()) {
            metrics::histogram!("canonical_merge_latency_seconds", "series" => self.series.clone())
                .record(dur.as_secs_f64());
        }

        Ok(RunSummary {
            accepted,
            rejected,
            merge,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use series_client::PriceRecord;
    use time::macros::datetime;

    fn env(payload: PriceRecord) -> Result<Envelope<PriceRecord>, PipelineError> {
        Ok(Envelope {
            payload,
            received_at: SystemTime::now(),
        })
    }

    #[tokio::test]
    async fn recoverable_errors_are_listed_and_records_still_merge() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SeriesStore::new(dir.path()));
        let sink = CanonicalSeriesSink::new(store.clone(), "energy_prices", DedupPolicy::LastWriteWins);

        let items = vec![
            env(PriceRecord {
                start: datetime!(2024-04-01 00:00:00 UTC),
                price_eur_per_mwh: 50.0,
            }),
            Err(PipelineError::SchemaMismatch {
                file: "bad.1".into(),
                detail: "expected 6 or 7 fields, found 5".into(),
            }),
        ];
        let summary = sink.run(futures::stream::iter(items)).await.unwrap();

        assert_eq!(summary.accepted, 1);
        assert_eq!(summary.rejected.len(), 1);
        assert_eq!(summary.merge.total, 1);
        let stored: Vec<PriceRecord> = store.load("energy_prices").await.unwrap();
        assert_eq!(stored.len(), 1);
    }

    #[tokio::test]
    async fn fatal_error_leaves_series_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SeriesStore::new(dir.path()));
        let sink = CanonicalSeriesSink::new(store.clone(), "energy_prices", DedupPolicy::LastWriteWins);

        let items: Vec<Result<Envelope<PriceRecord>, PipelineError>> = vec![Err(PipelineError::Sink("disk full".into()))];
        let res = sink.run(futures::stream::iter(items)).await;

        assert!(res.is_err());
        assert!(!store.path("energy_prices").exists());
    }
}
