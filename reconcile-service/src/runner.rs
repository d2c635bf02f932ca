//! Wiring of the per-series pipelines into one batch run.

use std::{path::PathBuf, sync::Arc, time::Duration};

use series_client::{
    query::{yearly_energy_totals, yearly_summary},
    ConsumptionRecord, CsvRow, DerivedPriceRecord, HouseholdEnergyRecord, LossProfileRecord, MeterEnergyRecord,
    MeterSample, PriceRecord, Timestamped,
};
use time::{Date, OffsetDateTime};
use tracing::{info, warn};

use crate::{
    align::sum_quarter_hours,
    backfill::{download_missing, BackfillReport, RawFileLayout},
    config::{AppConfig, MeterDevice},
    fetch::{DayAheadPriceFetcher, MeterDeviceFetcher},
    household::combine_household,
    pipeline::{Pipeline, PipelineError, RunSummary},
    pricing::{derive, Derivation},
    sinks::CanonicalSeriesSink,
    sources::{
        ConsumptionXlsxNormalizer, DayAheadPriceNormalizer, LossProfileXlsxNormalizer, MeterCsvNormalizer, Normalize,
        RawFileBatchSource,
    },
    store::{DedupPolicy, SeriesStore},
    transform::{RecordValidation, Validate},
};

/// Canonical series file names (without the `.csv` extension).
pub mod series {
    pub const CONSUMPTION: &str = "consumption_history";
    pub const PRICES: &str = "energy_prices";
    pub const LOSSES: &str = "losses_profiles";
    pub const RETAIL_PRICES: &str = "retail_prices";
    pub const HOUSEHOLD: &str = "household_energy";

    pub fn meter_energy(device: &str) -> String {
        format!("meter_{device}")
    }

    pub fn meter_samples(device: &str) -> String {
        format!("meter_{device}_samples")
    }
}

pub struct Reconciler {
    cfg: AppConfig,
    store: Arc<SeriesStore>,
}

impl Reconciler {
    pub fn new(cfg: AppConfig) -> Self {
        let store = Arc::new(SeriesStore::new(cfg.paths.data_dir.clone()));
        Self { cfg, store }
    }

    pub fn config(&self) -> &AppConfig {
        &self.cfg
    }

    pub fn store(&self) -> &Arc<SeriesStore> {
        &self.store
    }

    async fn run_pipeline<N>(
        &self,
        source: RawFileBatchSource<N>,
        series: &str,
        policy: DedupPolicy,
    ) -> Result<RunSummary, PipelineError>
    where
        N: Normalize + 'static,
        N::Record: Validate + Timestamped + CsvRow,
    {
        let pipeline: Pipeline<_, N::Record, _> = Pipeline {
            source,
            transforms: vec![Arc::new(RecordValidation::<N::Record>::default())],
            sink: CanonicalSeriesSink::new(self.store.clone(), series, policy),
        };
        let summary = pipeline.run().await?;

        if !summary.rejected.is_empty() {
            warn!(series, rejected = summary.rejected.len(), "some inputs were rejected");
        }
        info!(
            series,
            accepted = summary.accepted,
            added = summary.merge.added,
            conflicts = summary.merge.conflicts,
            total = summary.merge.total,
            "series updated"
        );
        Ok(summary)
    }

    pub async fn update_consumption(&self) -> Result<RunSummary, PipelineError> {
        let source = RawFileBatchSource::from_dir(ConsumptionXlsxNormalizer::default(), &self.cfg.paths.consumption_dir);
        self.run_pipeline(source, series::CONSUMPTION, self.cfg.merge.consumption).await
    }

    pub async fn update_prices(&self) -> Result<RunSummary, PipelineError> {
        let source = RawFileBatchSource::from_dir(DayAheadPriceNormalizer, &self.cfg.paths.price_dir);
        self.run_pipeline(source, series::PRICES, self.cfg.merge.prices).await
    }

    pub async fn update_losses(&self) -> Result<RunSummary, PipelineError> {
        let source = RawFileBatchSource::from_dir(LossProfileXlsxNormalizer, &self.cfg.paths.loss_profile_dir);
        self.run_pipeline(source, series::LOSSES, self.cfg.merge.losses).await
    }

    /// Merges the device's export from the meter directory into its sample
    /// history and recomputes its quarter-hour energy series.
    pub async fn update_meter(&self, device: &MeterDevice) -> Result<RunSummary, PipelineError> {
        let source = RawFileBatchSource::from_dir(MeterCsvNormalizer::new(&device.name), &self.cfg.paths.meter_dir);
        self.merge_meter_samples(&device.name, source).await
    }

    /// Same as [`Self::update_meter`] for an export at an arbitrary path.
    pub async fn import_meter_file(&self, device: &str, path: PathBuf) -> Result<RunSummary, PipelineError> {
        let source = RawFileBatchSource::from_files(MeterCsvNormalizer::new(device), vec![path]);
        self.merge_meter_samples(device, source).await
    }

    async fn merge_meter_samples(
        &self,
        device: &str,
        source: RawFileBatchSource<MeterCsvNormalizer>,
    ) -> Result<RunSummary, PipelineError> {
        let summary = self
            .run_pipeline(source, &series::meter_samples(device), self.cfg.merge.meter_samples)
            .await?;
        self.refresh_meter_energy(device).await?;
        Ok(summary)
    }

    async fn refresh_meter_energy(&self, device: &str) -> Result<Vec<MeterEnergyRecord>, PipelineError> {
        let samples: Vec<MeterSample> = self.store.load(&series::meter_samples(device)).await?;
        let energy = sum_quarter_hours(&samples);
        self.store.overwrite(&series::meter_energy(device), &energy).await?;
        Ok(energy)
    }

    pub async fn update_household(&self) -> Result<Vec<HouseholdEnergyRecord>, PipelineError> {
        let meters = &self.cfg.meters;
        let grid: Vec<MeterEnergyRecord> = self.store.load(&series::meter_energy(&meters.grid.name)).await?;
        let solar: Vec<MeterEnergyRecord> = self.store.load(&series::meter_energy(&meters.solar.name)).await?;

        let household = combine_household(&grid, &solar);
        self.store.overwrite(series::HOUSEHOLD, &household).await?;
        Ok(household)
    }

    /// Recomputes the retail price series from the persisted inputs.
    pub async fn derive_prices(&self) -> Result<Derivation, PipelineError> {
        let prices: Vec<PriceRecord> = self.store.load(series::PRICES).await?;
        let losses: Vec<LossProfileRecord> = self.store.load(series::LOSSES).await?;

        let derivation = derive(&prices, &losses, &self.cfg.pricing);
        self.store.overwrite(series::RETAIL_PRICES, &derivation.records).await?;
        Ok(derivation)
    }

    pub async fn backfill_prices(&self, start: Date, end: Date) -> Result<BackfillReport, PipelineError> {
        let fetch = &self.cfg.fetch;
        let layout = RawFileLayout::day_ahead_prices(&self.cfg.paths.price_dir);
        let missing = layout.missing(start, end);
        info!(%start, %end, missing = missing.len(), "planning price backfill");

        let fetcher = DayAheadPriceFetcher::new(&fetch.price_base_url, Duration::from_secs(fetch.timeout_secs))?;
        Ok(download_missing(missing, &fetcher, &layout, fetch.workers).await)
    }

    /// Downloads the current export of every configured device into the
    /// meter directory. A device that fails keeps its previous export.
    pub async fn fetch_meter_exports(&self) -> Result<(), PipelineError> {
        let Some(origin) = &self.cfg.fetch.meter_origin else {
            return Ok(());
        };
        let fetcher = MeterDeviceFetcher::new(origin, Duration::from_secs(self.cfg.fetch.timeout_secs))?;
        tokio::fs::create_dir_all(&self.cfg.paths.meter_dir)
            .await
            .map_err(|e| PipelineError::Sink(format!("failed to create meter directory: {e}")))?;

        for device in self.cfg.meters.devices() {
            let bytes = match fetcher.fetch_export(device.channel).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(device = %device.name, error = %e, "meter export not fetched");
                    metrics::counter!("backfill_fetch_failures_total").increment(1);
                    continue;
                }
            };

            let path = self.cfg.paths.meter_dir.join(MeterCsvNormalizer::file_name(&device.name));
            let tmp = path.with_extension("csv.part");
            let stored = match tokio::fs::write(&tmp, &bytes).await {
                Ok(()) => tokio::fs::rename(&tmp, &path).await,
                Err(e) => Err(e),
            };
            if let Err(e) = stored {
                let _ = tokio::fs::remove_file(&tmp).await;
                warn!(device = %device.name, error = %e, "meter export not stored");
            }
        }
        Ok(())
    }

    /// Full batch: optional downloads, every input series, then the series
    /// derived from them.
    pub async fn run_all(&self) -> Result<(), PipelineError> {
        if self.cfg.fetch.enabled {
            let tomorrow = OffsetDateTime::now_utc().date().next_day().unwrap_or(Date::MAX);
            let report = self.backfill_prices(self.cfg.pricing.data_start, tomorrow).await?;
            if !report.failed.is_empty() {
                warn!(failed = report.failed.len(), "some price files will be retried next run");
            }
            self.fetch_meter_exports().await?;
        }

        let meters = async {
            let meters = &self.cfg.meters;
            tokio::try_join!(self.update_meter(&meters.grid), self.update_meter(&meters.solar))
        };
        tokio::try_join!(
            self.update_consumption(),
            self.update_prices(),
            self.update_losses(),
            meters
        )?;

        self.update_household().await?;
        self.derive_prices().await?;
        self.log_summaries().await
    }

    pub async fn log_summaries(&self) -> Result<(), PipelineError> {
        let prices: Vec<PriceRecord> = self.store.load(series::PRICES).await?;
        for y in yearly_summary(&prices, |p| p.price_eur_per_mwh) {
            info!(year = y.year, max = y.max, min = y.min, mean = y.mean, "day-ahead price EUR/MWh");
        }

        let retail: Vec<DerivedPriceRecord> = self.store.load(series::RETAIL_PRICES).await?;
        for y in yearly_summary(&retail, |p| p.price_eur_per_kwh) {
            info!(year = y.year, max = y.max, min = y.min, mean = y.mean, "retail price EUR/kWh");
        }

        let consumption: Vec<ConsumptionRecord> = self.store.load(series::CONSUMPTION).await?;
        for t in yearly_energy_totals(&consumption) {
            info!(
                year = t.year,
                consumption_kwh = t.consumption_kwh,
                injection_kwh = t.injection_kwh,
                "grid energy totals"
            );
        }
        Ok(())
    }
}
