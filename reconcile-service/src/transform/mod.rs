use std::marker::PhantomData;

use crate::pipeline::{Envelope, PipelineError, Transform};
use series_client::{
    domain::is_quarter_aligned, ConsumptionRecord, LossProfileRecord, MeterSample, PriceRecord, Timestamped,
};
use time::macros::datetime;

/// Record-level sanity rules applied between alignment and merge.
pub trait Validate: Timestamped {
    /// Whether the timestamp must sit on a quarter-hour boundary.
    const QUARTER_ALIGNED: bool = true;

    /// Values that must be finite and non-negative.
    fn non_negative(&self) -> Vec<(&'static str, f64)> {
        Vec::new()
    }

    /// Values that only need to be finite.
    fn finite(&self) -> Vec<(&'static str, f64)> {
        Vec::new()
    }
}

impl Validate for ConsumptionRecord {
    fn non_negative(&self) -> Vec<(&'static str, f64)> {
        vec![("consumption_kwh", self.consumption_kwh), ("injection_kwh", self.injection_kwh)]
    }
}

impl Validate for PriceRecord {
    // Day-ahead prices go negative on surplus days.
    fn finite(&self) -> Vec<(&'static str, f64)> {
        vec![("price_eur_per_mwh", self.price_eur_per_mwh)]
    }
}

impl Validate for LossProfileRecord {
    fn non_negative(&self) -> Vec<(&'static str, f64)> {
        vec![("loss_fraction", self.loss_fraction)]
    }
}

impl Validate for MeterSample {
    const QUARTER_ALIGNED: bool = false;

    fn non_negative(&self) -> Vec<(&'static str, f64)> {
        vec![("energy_in_wh", self.energy_in_wh), ("energy_out_wh", self.energy_out_wh)]
    }

    fn finite(&self) -> Vec<(&'static str, f64)> {
        self.voltage_min
            .map(|v| ("voltage_min", v))
            .into_iter()
            .chain(self.voltage_max.map(|v| ("voltage_max", v)))
            .collect()
    }
}

/// Pure validation of one record.
///
/// Rules:
/// - timestamp within the sanity window [2000-01-01, 2100-01-01).
/// - interval records start on a quarter hour.
/// - no NaN or infinite values; energy and loss values non-negative.
pub fn validate_record<T: Validate>(env: Envelope<T>) -> Result<Envelope<T>, PipelineError> {
    let r = &env.payload;
    let ts = r.timestamp();

    let min_ts = datetime!(2000-01-01 00:00:00 UTC);
    let max_ts = datetime!(2100-01-01 00:00:00 UTC);
    if ts < min_ts || ts >= max_ts {
        return Err(PipelineError::Transform(format!("timestamp {ts} out of allowed range")));
    }

    if T::QUARTER_ALIGNED && !is_quarter_aligned(ts) {
        return Err(PipelineError::Transform(format!("{ts} is not on a quarter hour")));
    }

    for (name, v) in r.non_negative() {
        if !v.is_finite() || v < 0.0 {
            return Err(PipelineError::Transform(format!("{name} must be non-negative, got {v} at {ts}")));
        }
    }
    for (name, v) in r.finite() {
        if !v.is_finite() {
            return Err(PipelineError::Transform(format!("{name} must be finite at {ts}")));
        }
    }

    Ok(env)
}

pub struct RecordValidation<T> {
    _record: PhantomData<fn() -> T>,
}

impl<T> Default for RecordValidation<T> {
    fn default() -> Self {
        Self { _record: PhantomData }
    }
}

impl<T> Clone for RecordValidation<T> {
    fn clone(&self) -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl<T> Transform<T, T> for RecordValidation<T>
where
    T: Validate + Send + 'static,
{
    async fn apply(&self, input: Envelope<T>) -> Result<Envelope<T>, PipelineError> {
        match validate_record(input) {
            Ok(env) => Ok(env),
            Err(e) => {
                metrics::counter!("validation_rejected_total").increment(1);
                Err(e)
            }
        }
    }
}
