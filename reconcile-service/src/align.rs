//! Resampling of native-cadence records onto the 15-minute grid.

use std::collections::BTreeMap;

use series_client::{
    domain::{floor_to_quarter, QUARTER_HOUR, SLOTS_PER_DAY},
    row::round_to,
    IntervalRecord, MeterEnergyRecord, MeterSample,
};
use time::{Date, OffsetDateTime};

/// Expands records to exactly 96 quarter hours for every UTC day that has at
/// least one observation.
///
/// A slot takes the latest observation at or before it, so an hourly value
/// covers its four quarters and the last value of the day runs on to 23:45.
/// Slots ahead of the day's first observation take that first observation.
/// Observations sharing a slot: the later one in input order wins. Days
/// without observations produce nothing.
pub fn forward_fill_quarter_hours<R: IntervalRecord>(records: Vec<R>) -> Vec<R> {
    let mut days: BTreeMap<Date, BTreeMap<OffsetDateTime, R>> = BTreeMap::new();
    for r in records {
        let slot = floor_to_quarter(r.start());
        days.entry(slot.date()).or_default().insert(slot, r.with_start(slot));
    }

    let mut out = Vec::with_capacity(days.len() * SLOTS_PER_DAY);
    for (day, observed) in days {
        let first = observed.values().next().cloned();
        let midnight = day.midnight().assume_utc();
        let mut pending = observed.into_iter().peekable();
        let mut current: Option<R> = None;

        for i in 0..SLOTS_PER_DAY as i32 {
            let slot = midnight + QUARTER_HOUR * i;
            while let Some((_, r)) = pending.next_if(|(ts, _)| *ts <= slot) {
                current = Some(r);
            }
            if let Some(r) = current.as_ref().or(first.as_ref()) {
                out.push(r.with_start(slot));
            }
        }
    }
    out
}

/// Sums device samples into quarter-hour energy, Wh to kWh.
///
/// Buckets run from the first to the last observed quarter hour; empty
/// buckets inside that span are zero.
pub fn sum_quarter_hours(samples: &[MeterSample]) -> Vec<MeterEnergyRecord> {
    let mut buckets: BTreeMap<OffsetDateTime, (f64, f64)> = BTreeMap::new();
    for s in samples {
        let entry = buckets.entry(floor_to_quarter(s.timestamp)).or_default();
        entry.0 += s.energy_in_wh;
        entry.1 += s.energy_out_wh;
    }

    let (Some(&first), Some(&last)) = (buckets.keys().next(), buckets.keys().next_back()) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    let mut slot = first;
    while slot <= last {
        let (energy_in, energy_out) = buckets.get(&slot).copied().unwrap_or_default();
        out.push(MeterEnergyRecord {
            start: slot,
            energy_in_kwh: round_to(energy_in / 1000.0, 6),
            energy_out_kwh: round_to(energy_out / 1000.0, 6),
        });
        slot += QUARTER_HOUR;
    }
    out
}
