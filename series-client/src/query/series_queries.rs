use std::collections::BTreeMap;

use time::OffsetDateTime;

use crate::domain::{ConsumptionRecord, Timestamped};

#[derive(Debug, Clone, PartialEq)]
pub struct YearlySummary {
    pub year: i32,
    pub max: f64,
    pub min: f64,
    pub mean: f64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct YearlyEnergyTotals {
    pub year: i32,
    pub consumption_kwh: f64,
    pub injection_kwh: f64,
}

/// Time-ordered window of a canonical series, `start <= ts < end`.
pub fn slice<R>(series: &[R], start: OffsetDateTime, end: OffsetDateTime) -> Vec<R>
where
    R: Timestamped + Clone,
{
    series
        .iter()
        .filter(|r| {
            let ts = r.timestamp();
            ts >= start && ts < end
        })
        .cloned()
        .collect()
}

/// Max / min / mean of one value per calendar year (UTC).
pub fn yearly_summary<R, F>(series: &[R], value: F) -> Vec<YearlySummary>
where
    R: Timestamped,
    F: Fn(&R) -> f64,
{
    let mut by_year: BTreeMap<i32, (f64, f64, f64, usize)> = BTreeMap::new();

    for r in series {
        let v = value(r);
        let entry = by_year
            .entry(r.timestamp().year())
            .or_insert((f64::NEG_INFINITY, f64::INFINITY, 0.0, 0));
        entry.0 = entry.0.max(v);
        entry.1 = entry.1.min(v);
        entry.2 += v;
        entry.3 += 1;
    }

    by_year
        .into_iter()
        .map(|(year, (max, min, sum, count))| YearlySummary {
            year,
            max,
            min,
            mean: sum / count as f64,
            count,
        })
        .collect()
}

/// Total consumption and injection per calendar year (UTC).
pub fn yearly_energy_totals(series: &[ConsumptionRecord]) -> Vec<YearlyEnergyTotals> {
    let mut by_year: BTreeMap<i32, (f64, f64)> = BTreeMap::new();
    for r in series {
        let entry = by_year.entry(r.start.year()).or_default();
        entry.0 += r.consumption_kwh;
        entry.1 += r.injection_kwh;
    }

    by_year
        .into_iter()
        .map(|(year, (consumption_kwh, injection_kwh))| YearlyEnergyTotals {
            year,
            consumption_kwh,
            injection_kwh,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PriceRecord;
    use time::macros::datetime;

    fn price(ts: OffsetDateTime, v: f64) -> PriceRecord {
        PriceRecord {
            start: ts,
            price_eur_per_mwh: v,
        }
    }

    #[test]
    fn slice_is_half_open() {
        let series = vec![
            price(datetime!(2024-04-01 00:00:00 UTC), 1.0),
            price(datetime!(2024-04-01 00:15:00 UTC), 2.0),
            price(datetime!(2024-04-01 00:30:00 UTC), 3.0),
        ];

        let window = slice(&series, datetime!(2024-04-01 00:15:00 UTC), datetime!(2024-04-01 00:30:00 UTC));
        assert_eq!(window, vec![series[1].clone()]);
    }

    #[test]
    fn yearly_summary_groups_by_year() {
        let series = vec![
            price(datetime!(2024-12-31 23:45:00 UTC), 10.0),
            price(datetime!(2024-12-31 23:30:00 UTC), 30.0),
            price(datetime!(2025-01-01 00:00:00 UTC), -5.0),
        ];

        let summary = yearly_summary(&series, |p| p.price_eur_per_mwh);
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].year, 2024);
        assert_eq!(summary[0].max, 30.0);
        assert_eq!(summary[0].min, 10.0);
        assert_eq!(summary[0].mean, 20.0);
        assert_eq!(summary[1].count, 1);
        assert_eq!(summary[1].min, -5.0);
    }

    #[test]
    fn yearly_energy_totals_sums_both_directions() {
        let series = vec![
            ConsumptionRecord {
                start: datetime!(2024-06-01 12:00:00 UTC),
                consumption_kwh: 0.5,
                injection_kwh: 0.0,
            },
            ConsumptionRecord {
                start: datetime!(2024-06-01 12:15:00 UTC),
                consumption_kwh: 0.0,
                injection_kwh: 0.25,
            },
        ];

        let totals = yearly_energy_totals(&series);
        assert_eq!(
            totals,
            vec![YearlyEnergyTotals {
                year: 2024,
                consumption_kwh: 0.5,
                injection_kwh: 0.25,
            }]
        );
    }
}
