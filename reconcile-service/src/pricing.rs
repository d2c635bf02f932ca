//! Retail price derivation from the day-ahead market price and the grid-loss
//! profile.

use std::collections::BTreeMap;

use serde::Deserialize;
use series_client::{DerivedPriceRecord, LossProfileRecord, PriceRecord};
use time::{macros::date, Date, OffsetDateTime};

/// Tariff parameters, passed explicitly to every derivation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PricingConfig {
    /// Multiplier applied to the loss-adjusted energy cost.
    pub adjustment_factor: f64,
    /// EUR/kWh added after the multiplier.
    pub fixed_fee: f64,
    /// Intervals before this UTC date are not derived.
    pub data_start: Date,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            adjustment_factor: 1.03,
            fixed_fee: 0.01479,
            data_start: date!(2024 - 04 - 01),
        }
    }
}

/// EUR/kWh for one interval.
pub fn retail_price(price_eur_per_mwh: f64, loss_fraction: f64, cfg: &PricingConfig) -> f64 {
    (price_eur_per_mwh / 1000.0) * (1.0 + loss_fraction) * cfg.adjustment_factor + cfg.fixed_fee
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinSide {
    Price,
    LossProfile,
}

/// An interval one input has and the other lacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinGap {
    pub start: OffsetDateTime,
    pub missing: JoinSide,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Derivation {
    pub records: Vec<DerivedPriceRecord>,
    /// Only gaps inside the span both inputs cover; loss profiles are
    /// published ahead for the whole year and would otherwise flood this.
    pub join_gaps: Vec<JoinGap>,
}

/// Inner join of prices and loss fractions on interval start.
pub fn derive(prices: &[PriceRecord], losses: &[LossProfileRecord], cfg: &PricingConfig) -> Derivation {
    let from = cfg.data_start.midnight().assume_utc();

    let prices: BTreeMap<OffsetDateTime, f64> = prices
        .iter()
        .filter(|p| p.start >= from)
        .map(|p| (p.start, p.price_eur_per_mwh))
        .collect();
    let losses: BTreeMap<OffsetDateTime, f64> = losses
        .iter()
        .filter(|l| l.start >= from)
        .map(|l| (l.start, l.loss_fraction))
        .collect();

    let records: Vec<DerivedPriceRecord> = prices
        .iter()
        .filter_map(|(start, price)| {
            losses.get(start).map(|loss| DerivedPriceRecord {
                start: *start,
                price_eur_per_kwh: retail_price(*price, *loss, cfg),
            })
        })
        .collect();

    let join_gaps = overlap(&prices, &losses)
        .map(|(lo, hi)| {
            let missing_loss = prices
                .range(lo..=hi)
                .filter(|(ts, _)| !losses.contains_key(*ts))
                .map(|(ts, _)| JoinGap {
                    start: *ts,
                    missing: JoinSide::LossProfile,
                });
            let missing_price = losses
                .range(lo..=hi)
                .filter(|(ts, _)| !prices.contains_key(*ts))
                .map(|(ts, _)| JoinGap {
                    start: *ts,
                    missing: JoinSide::Price,
                });
            let mut gaps: Vec<JoinGap> = missing_loss.chain(missing_price).collect();
            gaps.sort_by_key(|g| g.start);
            gaps
        })
        .unwrap_or_default();

    if !join_gaps.is_empty() {
        metrics::counter!("derive_join_gaps_total").increment(join_gaps.len() as u64);
        tracing::warn!(
            gaps = join_gaps.len(),
            first = %join_gaps[0].start,
            "intervals without a matching price or loss fraction were skipped"
        );
    }
    tracing::info!(derived = records.len(), "retail prices derived");

    Derivation { records, join_gaps }
}

fn overlap(
    a: &BTreeMap<OffsetDateTime, f64>,
    b: &BTreeMap<OffsetDateTime, f64>,
) -> Option<(OffsetDateTime, OffsetDateTime)> {
    let lo = (*a.keys().next()?).max(*b.keys().next()?);
    let hi = (*a.keys().next_back()?).min(*b.keys().next_back()?);
    (lo <= hi).then_some((lo, hi))
}

#[cfg(test)]
mod tests {
    use super::*;
    use series_client::domain::QUARTER_HOUR;
    use time::macros::datetime;

    fn price(start: OffsetDateTime, v: f64) -> PriceRecord {
        PriceRecord {
            start,
            price_eur_per_mwh: v,
        }
    }

    fn loss(start: OffsetDateTime, v: f64) -> LossProfileRecord {
        LossProfileRecord { start, loss_fraction: v }
    }

    #[test]
    fn reference_price() {
        let p = retail_price(50.0, 0.1, &PricingConfig::default());
        assert!((p - 0.071440).abs() < 1e-12, "got {p}");
    }

    #[test]
    fn inner_join_skips_unmatched_and_reports_gaps_inside_overlap() {
        let t0 = datetime!(2024-04-01 00:00:00 UTC);
        let prices = vec![price(t0, 50.0), price(t0 + QUARTER_HOUR, 60.0), price(t0 + QUARTER_HOUR * 2, 70.0)];
        let losses = vec![
            loss(t0, 0.1),
            loss(t0 + QUARTER_HOUR * 2, 0.1),
            // Far beyond the last price: outside the overlap, not a gap.
            loss(t0 + QUARTER_HOUR * 400, 0.1),
        ];

        let d = derive(&prices, &losses, &PricingConfig::default());

        assert_eq!(d.records.len(), 2);
        assert_eq!(d.records[1].start, t0 + QUARTER_HOUR * 2);
        assert_eq!(
            d.join_gaps,
            vec![JoinGap {
                start: t0 + QUARTER_HOUR,
                missing: JoinSide::LossProfile,
            }]
        );
    }

    #[test]
    fn rows_before_data_start_are_excluded() {
        let early = datetime!(2024-03-31 23:45:00 UTC);
        let first = datetime!(2024-04-01 00:00:00 UTC);
        let d = derive(
            &[price(early, 10.0), price(first, 10.0)],
            &[loss(early, 0.0), loss(first, 0.0)],
            &PricingConfig::default(),
        );
        assert_eq!(d.records.len(), 1);
        assert_eq!(d.records[0].start, first);
    }

    #[test]
    fn explicit_config_changes_the_result() {
        let cfg = PricingConfig {
            adjustment_factor: 1.0,
            fixed_fee: 0.0,
            ..PricingConfig::default()
        };
        let t = datetime!(2024-05-01 12:00:00 UTC);
        let d = derive(&[price(t, 100.0)], &[loss(t, 0.0)], &cfg);
        assert_eq!(d.records[0].price_eur_per_kwh, 0.1);
    }

    #[test]
    fn disjoint_inputs_derive_nothing() {
        let t = datetime!(2024-05-01 12:00:00 UTC);
        let d = derive(&[price(t, 100.0)], &[], &PricingConfig::default());
        assert!(d.records.is_empty());
        assert!(d.join_gaps.is_empty());
    }
}
