use std::collections::BTreeMap;

use series_client::{row::round_to, HouseholdEnergyRecord, MeterEnergyRecord};
use time::OffsetDateTime;

/// Combines the grid and solar device series into the household balance.
///
/// Outer join on the interval start: a device with no record for an interval
/// contributes zero. `grid = grid_in - grid_out`, `solar = solar_in`,
/// `consumed = grid + solar`.
pub fn combine_household(grid: &[MeterEnergyRecord], solar: &[MeterEnergyRecord]) -> Vec<HouseholdEnergyRecord> {
    let mut joined: BTreeMap<OffsetDateTime, (f64, f64)> = BTreeMap::new();
    for g in grid {
        joined.entry(g.start).or_default().0 += g.energy_in_kwh - g.energy_out_kwh;
    }
    for s in solar {
        joined.entry(s.start).or_default().1 += s.energy_in_kwh;
    }

    joined
        .into_iter()
        .map(|(start, (grid_kwh, solar_kwh))| HouseholdEnergyRecord {
            start,
            grid_kwh: round_to(grid_kwh, 6),
            solar_kwh: round_to(solar_kwh, 6),
            consumed_kwh: round_to(grid_kwh + solar_kwh, 6),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn energy(ts: OffsetDateTime, energy_in_kwh: f64, energy_out_kwh: f64) -> MeterEnergyRecord {
        MeterEnergyRecord {
            start: ts,
            energy_in_kwh,
            energy_out_kwh,
        }
    }

    #[test]
    fn exporting_household_has_negative_grid_and_positive_consumption() {
        let t = datetime!(2024-06-01 12:00:00 UTC);
        let combined = combine_household(&[energy(t, 0.0, 0.2)], &[energy(t, 0.5, 0.0)]);

        assert_eq!(combined.len(), 1);
        assert_eq!(combined[0].grid_kwh, -0.2);
        assert_eq!(combined[0].solar_kwh, 0.5);
        assert_eq!(combined[0].consumed_kwh, 0.3);
    }

    #[test]
    fn missing_device_interval_counts_as_zero() {
        let t0 = datetime!(2024-06-01 00:00:00 UTC);
        let t1 = datetime!(2024-06-01 00:15:00 UTC);
        let combined = combine_household(&[energy(t0, 0.1, 0.0)], &[energy(t1, 0.05, 0.0)]);

        assert_eq!(combined.len(), 2);
        assert_eq!(combined[0].solar_kwh, 0.0);
        assert_eq!(combined[0].consumed_kwh, 0.1);
        assert_eq!(combined[1].grid_kwh, 0.0);
        assert_eq!(combined[1].consumed_kwh, 0.05);
    }
}
