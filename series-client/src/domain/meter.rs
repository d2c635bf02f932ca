use csv::StringRecord;
use time::OffsetDateTime;

use super::interval::{IntervalRecord, Timestamped};
use crate::row::{
    check_len, format_optional, format_timestamp, parse_f64, parse_optional_f64, parse_timestamp, CsvRow, RowError,
};

/// One row of a metering device export, at the device's native cadence.
///
/// This is the "instantaneous" view of a device; [`MeterEnergyRecord`] is the
/// quarter-hour energy view derived from it.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MeterSample {
    pub timestamp: OffsetDateTime,
    pub energy_in_wh: f64,
    pub energy_out_wh: f64,
    pub voltage_min: Option<f64>,
    pub voltage_max: Option<f64>,
}

impl Timestamped for MeterSample {
    fn timestamp(&self) -> OffsetDateTime {
        self.timestamp
    }
}

impl CsvRow for MeterSample {
    const HEADER: &'static [&'static str] =
        &["timestamp_utc", "energy_in_wh", "energy_out_wh", "voltage_min_v", "voltage_max_v"];

    fn to_row(&self) -> Vec<String> {
        vec![
            format_timestamp(self.timestamp),
            format!("{:.3}", self.energy_in_wh),
            format!("{:.3}", self.energy_out_wh),
            format_optional(self.voltage_min, 3),
            format_optional(self.voltage_max, 3),
        ]
    }

    fn from_row(row: &StringRecord) -> Result<Self, RowError> {
        check_len(row, Self::HEADER.len())?;
        Ok(Self {
            timestamp: parse_timestamp(&row[0])?,
            energy_in_wh: parse_f64(row, 1, "energy_in_wh")?,
            energy_out_wh: parse_f64(row, 2, "energy_out_wh")?,
            voltage_min: parse_optional_f64(row, 3, "voltage_min_v")?,
            voltage_max: parse_optional_f64(row, 4, "voltage_max_v")?,
        })
    }
}

/// Quarter-hour energy of a single device, in kWh (6 decimals).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MeterEnergyRecord {
    pub start: OffsetDateTime,
    pub energy_in_kwh: f64,
    pub energy_out_kwh: f64,
}

impl Timestamped for MeterEnergyRecord {
    fn timestamp(&self) -> OffsetDateTime {
        self.start
    }
}

impl IntervalRecord for MeterEnergyRecord {
    fn with_start(&self, start: OffsetDateTime) -> Self {
        Self { start, ..self.clone() }
    }
}

impl CsvRow for MeterEnergyRecord {
    const HEADER: &'static [&'static str] = &["starting_datetime", "energy_in_kwh", "energy_out_kwh"];

    fn to_row(&self) -> Vec<String> {
        vec![
            format_timestamp(self.start),
            format!("{:.6}", self.energy_in_kwh),
            format!("{:.6}", self.energy_out_kwh),
        ]
    }

    fn from_row(row: &StringRecord) -> Result<Self, RowError> {
        check_len(row, Self::HEADER.len())?;
        Ok(Self {
            start: parse_timestamp(&row[0])?,
            energy_in_kwh: parse_f64(row, 1, "energy_in_kwh")?,
            energy_out_kwh: parse_f64(row, 2, "energy_out_kwh")?,
        })
    }
}

/// Household balance built from the grid and solar devices.
///
/// `grid_kwh` is signed (negative while exporting); `consumed_kwh` is what
/// the house actually used: grid plus solar production.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HouseholdEnergyRecord {
    pub start: OffsetDateTime,
    pub grid_kwh: f64,
    pub solar_kwh: f64,
    pub consumed_kwh: f64,
}

impl Timestamped for HouseholdEnergyRecord {
    fn timestamp(&self) -> OffsetDateTime {
        self.start
    }
}

impl IntervalRecord for HouseholdEnergyRecord {
    fn with_start(&self, start: OffsetDateTime) -> Self {
        Self { start, ..self.clone() }
    }
}

impl CsvRow for HouseholdEnergyRecord {
    const HEADER: &'static [&'static str] = &["starting_datetime", "grid_kwh", "solar_kwh", "consumed_kwh"];

    fn to_row(&self) -> Vec<String> {
        vec![
            format_timestamp(self.start),
            format!("{:.6}", self.grid_kwh),
            format!("{:.6}", self.solar_kwh),
            format!("{:.6}", self.consumed_kwh),
        ]
    }

    fn from_row(row: &StringRecord) -> Result<Self, RowError> {
        check_len(row, Self::HEADER.len())?;
        Ok(Self {
            start: parse_timestamp(&row[0])?,
            grid_kwh: parse_f64(row, 1, "grid_kwh")?,
            solar_kwh: parse_f64(row, 2, "solar_kwh")?,
            consumed_kwh: parse_f64(row, 3, "consumed_kwh")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ConsumptionRecord;
    use crate::row::{read_series, write_series};
    use time::macros::datetime;

    fn round_trip<R: CsvRow>(records: &[R]) -> Vec<R> {
        let mut buf = Vec::new();
        write_series(records, &mut buf).unwrap();
        read_series(buf.as_slice()).unwrap()
    }

    #[test]
    fn consumption_round_trip_keeps_three_decimals() {
        let records = vec![
            ConsumptionRecord {
                start: datetime!(2024-04-01 00:00:00 UTC),
                consumption_kwh: 0.125,
                injection_kwh: 0.0,
            },
            ConsumptionRecord {
                start: datetime!(2024-04-01 00:15:00 UTC),
                consumption_kwh: 0.0,
                injection_kwh: 0.3754,
            },
        ];

        let back = round_trip(&records);
        assert_eq!(back[0], records[0]);
        assert_eq!(back[1].start, records[1].start);
        assert_eq!(back[1].injection_kwh, 0.375);
    }

    #[test]
    fn meter_energy_round_trip_keeps_six_decimals() {
        let records = vec![MeterEnergyRecord {
            start: datetime!(2024-04-01 12:00:00 UTC),
            energy_in_kwh: 0.1234567,
            energy_out_kwh: 0.000001,
        }];

        let back = round_trip(&records);
        assert_eq!(back[0].energy_in_kwh, 0.123457);
        assert_eq!(back[0].energy_out_kwh, 0.000001);
    }

    #[test]
    fn meter_sample_round_trip_keeps_missing_voltages_missing() {
        let records = vec![MeterSample {
            timestamp: datetime!(2024-04-01 12:01:00 UTC),
            energy_in_wh: 12.5,
            energy_out_wh: 0.0,
            voltage_min: None,
            voltage_max: Some(239.8),
        }];

        assert_eq!(round_trip(&records), records);
    }

    #[test]
    fn reading_a_row_with_wrong_width_fails() {
        let csv = "starting_datetime,eur_per_kwh\n2024-04-01 00:00:00+00:00,0.1,extra\n";
        let res = read_series::<crate::domain::DerivedPriceRecord, _>(csv.as_bytes());
        assert!(res.is_err());
    }
}
