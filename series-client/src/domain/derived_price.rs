use csv::StringRecord;
use time::OffsetDateTime;

use super::interval::{IntervalRecord, Timestamped};
use crate::row::{check_len, format_timestamp, parse_f64, parse_timestamp, CsvRow, RowError};

/// Retail price per kWh after losses, adjustment factor and fixed fee.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DerivedPriceRecord {
    pub start: OffsetDateTime,
    pub price_eur_per_kwh: f64,
}

impl Timestamped for DerivedPriceRecord {
    fn timestamp(&self) -> OffsetDateTime {
        self.start
    }
}

impl IntervalRecord for DerivedPriceRecord {
    fn with_start(&self, start: OffsetDateTime) -> Self {
        Self { start, ..self.clone() }
    }
}

impl CsvRow for DerivedPriceRecord {
    const HEADER: &'static [&'static str] = &["starting_datetime", "eur_per_kwh"];

    fn to_row(&self) -> Vec<String> {
        vec![format_timestamp(self.start), self.price_eur_per_kwh.to_string()]
    }

    fn from_row(row: &StringRecord) -> Result<Self, RowError> {
        check_len(row, Self::HEADER.len())?;
        Ok(Self {
            start: parse_timestamp(&row[0])?,
            price_eur_per_kwh: parse_f64(row, 1, "eur_per_kwh")?,
        })
    }
}
