use csv::StringRecord;
use time::OffsetDateTime;

use super::interval::{IntervalRecord, Timestamped};
use crate::row::{check_len, format_timestamp, parse_f64, parse_timestamp, CsvRow, RowError};

/// Day-ahead market price for the national zone, in EUR/MWh.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PriceRecord {
    pub start: OffsetDateTime,
    pub price_eur_per_mwh: f64,
}

impl Timestamped for PriceRecord {
    fn timestamp(&self) -> OffsetDateTime {
        self.start
    }
}

impl IntervalRecord for PriceRecord {
    fn with_start(&self, start: OffsetDateTime) -> Self {
        Self { start, ..self.clone() }
    }
}

impl CsvRow for PriceRecord {
    const HEADER: &'static [&'static str] = &["starting_datetime", "eur_per_mwh"];

    fn to_row(&self) -> Vec<String> {
        vec![format_timestamp(self.start), self.price_eur_per_mwh.to_string()]
    }

    fn from_row(row: &StringRecord) -> Result<Self, RowError> {
        check_len(row, Self::HEADER.len())?;
        Ok(Self {
            start: parse_timestamp(&row[0])?,
            price_eur_per_mwh: parse_f64(row, 1, "eur_per_mwh")?,
        })
    }
}
