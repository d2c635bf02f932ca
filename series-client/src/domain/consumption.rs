use csv::StringRecord;
use time::OffsetDateTime;

use super::interval::{IntervalRecord, Timestamped};
use crate::row::{check_len, format_timestamp, parse_f64, parse_timestamp, CsvRow, RowError};

/// Grid-operator metered energy for one quarter hour.
///
/// At most one of the two fields is non-zero: the export reports a signed
/// net flow which normalization splits into consumption and injection.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConsumptionRecord {
    pub start: OffsetDateTime,
    pub consumption_kwh: f64,
    pub injection_kwh: f64,
}

impl Timestamped for ConsumptionRecord {
    fn timestamp(&self) -> OffsetDateTime {
        self.start
    }
}

impl IntervalRecord for ConsumptionRecord {
    fn with_start(&self, start: OffsetDateTime) -> Self {
        Self { start, ..self.clone() }
    }
}

impl CsvRow for ConsumptionRecord {
    const HEADER: &'static [&'static str] = &["starting_datetime", "consumption_kwh", "injection_kwh"];

    fn to_row(&self) -> Vec<String> {
        vec![
            format_timestamp(self.start),
            format!("{:.3}", self.consumption_kwh),
            format!("{:.3}", self.injection_kwh),
        ]
    }

    fn from_row(row: &StringRecord) -> Result<Self, RowError> {
        check_len(row, Self::HEADER.len())?;
        Ok(Self {
            start: parse_timestamp(&row[0])?,
            consumption_kwh: parse_f64(row, 1, "consumption_kwh")?,
            injection_kwh: parse_f64(row, 2, "injection_kwh")?,
        })
    }
}
