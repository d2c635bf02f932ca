use csv::StringRecord;
use time::OffsetDateTime;

use super::interval::{IntervalRecord, Timestamped};
use crate::row::{check_len, format_timestamp, parse_f64, parse_timestamp, CsvRow, RowError};

/// Regulatory network-loss coefficient applied multiplicatively to the
/// wholesale price of one interval.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LossProfileRecord {
    pub start: OffsetDateTime,
    pub loss_fraction: f64,
}

impl Timestamped for LossProfileRecord {
    fn timestamp(&self) -> OffsetDateTime {
        self.start
    }
}

impl IntervalRecord for LossProfileRecord {
    fn with_start(&self, start: OffsetDateTime) -> Self {
        Self { start, ..self.clone() }
    }
}

impl CsvRow for LossProfileRecord {
    const HEADER: &'static [&'static str] = &["starting_datetime", "losses_profile"];

    fn to_row(&self) -> Vec<String> {
        vec![format_timestamp(self.start), self.loss_fraction.to_string()]
    }

    fn from_row(row: &StringRecord) -> Result<Self, RowError> {
        check_len(row, Self::HEADER.len())?;
        Ok(Self {
            start: parse_timestamp(&row[0])?,
            loss_fraction: parse_f64(row, 1, "losses_profile")?,
        })
    }
}
