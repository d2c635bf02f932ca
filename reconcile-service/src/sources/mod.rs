//! Raw file normalizers, one per source kind, and the batch source that
//! streams their output into a pipeline.

pub mod consumption_xlsx;
pub mod day_ahead_price;
pub mod loss_profile_xlsx;
pub mod meter_csv;
pub mod raw_files;
pub mod table;

use std::fmt;

use crate::pipeline::PipelineError;

pub use consumption_xlsx::ConsumptionXlsxNormalizer;
pub use day_ahead_price::DayAheadPriceNormalizer;
pub use loss_profile_xlsx::LossProfileXlsxNormalizer;
pub use meter_csv::MeterCsvNormalizer;
pub use raw_files::RawFileBatchSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Consumption,
    Price,
    LossProfile,
    Meter,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Consumption => "consumption",
            Self::Price => "price",
            Self::LossProfile => "loss_profile",
            Self::Meter => "meter",
        }
    }

    /// Default raw file-name filter for this kind.
    pub fn matches_file(&self, file_name: &str) -> bool {
        match self {
            Self::Consumption | Self::LossProfile => file_name.ends_with(".xlsx") && !file_name.starts_with("~$"),
            Self::Price => file_name.starts_with(day_ahead_price::FILE_PREFIX) && file_name.ends_with(".1"),
            Self::Meter => file_name.starts_with("em_data.") && file_name.ends_with(".csv"),
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Turns one raw file into canonical records.
///
/// `normalize` handles parsing and unit/sign/timestamp conventions of the
/// source; `align` puts the result on the 15-minute grid where the source's
/// native cadence differs. A structural failure (layout, timestamps, numbers
/// that do not parse) rejects the file as a whole. Value checks on parsed
/// records happen later, per record, in
/// [`RecordValidation`](crate::transform::RecordValidation).
pub trait Normalize: Send + Sync {
    type Record: Send + 'static;

    fn kind(&self) -> SourceKind;

    fn matches(&self, file_name: &str) -> bool {
        self.kind().matches_file(file_name)
    }

    fn normalize(&self, origin: &str, raw: &[u8]) -> Result<Vec<Self::Record>, PipelineError>;

    fn align(&self, records: Vec<Self::Record>) -> Vec<Self::Record> {
        records
    }
}

pub(crate) fn schema_mismatch(origin: &str, detail: impl Into<String>) -> PipelineError {
    PipelineError::SchemaMismatch {
        file: origin.to_string(),
        detail: detail.into(),
    }
}

pub(crate) fn malformed_timestamp(origin: &str, value: impl Into<String>) -> PipelineError {
    PipelineError::MalformedTimestamp {
        file: origin.to_string(),
        value: value.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_file_filters() {
        assert!(SourceKind::Price.matches_file("marginalpdbcpt_20240401.1"));
        assert!(!SourceKind::Price.matches_file("marginalpdbcpt_20240401.1.tmp"));
        assert!(SourceKind::Consumption.matches_file("Consumos_202404.xlsx"));
        assert!(!SourceKind::Consumption.matches_file("~$Consumos_202404.xlsx"));
        assert!(SourceKind::Meter.matches_file("em_data.grid.csv"));
    }
}
