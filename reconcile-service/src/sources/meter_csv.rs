//! Metering device energy export (`em_data.<device>.csv`).

use series_client::{row::parse_timestamp, MeterSample};

use super::{malformed_timestamp, schema_mismatch, Normalize, SourceKind};
use crate::pipeline::PipelineError;

const COLUMNS: usize = 5;

/// Reads one device export: timestamp (UTC), energy in and out (Wh) and the
/// min/max voltage over the sample period.
#[derive(Debug, Clone)]
pub struct MeterCsvNormalizer {
    device: String,
}

impl MeterCsvNormalizer {
    pub fn new(device: impl Into<String>) -> Self {
        Self { device: device.into() }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn file_name(device: &str) -> String {
        format!("em_data.{device}.csv")
    }
}

fn optional_number(origin: &str, column: &str, raw: &str) -> Result<Option<f64>, PipelineError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse()
        .map(Some)
        .map_err(|_| schema_mismatch(origin, format!("{column} '{raw}' is not a number")))
}

impl Normalize for MeterCsvNormalizer {
    type Record = MeterSample;

    fn kind(&self) -> SourceKind {
        SourceKind::Meter
    }

    fn matches(&self, file_name: &str) -> bool {
        file_name == Self::file_name(&self.device)
    }

    fn normalize(&self, origin: &str, raw: &[u8]) -> Result<Vec<MeterSample>, PipelineError> {
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(raw);

        let header_len = reader
            .headers()
            .map_err(|e| schema_mismatch(origin, e.to_string()))?
            .len();
        if header_len != COLUMNS {
            return Err(schema_mismatch(origin, format!("expected {COLUMNS} columns, found {header_len}")));
        }

        let mut out = Vec::new();
        for rec in reader.records() {
            let rec = rec.map_err(|e| schema_mismatch(origin, e.to_string()))?;
            if rec.len() != COLUMNS {
                return Err(schema_mismatch(origin, format!("expected {COLUMNS} columns, found {}", rec.len())));
            }

            let timestamp = parse_timestamp(&rec[0]).map_err(|_| malformed_timestamp(origin, &rec[0]))?;
            out.push(MeterSample {
                timestamp,
                energy_in_wh: optional_number(origin, "energy in", &rec[1])?.unwrap_or(0.0),
                energy_out_wh: optional_number(origin, "energy out", &rec[2])?.unwrap_or(0.0),
                voltage_min: optional_number(origin, "voltage min", &rec[3])?,
                voltage_max: optional_number(origin, "voltage max", &rec[4])?,
            });
        }
        Ok(out)
    }
}
