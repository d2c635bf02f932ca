//! Grid-operator consumption export (`.xlsx`, sheet `Leituras`).
//!
//! The sheet opens with a 14-row preamble, then a header row, then one row
//! per quarter hour. Readings are average power over the interval (kW) and
//! are stamped with the interval end.

use series_client::{domain::QUARTER_HOUR, row::round_to, ConsumptionRecord};
use tracing::debug;

use super::{
    malformed_timestamp, schema_mismatch,
    table::{at_time_of_day, cell, is_blank, read_sheet, row_width, Cell},
    Normalize, SourceKind,
};
use crate::pipeline::PipelineError;

pub const SHEET: &str = "Leituras";
const PREAMBLE_ROWS: usize = 14;

/// Date, time, consumption, injection positions for the raw 10-column export.
const RAW_COLUMNS: [usize; 4] = [0, 1, 6, 8];
/// Same positions for a sheet already cut down to those four columns.
const REDUCED_COLUMNS: [usize; 4] = [0, 1, 2, 3];

/// Splits a signed net reading into its consumption and injection parts.
/// Exactly one side is non-zero (or both are zero).
pub fn split_net(net: f64) -> (f64, f64) {
    (net.max(0.0), (-net).max(0.0))
}

#[derive(Debug, Clone)]
pub struct ConsumptionXlsxNormalizer {
    sheet: String,
}

impl Default for ConsumptionXlsxNormalizer {
    fn default() -> Self {
        Self {
            sheet: SHEET.to_string(),
        }
    }
}

impl ConsumptionXlsxNormalizer {
    pub fn with_sheet(sheet: impl Into<String>) -> Self {
        Self { sheet: sheet.into() }
    }

    pub fn normalize_rows(&self, origin: &str, rows: &[Vec<Cell>]) -> Result<Vec<ConsumptionRecord>, PipelineError> {
        let header = rows
            .get(PREAMBLE_ROWS)
            .ok_or_else(|| schema_mismatch(origin, format!("expected a header row after {PREAMBLE_ROWS} preamble rows")))?;

        let [date_col, time_col, consumption_col, injection_col] = match row_width(header) {
            10 => RAW_COLUMNS,
            4 => REDUCED_COLUMNS,
            n => return Err(schema_mismatch(origin, format!("expected 10 or 4 columns, found {n}"))),
        };

        let mut out = Vec::with_capacity(rows.len().saturating_sub(PREAMBLE_ROWS + 1));
        for (idx, row) in rows.iter().enumerate().skip(PREAMBLE_ROWS + 1) {
            if is_blank(row) {
                continue;
            }

            let consumption = read_kw(origin, cell(row, consumption_col), idx)?;
            let injection = read_kw(origin, cell(row, injection_col), idx)?;
            if consumption.is_none() && injection.is_none() {
                debug!(file = origin, row = idx, "consumption row without readings skipped");
                continue;
            }

            let date_cell = cell(row, date_col);
            let time_cell = cell(row, time_col);
            let date = date_cell
                .as_date()
                .ok_or_else(|| malformed_timestamp(origin, date_cell.to_string()))?;
            let time_of_day = time_cell
                .as_time_of_day()
                .ok_or_else(|| malformed_timestamp(origin, format!("{date_cell} {time_cell}")))?;

            let net = consumption.unwrap_or(0.0) - injection.unwrap_or(0.0);
            let (consumed_kw, injected_kw) = split_net(net);

            out.push(ConsumptionRecord {
                start: at_time_of_day(date, time_of_day) - QUARTER_HOUR,
                consumption_kwh: round_to(consumed_kw / 4.0, 3),
                injection_kwh: round_to(injected_kw / 4.0, 3),
            });
        }
        Ok(out)
    }
}

fn read_kw(origin: &str, c: &Cell, row: usize) -> Result<Option<f64>, PipelineError> {
    if c.is_empty() {
        return Ok(None);
    }
    c.as_f64()
        .map(Some)
        .ok_or_else(|| schema_mismatch(origin, format!("row {row}: '{c}' is not a number")))
}

impl Normalize for ConsumptionXlsxNormalizer {
    type Record = ConsumptionRecord;

    fn kind(&self) -> SourceKind {
        SourceKind::Consumption
    }

    fn normalize(&self, origin: &str, raw: &[u8]) -> Result<Vec<ConsumptionRecord>, PipelineError> {
        let rows = read_sheet(raw, Some(&self.sheet), origin)?;
        self.normalize_rows(origin, &rows)
    }
}
