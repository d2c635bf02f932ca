//! Regulatory grid-loss profile workbook.
//!
//! First sheet, two title rows, a header row, then one row per quarter hour
//! with the date in column 1, the interval-end time (`HH:MM`) in column 3
//! and the loss fraction in column 4.

use series_client::{domain::QUARTER_HOUR, LossProfileRecord};

use super::{
    malformed_timestamp, schema_mismatch,
    table::{at_time_of_day, cell, is_blank, read_sheet, row_width, Cell},
    Normalize, SourceKind,
};
use crate::{align::forward_fill_quarter_hours, pipeline::PipelineError};

const PREAMBLE_ROWS: usize = 2;
const MIN_COLUMNS: usize = 5;
const DATE_COL: usize = 1;
const TIME_COL: usize = 3;
const VALUE_COL: usize = 4;

#[derive(Debug, Clone, Default)]
pub struct LossProfileXlsxNormalizer;

impl LossProfileXlsxNormalizer {
    pub fn normalize_rows(&self, origin: &str, rows: &[Vec<Cell>]) -> Result<Vec<LossProfileRecord>, PipelineError> {
        let header = rows
            .get(PREAMBLE_ROWS)
            .ok_or_else(|| schema_mismatch(origin, "missing header row"))?;
        let width = row_width(header);
        if width < MIN_COLUMNS {
            return Err(schema_mismatch(
                origin,
                format!("expected at least {MIN_COLUMNS} columns, found {width}"),
            ));
        }

        let mut out = Vec::new();
        for (idx, row) in rows.iter().enumerate().skip(PREAMBLE_ROWS + 1) {
            let date_cell = cell(row, DATE_COL);
            let value_cell = cell(row, VALUE_COL);
            // Trailing notes below the table have neither a date nor a value.
            if is_blank(row) || (date_cell.is_empty() && value_cell.is_empty()) {
                continue;
            }

            let time_cell = cell(row, TIME_COL);
            let date = date_cell
                .as_date()
                .ok_or_else(|| malformed_timestamp(origin, date_cell.to_string()))?;
            let time_of_day = time_cell
                .as_time_of_day()
                .ok_or_else(|| malformed_timestamp(origin, format!("{date_cell} {time_cell}")))?;
            let loss_fraction = value_cell
                .as_f64()
                .ok_or_else(|| schema_mismatch(origin, format!("row {idx}: '{value_cell}' is not a number")))?;

            out.push(LossProfileRecord {
                start: at_time_of_day(date, time_of_day) - QUARTER_HOUR,
                loss_fraction,
            });
        }
        Ok(out)
    }
}

impl Normalize for LossProfileXlsxNormalizer {
    type Record = LossProfileRecord;

    fn kind(&self) -> SourceKind {
        SourceKind::LossProfile
    }

    fn normalize(&self, origin: &str, raw: &[u8]) -> Result<Vec<LossProfileRecord>, PipelineError> {
        let rows = read_sheet(raw, None, origin)?;
        self.normalize_rows(origin, &rows)
    }

    fn align(&self, records: Vec<LossProfileRecord>) -> Vec<LossProfileRecord> {
        forward_fill_quarter_hours(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn text(s: &str) -> Cell {
        Cell::Text(s.to_string())
    }

    fn profile_row(date: &str, time: &str, value: f64) -> Vec<Cell> {
        vec![text("BT"), text(date), text("x"), text(time), Cell::Number(value)]
    }

    fn workbook(data: Vec<Vec<Cell>>) -> Vec<Vec<Cell>> {
        let mut rows = vec![vec![text("Perfis de perdas")], vec![]];
        rows.push(vec![text("nivel"), text("data"), text("dia"), text("hora"), text("perfil")]);
        rows.extend(data);
        rows
    }

    #[test]
    fn interval_end_times_become_interval_starts() {
        let rows = workbook(vec![
            profile_row("2024-04-01", "00:15", 0.11),
            profile_row("2024-04-01", "00:30", 0.12),
            vec![text("Nota: valores provisórios")],
        ]);

        let records = LossProfileXlsxNormalizer.normalize_rows("l.xlsx", &rows).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].start, datetime!(2024-04-01 00:00:00 UTC));
        assert_eq!(records[0].loss_fraction, 0.11);
        assert_eq!(records[1].start, datetime!(2024-04-01 00:15:00 UTC));
    }

    #[test]
    fn narrow_sheet_is_schema_mismatch() {
        let mut rows = vec![vec![], vec![]];
        rows.push(vec![text("data"), text("hora"), text("perfil")]);
        let err = LossProfileXlsxNormalizer.normalize_rows("l.xlsx", &rows).unwrap_err();
        assert!(matches!(err, PipelineError::SchemaMismatch { .. }));
    }

    #[test]
    fn bad_time_is_malformed_timestamp() {
        let rows = workbook(vec![profile_row("2024-04-01", "quarter past", 0.1)]);
        let err = LossProfileXlsxNormalizer.normalize_rows("l.xlsx", &rows).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedTimestamp { .. }));
    }
}
