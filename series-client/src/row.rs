//! Flat CSV layout shared by every persisted canonical series.
//!
//! One header row, then one row per record. The first column is always the
//! UTC key instant, written as `YYYY-MM-DD HH:MM:SS+00:00`.

use std::io::{Read, Write};

use csv::StringRecord;
use time::{macros::format_description, OffsetDateTime, PrimitiveDateTime, UtcOffset};

#[derive(thiserror::Error, Debug)]
pub enum RowError {
    #[error("expected {expected} columns, found {found}")]
    ColumnCount { expected: usize, found: usize },
    #[error("invalid timestamp '{0}'")]
    Timestamp(String),
    #[error("invalid number '{value}' in column '{column}'")]
    Number { column: &'static str, value: String },
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

/// A record type with a fixed persisted column layout.
pub trait CsvRow: Sized {
    const HEADER: &'static [&'static str];

    fn to_row(&self) -> Vec<String>;

    fn from_row(row: &StringRecord) -> Result<Self, RowError>;
}

pub fn format_timestamp(ts: OffsetDateTime) -> String {
    let ts = ts.to_offset(UtcOffset::UTC);
    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}+00:00",
        ts.year(),
        u8::from(ts.month()),
        ts.day(),
        ts.hour(),
        ts.minute(),
        ts.second()
    )
}

/// Parses the persisted timestamp layout, RFC 3339, or a naive
/// `YYYY-MM-DD HH:MM[:SS]` which is taken to be UTC.
pub fn parse_timestamp(raw: &str) -> Result<OffsetDateTime, RowError> {
    let s = raw.trim();
    if let Ok(ts) = OffsetDateTime::parse(s, &time::format_description::well_known::Rfc3339) {
        return Ok(ts.to_offset(UtcOffset::UTC));
    }

    let naive = s
        .strip_suffix("+00:00")
        .or_else(|| s.strip_suffix('Z'))
        .unwrap_or(s)
        .trim()
        .replace('T', " ");

    PrimitiveDateTime::parse(&naive, format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"))
        .or_else(|_| PrimitiveDateTime::parse(&naive, format_description!("[year]-[month]-[day] [hour]:[minute]")))
        .map(PrimitiveDateTime::assume_utc)
        .map_err(|_| RowError::Timestamp(raw.to_string()))
}

/// Rounds half away from zero to `decimals` places.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    let rounded = (value * scale).round() / scale;
    // Avoid persisting "-0.000".
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

pub(crate) fn check_len(row: &StringRecord, expected: usize) -> Result<(), RowError> {
    if row.len() != expected {
        return Err(RowError::ColumnCount {
            expected,
            found: row.len(),
        });
    }
    Ok(())
}

pub(crate) fn parse_f64(row: &StringRecord, idx: usize, column: &'static str) -> Result<f64, RowError> {
    let raw = row.get(idx).unwrap_or("");
    raw.trim().parse().map_err(|_| RowError::Number {
        column,
        value: raw.to_string(),
    })
}

pub(crate) fn parse_optional_f64(row: &StringRecord, idx: usize, column: &'static str) -> Result<Option<f64>, RowError> {
    match row.get(idx).map(str::trim) {
        None | Some("") => Ok(None),
        Some(_) => parse_f64(row, idx, column).map(Some),
    }
}

pub(crate) fn format_optional(value: Option<f64>, decimals: usize) -> String {
    value.map(|v| format!("{v:.decimals$}")).unwrap_or_default()
}

/// Writes a full series, header first.
pub fn write_series<R: CsvRow, W: Write>(records: &[R], writer: W) -> Result<(), RowError> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);
    wtr.write_record(R::HEADER)?;
    for r in records {
        wtr.write_record(r.to_row())?;
    }
    wtr.flush().map_err(csv::Error::from)?;
    Ok(())
}

/// Reads a full series. The header row is checked for width only, so
/// files written by earlier column names still load.
pub fn read_series<R: CsvRow, Rd: Read>(reader: Rd) -> Result<Vec<R>, RowError> {
    let mut rdr = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);
    let headers = rdr.headers()?.clone();
    check_len(&headers, R::HEADER.len())?;

    let mut out = Vec::new();
    for result in rdr.records() {
        let record = result?;
        out.push(R::from_row(&record)?);
    }
    Ok(out)
}
