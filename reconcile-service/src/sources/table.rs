//! Spreadsheet decoding into a neutral cell grid.
//!
//! Normalizers work on [`Cell`] rows rather than on `calamine` types so the
//! column logic can be exercised without workbook fixtures.

use std::{fmt, io::Cursor};

use calamine::{Data, Reader, Xlsx};
use time::{macros::datetime, Date, Duration, Month, OffsetDateTime, PrimitiveDateTime};

use super::schema_mismatch;
use crate::pipeline::PipelineError;

/// Day zero of the spreadsheet serial date system (1900 system, as Excel
/// counts it after the 1900 leap-year bug).
const SERIAL_EPOCH: PrimitiveDateTime = datetime!(1899-12-30 0:00);

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
    DateTime(PrimitiveDateTime),
}

impl Cell {
    fn from_data(data: &Data) -> Self {
        match data {
            Data::Empty | Data::Error(_) => Cell::Empty,
            Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => {
                if s.trim().is_empty() {
                    Cell::Empty
                } else {
                    Cell::Text(s.trim().to_string())
                }
            }
            Data::Int(i) => Cell::Number(*i as f64),
            Data::Float(f) => Cell::Number(*f),
            Data::Bool(b) => Cell::Text(b.to_string()),
            Data::DateTime(dt) => serial_to_datetime(dt.as_f64()).map_or(Cell::Number(dt.as_f64()), Cell::DateTime),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Cell::Empty)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Number(f) => Some(*f),
            Cell::Text(s) => s.trim().replace(',', ".").parse().ok(),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<Date> {
        match self {
            Cell::DateTime(dt) => Some(dt.date()),
            Cell::Text(s) => parse_date_text(s),
            Cell::Number(f) if *f >= 1.0 => serial_to_datetime(*f).map(|dt| dt.date()),
            _ => None,
        }
    }

    /// Time since midnight. `24:00` is accepted and means end of day.
    pub fn as_time_of_day(&self) -> Option<Duration> {
        match self {
            Cell::Text(s) => parse_time_of_day(s),
            Cell::Number(f) if (0.0..=1.0).contains(f) => Some(Duration::seconds((f * 86_400.0).round() as i64)),
            // Pure time values sit on the epoch's first day(s); 24:00 lands on day one.
            Cell::DateTime(dt) if dt.year() < 1900 => Some(*dt - SERIAL_EPOCH),
            Cell::DateTime(dt) => Some(dt.time() - time::Time::MIDNIGHT),
            _ => None,
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Empty => f.write_str(""),
            Cell::Text(s) => f.write_str(s),
            Cell::Number(n) => write!(f, "{n}"),
            Cell::DateTime(dt) => write!(f, "{dt}"),
        }
    }
}

fn serial_to_datetime(serial: f64) -> Option<PrimitiveDateTime> {
    if !serial.is_finite() || serial < 0.0 {
        return None;
    }
    SERIAL_EPOCH.checked_add(Duration::seconds((serial * 86_400.0).round() as i64))
}

/// Accepts `YYYY-MM-DD`, `YYYY/MM/DD`, `DD-MM-YYYY` and `DD/MM/YYYY`, with
/// an optional trailing time part which is ignored.
pub fn parse_date_text(s: &str) -> Option<Date> {
    let date_part = s.split_whitespace().next()?.split('T').next()?;
    let parts: Vec<&str> = date_part.split(['-', '/', '.']).collect();
    if parts.len() != 3 {
        return None;
    }

    let (y, m, d) = if parts[0].len() == 4 {
        (parts[0], parts[1], parts[2])
    } else if parts[2].len() == 4 {
        (parts[2], parts[1], parts[0])
    } else {
        return None;
    };

    let month = Month::try_from(m.parse::<u8>().ok()?).ok()?;
    Date::from_calendar_date(y.parse().ok()?, month, d.parse().ok()?).ok()
}

/// `HH:MM` or `HH:MM:SS`; hour 24 only as `24:00[:00]`.
pub fn parse_time_of_day(s: &str) -> Option<Duration> {
    let mut fields = s.trim().split(':');
    let hours: i64 = fields.next()?.trim().parse().ok()?;
    let minutes: i64 = fields.next()?.trim().parse().ok()?;
    let seconds: i64 = match fields.next() {
        Some(sec) => sec.trim().parse().ok()?,
        None => 0,
    };
    if fields.next().is_some() || !(0..60).contains(&minutes) || !(0..60).contains(&seconds) {
        return None;
    }
    if !(0..=24).contains(&hours) || (hours == 24 && (minutes, seconds) != (0, 0)) {
        return None;
    }
    Some(Duration::hours(hours) + Duration::minutes(minutes) + Duration::seconds(seconds))
}

pub fn at_time_of_day(date: Date, time_of_day: Duration) -> OffsetDateTime {
    date.midnight().assume_utc() + time_of_day
}

static EMPTY: Cell = Cell::Empty;

/// Cell at `col`, or [`Cell::Empty`] past the end of a short row.
pub fn cell(row: &[Cell], col: usize) -> &Cell {
    row.get(col).unwrap_or(&EMPTY)
}

/// Number of columns up to the last non-empty cell.
pub fn row_width(row: &[Cell]) -> usize {
    row.iter().rposition(|c| !c.is_empty()).map_or(0, |i| i + 1)
}

pub fn is_blank(row: &[Cell]) -> bool {
    row_width(row) == 0
}

/// Reads one worksheet into absolute row/column positions: row 0 is the
/// sheet's first row even when the used range starts lower down.
pub fn read_sheet(raw: &[u8], sheet: Option<&str>, origin: &str) -> Result<Vec<Vec<Cell>>, PipelineError> {
    let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(raw))
        .map_err(|e| schema_mismatch(origin, format!("not a readable workbook: {e}")))?;

    let name = match sheet {
        Some(name) => name.to_string(),
        None => workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| schema_mismatch(origin, "workbook has no sheets"))?,
    };

    let range = workbook
        .worksheet_range(&name)
        .map_err(|e| schema_mismatch(origin, format!("cannot read sheet '{name}': {e}")))?;

    let (row0, col0) = range.start().unwrap_or((0, 0));
    let mut rows: Vec<Vec<Cell>> = (0..row0).map(|_| Vec::new()).collect();
    for row in range.rows() {
        let mut cells = vec![Cell::Empty; col0 as usize];
        cells.extend(row.iter().map(Cell::from_data));
        rows.push(cells);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn date_text_in_common_layouts() {
        assert_eq!(parse_date_text("2024/04/01"), Some(date!(2024 - 04 - 01)));
        assert_eq!(parse_date_text("2024-04-01 00:00:00"), Some(date!(2024 - 04 - 01)));
        assert_eq!(parse_date_text("01/04/2024"), Some(date!(2024 - 04 - 01)));
        assert_eq!(parse_date_text("2024-13-01"), None);
        assert_eq!(parse_date_text("yesterday"), None);
    }

    #[test]
    fn time_of_day_accepts_end_of_day() {
        assert_eq!(parse_time_of_day("00:15"), Some(Duration::minutes(15)));
        assert_eq!(parse_time_of_day("23:45:00"), Some(Duration::minutes(23 * 60 + 45)));
        assert_eq!(parse_time_of_day("24:00"), Some(Duration::days(1)));
        assert_eq!(parse_time_of_day("24:15"), None);
        assert_eq!(parse_time_of_day("7h15"), None);
    }

    #[test]
    fn serial_cells_convert_to_dates_and_times() {
        // 45383 is 2024-04-01 in the 1900 date system.
        assert_eq!(Cell::Number(45383.0).as_date(), Some(date!(2024 - 04 - 01)));
        assert_eq!(Cell::Number(0.25).as_time_of_day(), Some(Duration::hours(6)));

        let end_of_day = Cell::DateTime(datetime!(1899-12-31 0:00));
        assert_eq!(end_of_day.as_time_of_day(), Some(Duration::days(1)));

        let stamped = Cell::DateTime(datetime!(2024-04-01 13:30));
        assert_eq!(stamped.as_time_of_day(), Some(Duration::minutes(13 * 60 + 30)));
    }

    #[test]
    fn numbers_accept_decimal_comma() {
        assert_eq!(Cell::Text("0,125".into()).as_f64(), Some(0.125));
        assert_eq!(Cell::Empty.as_f64(), None);
    }

    #[test]
    fn width_ignores_trailing_empty_cells() {
        let row = vec![Cell::Text("a".into()), Cell::Empty, Cell::Number(1.0), Cell::Empty];
        assert_eq!(row_width(&row), 3);
        assert!(is_blank(&[Cell::Empty, Cell::Empty]));
    }

    #[test]
    fn garbage_bytes_are_a_schema_mismatch() {
        let res = read_sheet(b"not a zip archive", None, "bad.xlsx");
        assert!(matches!(res, Err(PipelineError::SchemaMismatch { .. })));
    }
}
