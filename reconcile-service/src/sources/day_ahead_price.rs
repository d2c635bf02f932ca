//! Day-ahead market price files (`marginalpdbcpt_YYYYMMDD.1`).
//!
//! Semicolon separated. The first line is a title and the last line is an
//! end marker; every line in between is
//! `year;month;day;period;price_es;price_pt;` with prices in EUR/MWh.

use series_client::{domain::QUARTER_HOUR, PriceRecord};
use time::{macros::format_description, Date, Duration, Month};
use tracing::debug;

use super::{malformed_timestamp, schema_mismatch, Normalize, SourceKind};
use crate::{align::forward_fill_quarter_hours, pipeline::PipelineError};

pub const FILE_PREFIX: &str = "marginalpdbcpt_";

/// Above this many periods a file is on the quarter-hour market time unit.
const MAX_HOURLY_PERIODS: usize = 25;

/// Canonical raw file name for one market day.
pub fn file_name(date: Date) -> String {
    let stamp = date
        .format(format_description!("[year][month][day]"))
        .unwrap_or_else(|_| date.to_string());
    format!("{FILE_PREFIX}{stamp}.1")
}

#[derive(Debug, Clone, Default)]
pub struct DayAheadPriceNormalizer;

impl Normalize for DayAheadPriceNormalizer {
    type Record = PriceRecord;

    fn kind(&self) -> SourceKind {
        SourceKind::Price
    }

    fn normalize(&self, origin: &str, raw: &[u8]) -> Result<Vec<PriceRecord>, PipelineError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b';')
            .has_headers(false)
            .flexible(true)
            .from_reader(raw);

        let mut lines = Vec::new();
        for rec in reader.records() {
            let rec = rec.map_err(|e| schema_mismatch(origin, e.to_string()))?;
            if rec.iter().any(|f| !f.trim().is_empty()) {
                lines.push(rec);
            }
        }
        if lines.len() < 2 {
            return Err(schema_mismatch(origin, "missing title or end marker line"));
        }
        let body = &lines[1..lines.len() - 1];

        let step = if body.len() > MAX_HOURLY_PERIODS {
            QUARTER_HOUR
        } else {
            Duration::HOUR
        };

        let mut out = Vec::with_capacity(body.len());
        for rec in body {
            if !(6..=7).contains(&rec.len()) {
                return Err(schema_mismatch(origin, format!("expected 6 or 7 fields, found {}", rec.len())));
            }

            let field = |i: usize| rec.get(i).unwrap_or("").trim();
            let date = parse_date(field(0), field(1), field(2))
                .ok_or_else(|| malformed_timestamp(origin, format!("{};{};{}", field(0), field(1), field(2))))?;
            let period: i32 = field(3)
                .parse()
                .ok()
                .filter(|p| *p >= 1)
                .ok_or_else(|| malformed_timestamp(origin, format!("{date} period {}", field(3))))?;
            let price: f64 = field(5)
                .replace(',', ".")
                .parse()
                .map_err(|_| schema_mismatch(origin, format!("price '{}' is not a number", field(5))))?;

            let start = date.midnight().assume_utc() + step * (period - 1);
            if start.date() != date {
                debug!(file = origin, period, "period outside the market day dropped");
                continue;
            }
            out.push(PriceRecord {
                start,
                price_eur_per_mwh: price,
            });
        }
        Ok(out)
    }

    fn align(&self, records: Vec<PriceRecord>) -> Vec<PriceRecord> {
        forward_fill_quarter_hours(records)
    }
}

fn parse_date(year: &str, month: &str, day: &str) -> Option<Date> {
    let month = Month::try_from(month.parse::<u8>().ok()?).ok()?;
    Date::from_calendar_date(year.parse().ok()?, month, day.parse().ok()?).ok()
}
