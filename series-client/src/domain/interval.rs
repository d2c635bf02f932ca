use time::{Duration, OffsetDateTime, UtcOffset};

/// Width of one canonical interval.
pub const QUARTER_HOUR: Duration = Duration::minutes(15);

/// Number of canonical intervals in a UTC calendar day.
pub const SLOTS_PER_DAY: usize = 96;

/// Anything persisted in a canonical series carries the instant it is keyed by.
pub trait Timestamped {
    fn timestamp(&self) -> OffsetDateTime;
}

/// A record keyed by the **start** of a 15-minute interval.
///
/// Implementors guarantee `start()` is UTC and quarter-hour aligned once the
/// record leaves normalization.
pub trait IntervalRecord: Timestamped + Clone {
    fn start(&self) -> OffsetDateTime {
        self.timestamp()
    }

    /// Same values, moved to another interval. Used by forward-fill.
    fn with_start(&self, start: OffsetDateTime) -> Self;
}

pub fn is_quarter_aligned(ts: OffsetDateTime) -> bool {
    ts.offset() == UtcOffset::UTC && ts.unix_timestamp().rem_euclid(900) == 0 && ts.nanosecond() == 0
}

/// Floors an instant to the start of its quarter hour, in UTC.
pub fn floor_to_quarter(ts: OffsetDateTime) -> OffsetDateTime {
    let excess = Duration::seconds(ts.unix_timestamp().rem_euclid(900)) + Duration::nanoseconds(i64::from(ts.nanosecond()));
    (ts - excess).to_offset(UtcOffset::UTC)
}
