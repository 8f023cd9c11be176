//! Beijing-time wall clock. Hardcoded fixed offset, never process locale, per the
//! ingestion core's time-zone handling rule.

use chrono::{DateTime, FixedOffset, NaiveTime, TimeZone, Utc};

/// UTC+8, the fixed offset used throughout the ingestion core.
#[must_use]
pub fn beijing_offset() -> FixedOffset {
    FixedOffset::east_opt(8 * 3600).expect("UTC+8 is a valid fixed offset")
}

/// The current wall-clock time in Beijing.
#[must_use]
pub fn now_beijing() -> DateTime<FixedOffset> {
    beijing_offset().from_utc_datetime(&Utc::now().naive_utc())
}

/// Format a Beijing timestamp as `YYYY-MM-DD HH:MM:SS`.
#[must_use]
pub fn format_beijing(dt: DateTime<FixedOffset>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Parse a `HH:MM` close-finalize-time string. Returns `None` on malformed input.
#[must_use]
pub fn parse_close_time(raw: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M").ok()
}

/// `true` iff the current Beijing wall-clock time is at or past `close_finalize_time`.
///
/// Weekday and holiday calendars are not consulted; callers are responsible for
/// invoking this only on days they already believe are trading days.
#[must_use]
pub fn market_closed_now(close_finalize_time: NaiveTime) -> bool {
    now_beijing().time() >= close_finalize_time
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_close_time_accepts_hh_mm() {
        assert_eq!(
            parse_close_time("15:05"),
            Some(NaiveTime::from_hms_opt(15, 5, 0).unwrap())
        );
    }

    #[test]
    fn parse_close_time_rejects_garbage() {
        assert_eq!(parse_close_time("not-a-time"), None);
    }

    #[test]
    fn beijing_offset_is_plus_eight_hours() {
        assert_eq!(beijing_offset().local_minus_utc(), 8 * 3600);
    }
}
