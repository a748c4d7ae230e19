//! Timezone and datetime helpers.
//!
//! The venue's events cover one *local* calendar day per city; everything
//! else in the engine runs in UTC. These helpers translate between the two
//! without assuming a day is 24 hours long.

use chrono::{DateTime, Datelike, LocalResult, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

use crate::errors::{EngineError, EngineResult};

/// Parse an IANA timezone name ("America/New_York").
pub fn parse_timezone(name: &str) -> EngineResult<Tz> {
    name.parse::<Tz>()
        .map_err(|_| EngineError::Precondition(format!("unknown timezone: {name}")))
}

/// Local midnight of `day` in `tz`, as an absolute instant.
///
/// On a spring-forward day where 00:00 does not exist the first valid
/// instant after the gap is used; on a fall-back day the earlier of the two
/// midnights is used.
pub fn local_midnight(day: NaiveDate, tz: Tz) -> DateTime<Tz> {
    match tz.with_ymd_and_hms(day.year(), day.month(), day.day(), 0, 0, 0) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(earliest, _) => earliest,
        LocalResult::None => {
            // Midnight skipped by DST; walk forward to the first valid hour.
            for hour in 1..=3 {
                if let LocalResult::Single(dt) =
                    tz.with_ymd_and_hms(day.year(), day.month(), day.day(), hour, 0, 0)
                {
                    return dt;
                }
            }
            tz.from_utc_datetime(&day.and_hms_opt(12, 0, 0).expect("valid time"))
        }
    }
}

/// UTC window `[start, end)` covering the full local calendar day.
///
/// The end instant is local midnight of the *next* day translated to UTC,
/// not start + 24h: on DST transition days the window is 23 or 25 hours.
pub fn local_day_window_utc(day: NaiveDate, tz: Tz) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = local_midnight(day, tz).with_timezone(&Utc);
    let end = local_midnight(day.succ_opt().unwrap_or(day), tz).with_timezone(&Utc);
    (start, end)
}

/// Filename-safe UTC timestamp used to key snapshot files within a cycle.
pub fn filename_timestamp(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d_%H-%M-%S").to_string()
}

/// Parse a datetime that may be RFC3339 (with offset) or a naive "...Z"
/// string without one. Upstreams are not consistent about this.
pub fn parse_datetime_lenient(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|| {
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%SZ")
                .ok()
                .map(|dt| dt.and_utc())
        })
        .or_else(|| {
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.fZ")
                .ok()
                .map(|dt| dt.and_utc())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_normal_day_is_24h() {
        let tz: Tz = "America/New_York".parse().unwrap();
        let day = NaiveDate::from_ymd_opt(2025, 7, 15).unwrap();
        let (start, end) = local_day_window_utc(day, tz);
        assert_eq!((end - start).num_hours(), 24);
        // EDT is UTC-4, so local midnight lands at 04:00 UTC.
        assert_eq!(start.hour(), 4);
    }

    #[test]
    fn test_spring_forward_day_is_23h() {
        // US DST begins 2025-03-09; New York loses an hour.
        let tz: Tz = "America/New_York".parse().unwrap();
        let day = NaiveDate::from_ymd_opt(2025, 3, 9).unwrap();
        let (start, end) = local_day_window_utc(day, tz);
        assert_eq!((end - start).num_hours(), 23);
    }

    #[test]
    fn test_fall_back_day_is_25h() {
        // US DST ends 2025-11-02; New York gains an hour.
        let tz: Tz = "America/New_York".parse().unwrap();
        let day = NaiveDate::from_ymd_opt(2025, 11, 2).unwrap();
        let (start, end) = local_day_window_utc(day, tz);
        assert_eq!((end - start).num_hours(), 25);
    }

    #[test]
    fn test_london_midnight_offset() {
        let tz: Tz = "Europe/London".parse().unwrap();
        // November: GMT, midnight local == midnight UTC.
        let day = NaiveDate::from_ymd_opt(2025, 11, 12).unwrap();
        let (start, _) = local_day_window_utc(day, tz);
        assert_eq!(start.hour(), 0);
    }

    #[test]
    fn test_lenient_parsing() {
        let a = parse_datetime_lenient("2025-11-12T05:00:00-05:00").unwrap();
        let b = parse_datetime_lenient("2025-11-12T10:00:00Z").unwrap();
        assert_eq!(a, b);
        assert!(parse_datetime_lenient("not a timestamp").is_none());
    }

    #[test]
    fn test_filename_timestamp_is_sortable() {
        let dt = Utc.with_ymd_and_hms(2025, 11, 12, 9, 5, 3).unwrap();
        assert_eq!(filename_timestamp(dt), "2025-11-12_09-05-03");
    }
}
