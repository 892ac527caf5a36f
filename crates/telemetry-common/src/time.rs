//! Time handling for station sync windows.

use chrono::{DateTime, Duration, Timelike, Utc};
use chrono_tz::Tz;

/// Format used by the remote API for local-time query bounds.
pub const API_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// A `[start, end)` request interval in a station's local timezone.
///
/// Ephemeral: recomputed on every run, never persisted. `end` is always at
/// the top of an hour so only fully-elapsed hourly buckets are requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncWindow {
    pub start: DateTime<Tz>,
    pub end: DateTime<Tz>,
}

impl SyncWindow {
    pub fn new(start: DateTime<Tz>, end: DateTime<Tz>) -> Self {
        Self { start, end }
    }

    pub fn start_utc(&self) -> DateTime<Utc> {
        self.start.with_timezone(&Utc)
    }

    pub fn end_utc(&self) -> DateTime<Utc> {
        self.end.with_timezone(&Utc)
    }

    /// Local-time start bound formatted for the remote API.
    pub fn format_start(&self) -> String {
        self.start.format(API_TIME_FORMAT).to_string()
    }

    /// Local-time end bound formatted for the remote API.
    pub fn format_end(&self) -> String {
        self.end.format(API_TIME_FORMAT).to_string()
    }

    pub fn duration(&self) -> Duration {
        self.end_utc() - self.start_utc()
    }
}

/// Truncate an instant to the start of its local hour.
///
/// Works on the instant itself (subtracting sub-hour components) rather than
/// reconstructing a local wall time, so it stays valid across DST jumps.
pub fn truncate_to_hour(dt: DateTime<Tz>) -> DateTime<Tz> {
    dt - Duration::minutes(dt.minute() as i64)
        - Duration::seconds(dt.second() as i64)
        - Duration::nanoseconds(dt.nanosecond() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::Tz;

    #[test]
    fn test_truncate_zeroes_sub_hour() {
        let tz: Tz = "Africa/Dakar".parse().unwrap();
        let dt = tz.with_ymd_and_hms(2024, 3, 10, 14, 37, 52).unwrap();
        let truncated = truncate_to_hour(dt);
        assert_eq!(truncated.hour(), 14);
        assert_eq!(truncated.minute(), 0);
        assert_eq!(truncated.second(), 0);
    }

    #[test]
    fn test_window_api_format() {
        let tz: Tz = "UTC".parse().unwrap();
        let window = SyncWindow::new(
            tz.with_ymd_and_hms(2024, 1, 15, 11, 0, 0).unwrap(),
            tz.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap(),
        );
        assert_eq!(window.format_start(), "2024-01-15T11:00:00");
        assert_eq!(window.format_end(), "2024-01-15T12:00:00");
        assert_eq!(window.duration(), Duration::hours(1));
    }

    #[test]
    fn test_window_utc_conversion() {
        let tz: Tz = "America/New_York".parse().unwrap();
        let window = SyncWindow::new(
            tz.with_ymd_and_hms(2024, 1, 15, 7, 0, 0).unwrap(),
            tz.with_ymd_and_hms(2024, 1, 15, 8, 0, 0).unwrap(),
        );
        // EST is UTC-5 in January.
        assert_eq!(window.start_utc(), Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap());
        assert_eq!(window.end_utc(), Utc.with_ymd_and_hms(2024, 1, 15, 13, 0, 0).unwrap());
    }
}
