//! Timestamps are stored as fixed-width RFC 3339 UTC text with microsecond
//! precision, so `ORDER BY` on the raw column is chronological.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};

use crate::error::{AppError, AppResult};

/// Current time at storage precision. Round-trips through the store unchanged.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(value: &str) -> AppResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AppError::Internal(anyhow::anyhow!("invalid stored timestamp {value:?}: {e}")))
}

pub fn parse_optional(value: Option<&str>) -> AppResult<Option<DateTime<Utc>>> {
    value.map(parse_timestamp).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn format_is_fixed_width() {
        let whole = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(format_timestamp(&whole), "2026-01-02T03:04:05.000000Z");

        let later = whole + chrono::Duration::microseconds(7);
        assert!(format_timestamp(&whole) < format_timestamp(&later));
    }

    #[test]
    fn now_round_trips() {
        let ts = now();
        assert_eq!(parse_timestamp(&format_timestamp(&ts)).unwrap(), ts);
    }

    #[test]
    fn garbage_is_an_internal_error() {
        assert!(matches!(
            parse_timestamp("yesterday"),
            Err(AppError::Internal(_))
        ));
        assert_eq!(parse_optional(None).unwrap(), None);
    }
}
