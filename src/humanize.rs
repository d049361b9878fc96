//! Relative "time ago" strings for inbox rows.
//!
//! Thresholds follow moment.js `fromNow()`.

use chrono::{DateTime, Utc};

/// Humanize `then` relative to `now`, e.g. "a few seconds ago", "3 hours ago".
///
/// Timestamps in the future (clock skew between writers) read as "a few seconds ago".
pub fn time_ago(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = (now - then).num_seconds().max(0) as f64;
    let minutes = (seconds / 60.0).round();
    let hours = (seconds / 3600.0).round();
    let days = (seconds / 86_400.0).round();
    let months = (days / 30.4375).round();
    let years = (days / 365.25).round();

    if seconds < 45.0 {
        "a few seconds ago".to_string()
    } else if seconds < 90.0 {
        "a minute ago".to_string()
    } else if minutes < 45.0 {
        format!("{} minutes ago", minutes as i64)
    } else if minutes < 90.0 {
        "an hour ago".to_string()
    } else if hours < 22.0 {
        format!("{} hours ago", hours as i64)
    } else if hours < 36.0 {
        "a day ago".to_string()
    } else if days < 26.0 {
        format!("{} days ago", days as i64)
    } else if days < 45.0 {
        "a month ago".to_string()
    } else if days < 320.0 {
        format!("{} months ago", months.max(2.0) as i64)
    } else if days < 548.0 {
        "a year ago".to_string()
    } else {
        format!("{} years ago", years.max(2.0) as i64)
    }
}
