//! General utilities shared across the application.

use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Local, SecondsFormat, Utc};

// ─────────────────────────────────────────────────────────────────────────────
// Time Utilities
// ─────────────────────────────────────────────────────────────────────────────

/// Returns the current Unix timestamp in milliseconds.
///
/// Returns 0 if the system clock is before the Unix epoch (shouldn't happen in practice).
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Returns the current Unix timestamp as fractional seconds.
#[must_use]
pub fn now_secs_f64() -> f64 {
    now_millis() as f64 / 1000.0
}

/// Current wall-clock time as an ISO-8601 string with millisecond precision.
#[must_use]
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Formats a session identifier from the given local time: `session_YYYYMMDD_HHMMSS`.
#[must_use]
pub fn session_id(started: DateTime<Local>) -> String {
    started.format("session_%Y%m%d_%H%M%S").to_string()
}

/// Formats the time-of-day component used in image artifact directory names:
/// `hhmmss` plus milliseconds, e.g. `(143217, 552)`.
#[must_use]
pub fn frame_dir_time(at: DateTime<Local>) -> (String, String) {
    (
        at.format("%H%M%S").to_string(),
        format!("{:03}", at.timestamp_subsec_millis()),
    )
}
