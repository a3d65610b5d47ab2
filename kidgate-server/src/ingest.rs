//! Usage-sync validation pipeline.
//!
//! A device posts a batch of `{app_name, start_time, end_time}` intervals.
//! Each entry is validated independently and either accepted or skipped with
//! a recorded reason; one bad entry never aborts the batch. Persistence is
//! the storage layer's job, so everything here is pure and unit-testable.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;

/// Ingestion bounds, passed in from [`crate::server::AppConfig`] rather than
/// read from ambient state.
#[derive(Debug, Clone)]
pub struct SyncLimits {
    /// Entries longer than this are rejected as implausible (default 24h).
    pub max_entry_duration_secs: i64,
    /// Cap on error messages echoed back in a sync response.
    pub max_reported_errors: usize,
}

/// One raw element of `usage_data`, deserialized leniently so that missing
/// fields surface as per-entry validation errors instead of a 400.
#[derive(Debug, Deserialize)]
pub struct RawEntry {
    #[serde(default)]
    pub app_name: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
}

/// An entry that passed validation. Timestamps are normalized to naive UTC,
/// matching what the storage layer persists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedEntry {
    pub app_name: String,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub duration_secs: i32,
}

#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub total: usize,
    pub accepted: Vec<AcceptedEntry>,
    pub errors: Vec<String>,
}

impl BatchOutcome {
    pub fn skipped(&self) -> usize {
        self.total - self.accepted.len()
    }
}

/// Validate a whole batch in input order. Invariant: every entry lands in
/// either `accepted` or `errors`, so `accepted.len() + errors.len() == total`.
pub fn validate_batch(raw: &[serde_json::Value], limits: &SyncLimits) -> BatchOutcome {
    let mut out = BatchOutcome {
        total: raw.len(),
        ..Default::default()
    };
    for (i, value) in raw.iter().enumerate() {
        match validate_entry(value, limits) {
            Ok(entry) => out.accepted.push(entry),
            Err(reason) => {
                tracing::warn!(entry = i, %reason, "sync: skipping entry");
                out.errors.push(format!("entry {i}: {reason}"));
            }
        }
    }
    out
}

fn validate_entry(value: &serde_json::Value, limits: &SyncLimits) -> Result<AcceptedEntry, String> {
    let entry: RawEntry =
        serde_json::from_value(value.clone()).map_err(|_| "not a usage object".to_string())?;

    let app_name = match entry.app_name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => return Err("missing app_name".into()),
    };

    let (Some(start_raw), Some(end_raw)) = (entry.start_time.as_deref(), entry.end_time.as_deref())
    else {
        return Err("missing start_time or end_time".into());
    };

    let (Ok(start), Ok(end)) = (parse_timestamp(start_raw), parse_timestamp(end_raw)) else {
        return Err("invalid timestamp format".into());
    };

    if end <= start {
        return Err("end_time must be after start_time".into());
    }

    let millis = end.signed_duration_since(start).num_milliseconds();
    if millis <= 0 {
        // Unreachable after the ordering check above.
        return Err(format!("invalid duration ({}s)", millis / 1000));
    }
    if millis > limits.max_entry_duration_secs * 1000 {
        return Err(format!("duration too long ({}s)", millis / 1000));
    }

    // Round to whole seconds; sub-second intervals floor at 1s.
    let duration_secs = ((millis as f64 / 1000.0).round() as i64).max(1);

    Ok(AcceptedEntry {
        app_name,
        start_time: start.naive_utc(),
        end_time: end.naive_utc(),
        duration_secs: duration_secs as i32,
    })
}

/// Parse an RFC 3339 timestamp. A trailing literal `Z` is rewritten to
/// `+00:00` first, the UTC shorthand older device builds send.
fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    let raw = raw.trim();
    let normalized = match raw.strip_suffix('Z') {
        Some(stripped) => format!("{stripped}+00:00"),
        None => raw.to_string(),
    };
    DateTime::parse_from_rfc3339(&normalized).map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn limits() -> SyncLimits {
        SyncLimits {
            max_entry_duration_secs: 86400,
            max_reported_errors: 10,
        }
    }

    fn entry(app: &str, start: &str, end: &str) -> serde_json::Value {
        json!({"app_name": app, "start_time": start, "end_time": end})
    }

    #[test]
    fn accepts_a_five_minute_interval() {
        let batch = [entry(
            "chrome",
            "2025-05-31T10:00:00Z",
            "2025-05-31T10:05:00Z",
        )];
        let out = validate_batch(&batch, &limits());
        assert_eq!(out.total, 1);
        assert_eq!(out.skipped(), 0);
        assert!(out.errors.is_empty());
        let accepted = &out.accepted[0];
        assert_eq!(accepted.app_name, "chrome");
        assert_eq!(accepted.duration_secs, 300);
    }

    #[test]
    fn z_suffix_and_explicit_offset_agree() {
        let batch = [
            entry("a", "2025-05-31T10:00:00Z", "2025-05-31T10:01:00Z"),
            entry("b", "2025-05-31T12:00:00+02:00", "2025-05-31T12:01:00+02:00"),
        ];
        let out = validate_batch(&batch, &limits());
        assert_eq!(out.accepted.len(), 2);
        // +02:00 normalizes to the same UTC instant as the Z entry.
        assert_eq!(out.accepted[0].start_time, out.accepted[1].start_time);
    }

    #[test]
    fn missing_app_name_is_skipped() {
        let batch = [
            json!({"start_time": "2025-05-31T10:00:00Z", "end_time": "2025-05-31T10:05:00Z"}),
            json!({"app_name": "  ", "start_time": "2025-05-31T10:00:00Z", "end_time": "2025-05-31T10:05:00Z"}),
        ];
        let out = validate_batch(&batch, &limits());
        assert!(out.accepted.is_empty());
        assert_eq!(out.errors[0], "entry 0: missing app_name");
        assert_eq!(out.errors[1], "entry 1: missing app_name");
    }

    #[test]
    fn missing_timestamps_are_skipped() {
        let batch = [json!({"app_name": "chrome", "start_time": "2025-05-31T10:00:00Z"})];
        let out = validate_batch(&batch, &limits());
        assert_eq!(out.errors, ["entry 0: missing start_time or end_time"]);
    }

    #[test]
    fn unparseable_timestamp_is_skipped() {
        let batch = [entry("chrome", "yesterday", "2025-05-31T10:05:00Z")];
        let out = validate_batch(&batch, &limits());
        assert_eq!(out.errors, ["entry 0: invalid timestamp format"]);
    }

    #[test]
    fn end_before_start_is_skipped() {
        let batch = [entry(
            "chrome",
            "2025-05-31T10:05:00Z",
            "2025-05-31T10:00:00Z",
        )];
        let out = validate_batch(&batch, &limits());
        assert_eq!(out.skipped(), 1);
        assert_eq!(out.errors, ["entry 0: end_time must be after start_time"]);
    }

    #[test]
    fn equal_timestamps_are_skipped() {
        let batch = [entry(
            "chrome",
            "2025-05-31T10:00:00Z",
            "2025-05-31T10:00:00Z",
        )];
        let out = validate_batch(&batch, &limits());
        assert_eq!(out.errors, ["entry 0: end_time must be after start_time"]);
    }

    #[test]
    fn over_24h_is_rejected() {
        let batch = [entry(
            "chrome",
            "2025-05-30T10:00:00Z",
            "2025-05-31T10:00:01Z",
        )];
        let out = validate_batch(&batch, &limits());
        assert_eq!(out.errors, ["entry 0: duration too long (86401s)"]);
    }

    #[test]
    fn exactly_24h_is_accepted() {
        let batch = [entry(
            "chrome",
            "2025-05-30T10:00:00Z",
            "2025-05-31T10:00:00Z",
        )];
        let out = validate_batch(&batch, &limits());
        assert_eq!(out.accepted[0].duration_secs, 86400);
    }

    #[test]
    fn subsecond_interval_floors_to_one_second() {
        let batch = [entry(
            "chrome",
            "2025-05-31T10:00:00.000Z",
            "2025-05-31T10:00:00.400Z",
        )];
        let out = validate_batch(&batch, &limits());
        assert_eq!(out.accepted[0].duration_secs, 1);
    }

    #[test]
    fn non_object_entry_is_skipped_not_fatal() {
        let batch = [
            json!("bogus"),
            entry("chrome", "2025-05-31T10:00:00Z", "2025-05-31T10:05:00Z"),
        ];
        let out = validate_batch(&batch, &limits());
        assert_eq!(out.accepted.len(), 1);
        assert_eq!(out.errors, ["entry 0: not a usage object"]);
    }

    #[test]
    fn counts_always_reconcile() {
        let batch = [
            entry("a", "2025-05-31T10:00:00Z", "2025-05-31T10:05:00Z"),
            entry("b", "bad", "worse"),
            json!({}),
        ];
        let out = validate_batch(&batch, &limits());
        assert_eq!(out.accepted.len() + out.errors.len(), out.total);
        assert_eq!(out.skipped(), 2);
    }
}
