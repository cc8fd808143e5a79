//! Value normalization
//!
//! Turns platform encodings into canonical samples. Every rule here is
//! lenient: a malformed field falls back to a fixed value instead of failing,
//! so a single bad sample never aborts a sync.

use chrono::{DateTime, NaiveDate, Utc};
use devmon_core::{
    DataPointSpec, ValueKind,
    telemetry::{NormalizedSample, RawSample, TelemetryValue},
};

/// Timestamp given to samples whose time cannot be decoded: the zero
/// instant, 0001-01-01T00:00:00Z
pub fn fallback_timestamp() -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(1, 1, 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Length of a digit string holding epoch milliseconds
const MILLIS_DIGITS: usize = 13;

/// Normalize one raw sample for `spec`
pub fn normalize(raw: &RawSample, spec: &DataPointSpec) -> NormalizedSample {
    NormalizedSample {
        timestamp: normalize_time(&raw.time),
        value: normalize_value(&raw.value, spec.value_kind),
    }
}

/// Decode a platform timestamp.
///
/// Numbers are epoch milliseconds. Integer strings are epoch milliseconds
/// when exactly 13 characters long and epoch seconds otherwise. Anything
/// else, or an out-of-range instant, yields [`fallback_timestamp`].
pub fn normalize_time(raw: &TelemetryValue) -> DateTime<Utc> {
    let decoded = match raw {
        TelemetryValue::Number(millis) => DateTime::from_timestamp_millis(*millis as i64),
        TelemetryValue::Text(text) => match text.parse::<i64>() {
            Ok(n) if text.len() == MILLIS_DIGITS => DateTime::from_timestamp_millis(n),
            Ok(n) => DateTime::from_timestamp(n, 0),
            Err(_) => None,
        },
        TelemetryValue::Boolean(_) | TelemetryValue::Opaque(_) => None,
    };

    decoded.unwrap_or_else(fallback_timestamp)
}

/// Type a platform value according to the point's kind
pub fn normalize_value(raw: &TelemetryValue, kind: ValueKind) -> TelemetryValue {
    match (kind, raw) {
        (ValueKind::Number, TelemetryValue::Text(text)) => {
            let number = text.parse::<f64>().ok().filter(|n| n.is_finite());
            TelemetryValue::Number(number.unwrap_or(0.0))
        }
        // Array payloads stay opaque; booleans and already-numeric values
        // need no coercion.
        _ => raw.clone(),
    }
}
