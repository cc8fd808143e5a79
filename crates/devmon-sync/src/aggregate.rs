//! Per-point statistics

use devmon_core::telemetry::{PointResult, PointSummary, SyncResult};
use std::collections::BTreeMap;

/// Count/min/max/avg over the numeric samples of one point.
///
/// Non-numeric values (booleans, opaque payloads, text) are skipped. A point
/// without numeric samples gets an all-zero summary. The summary is labelled
/// with the point's display name; callers key it by the point name.
pub fn summarize(result: &PointResult) -> PointSummary {
    let mut count = 0u64;
    let mut sum = 0.0;
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;

    for value in result.samples.iter().filter_map(|s| s.value.as_number()) {
        count += 1;
        sum += value;
        min = min.min(value);
        max = max.max(value);
    }

    if count == 0 {
        return PointSummary::empty(result.display_name(), result.unit());
    }

    PointSummary {
        point_name: result.display_name().to_string(),
        unit: result.unit().to_string(),
        count,
        min_value: min,
        max_value: max,
        avg_value: sum / count as f64,
    }
}

/// Summaries for every point of a sync, keyed like the sync result
pub fn summarize_all(results: &SyncResult) -> BTreeMap<String, PointSummary> {
    results
        .iter()
        .map(|(name, result)| (name.clone(), summarize(result)))
        .collect()
}
