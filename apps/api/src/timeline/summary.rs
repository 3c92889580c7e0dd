use std::collections::HashSet;

use crate::timeline::aggregator::aggregate_with;
use crate::timeline::models::{
    CentroidWeighting, Interval, RawObservation, Timeline, TimelineSummary,
};

/// Derives global statistics for an aggregated timeline.
///
/// `intervals` must be sorted ascending, as returned by the aggregator.
/// `raw` is needed for the unique-user total: a user present in many
/// buckets counts once here, while the per-interval counts each see them.
///
/// Peak ties resolve to the earliest interval. Empty input produces a
/// zeroed summary with no peak and no range.
pub fn summarize(intervals: &[Interval], raw: &[RawObservation]) -> TimelineSummary {
    let total_unique_users = raw
        .iter()
        .filter(|o| o.is_valid())
        .map(|o| o.user_id.as_str())
        .collect::<HashSet<_>>()
        .len();

    let mut peak: Option<&Interval> = None;
    for interval in intervals {
        // Strict comparison keeps the earliest of equal maxima.
        if peak.map_or(true, |p| interval.user_count > p.user_count) {
            peak = Some(interval);
        }
    }

    TimelineSummary {
        total_unique_users,
        total_intervals: intervals.len(),
        peak_user_count: peak.map_or(0, |p| p.user_count),
        peak_bucket_timestamp: peak.map(|p| p.bucket_timestamp.clone()),
        observed_range_start: intervals.first().map(|i| i.bucket_timestamp.clone()),
        observed_range_end: intervals.last().map(|i| i.bucket_timestamp.clone()),
    }
}

/// Runs the aggregator and summarizer over one snapshot of observations.
pub fn build_timeline(observations: &[RawObservation], weighting: CentroidWeighting) -> Timeline {
    let intervals = aggregate_with(observations, weighting);
    let summary = summarize(&intervals, observations);
    Timeline { intervals, summary }
}
