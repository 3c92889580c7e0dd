//! Groups raw observations into ordered, fixed-width intervals.

use std::collections::{BTreeMap, HashSet};

use tracing::debug;

use crate::timeline::models::{CentroidWeighting, Interval, Position, RawObservation};

/// Aggregates with the default per-row centroid weighting.
#[allow(dead_code)]
pub fn aggregate(observations: &[RawObservation]) -> Vec<Interval> {
    aggregate_with(observations, CentroidWeighting::default())
}

/// Groups observations by `bucket_timestamp` and returns one interval per
/// bucket, ascending by timestamp.
///
/// Invalid rows (see [`RawObservation::is_valid`]) are dropped before
/// grouping, so they never create a bucket or count as a user. Within a
/// bucket, positions keep input order.
pub fn aggregate_with(
    observations: &[RawObservation],
    weighting: CentroidWeighting,
) -> Vec<Interval> {
    let mut buckets: BTreeMap<&str, Vec<&RawObservation>> = BTreeMap::new();
    let mut dropped = 0usize;

    for obs in observations {
        if !obs.is_valid() {
            dropped += 1;
            continue;
        }
        buckets.entry(obs.bucket_timestamp.as_str()).or_default().push(obs);
    }

    if dropped > 0 {
        debug!("Dropped {dropped} invalid observations before aggregation");
    }

    buckets
        .into_iter()
        .map(|(bucket, rows)| build_interval(bucket, &rows, weighting))
        .collect()
}

fn build_interval(bucket: &str, rows: &[&RawObservation], weighting: CentroidWeighting) -> Interval {
    let positions: Vec<Position> = rows.iter().map(|r| r.position()).collect();
    let user_count = rows
        .iter()
        .map(|r| r.user_id.as_str())
        .collect::<HashSet<_>>()
        .len();

    let centroid = match weighting {
        CentroidWeighting::PerRow => mean_position(positions.iter().copied()),
        CentroidWeighting::PerUser => per_user_centroid(rows),
    };

    Interval {
        bucket_timestamp: bucket.to_string(),
        positions,
        user_count,
        centroid,
    }
}

/// Averages each user's rows, then averages the per-user means.
fn per_user_centroid(rows: &[&RawObservation]) -> Position {
    let mut per_user: BTreeMap<&str, Vec<Position>> = BTreeMap::new();
    for row in rows {
        per_user.entry(row.user_id.as_str()).or_default().push(row.position());
    }
    mean_position(
        per_user
            .into_values()
            .map(|positions| mean_position(positions.into_iter())),
    )
}

/// Arithmetic mean of latitude and longitude, independently.
/// Callers guarantee a non-empty iterator.
fn mean_position(positions: impl Iterator<Item = Position>) -> Position {
    let (lat_sum, lng_sum, n) = positions.fold((0.0, 0.0, 0usize), |(lat, lng, n), p| {
        (lat + p.latitude, lng + p.longitude, n + 1)
    });
    let n = n.max(1) as f64;
    Position {
        latitude: lat_sum / n,
        longitude: lng_sum / n,
    }
}
