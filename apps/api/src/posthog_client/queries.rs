use crate::timeline::adapter::ColumnLayout;
use crate::timeline::window::QueryWindow;

/// Connectivity probe used by diagnostics.
pub const PROBE_QUERY: &str = "SELECT 1";

pub struct MovementQuery<'a> {
    pub neighborhood: &'a str,
    pub window: &'a QueryWindow,
    pub bucket_minutes: u32,
    pub row_limit: u32,
    pub layout: ColumnLayout,
}

/// Builds the HogQL query returning one averaged position per user per
/// bucket, columns ordered per `layout`, followed by `event_count`.
///
/// Coordinate bounds are enforced here as well as in the aggregator.
pub fn movement_timeline_query(q: &MovementQuery<'_>) -> String {
    let (start, end) = q.window.upstream_bounds();
    let columns = match q.layout {
        ColumnLayout::TimeUserLatLng => "time_bucket, person_id, lat, lng",
        ColumnLayout::TimeLatLngUser => "time_bucket, lat, lng, person_id",
    };

    format!(
        r#"
        SELECT {columns}, event_count
        FROM (
          SELECT
            toStartOfInterval(timestamp, INTERVAL {bucket} MINUTE) AS time_bucket,
            person_id,
            avg(toFloat(properties.user_lat)) AS lat,
            avg(toFloat(properties.user_lng)) AS lng,
            count() AS event_count
          FROM events
          WHERE timestamp >= toDateTime('{start}')
            AND timestamp <= toDateTime('{end}')
            AND properties.neighborhood = '{neighborhood}'
            AND properties.user_lat IS NOT NULL
            AND properties.user_lng IS NOT NULL
          GROUP BY time_bucket, person_id
          HAVING lat IS NOT NULL
            AND lng IS NOT NULL
            AND lat >= -90 AND lat <= 90
            AND lng >= -180 AND lng <= 180
        )
        ORDER BY time_bucket, person_id
        LIMIT {limit}
        "#,
        bucket = q.bucket_minutes,
        neighborhood = escape_string_literal(q.neighborhood),
        limit = q.row_limit,
    )
}

/// Escapes a value for use inside a single-quoted HogQL string literal.
pub fn escape_string_literal(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('\'', "\\'")
}
