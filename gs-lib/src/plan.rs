//! Fetch planning: the granularity grid walk.
//!
//! A plan covers the request window (rounded outward to 10-minute
//! boundaries) with an ordered, non-overlapping mix of 10-minute, 1-hour,
//! and 6-hour chunks. The first hour is always 10-minute chunks so audible
//! output starts at the finest resolution; after that the walk prefers the
//! coarsest granularity the grid permits.

use chrono::{DateTime, Duration, Timelike, Utc};
use log::warn;

use crate::error::PlanError;
use crate::manifest::Catalog;
use crate::types::{FetchPlan, Granularity, PlanSource, PlannedChunk};

/// Round down to the previous 10-minute boundary.
pub fn floor_to_10m(t: DateTime<Utc>) -> DateTime<Utc> {
    let over = (t.minute() % 10) as i64 * 60 + t.second() as i64;
    t - Duration::seconds(over) - Duration::nanoseconds(t.nanosecond() as i64)
}

/// Round up to the next 10-minute boundary (identity when already on one).
pub fn ceil_to_10m(t: DateTime<Utc>) -> DateTime<Utc> {
    let floored = floor_to_10m(t);
    if floored == t {
        t
    } else {
        floored + Duration::minutes(10)
    }
}

/// Build a fetch plan for `[start, end)` from the session catalog.
///
/// Missing 10-minute chunks (or whole missing days) become gap entries that
/// decode to silence; planning continues. An inverted or empty window is
/// fatal to the request.
pub fn plan_window(
    catalog: &Catalog,
    station: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<FetchPlan, PlanError> {
    if end <= start {
        return Err(PlanError::EmptyWindow { start, end });
    }

    let window_start = floor_to_10m(start);
    let window_end = ceil_to_10m(end);

    let sample_rate = window_sample_rate(catalog, station, window_start, window_end)
        .ok_or_else(|| PlanError::NoManifests {
            station: station.to_string(),
        })?;

    let mut entries: Vec<PlannedChunk> = Vec::new();
    let mut current = window_start;
    let mut has_used_1h = false;

    while current < window_end {
        let minutes_elapsed = (current - window_start).num_minutes();
        let minutes_remaining = (window_end - current).num_minutes();
        let minute_of_day = current.minute() + current.hour() * 60;

        let granularity = if minutes_elapsed < 60 {
            Granularity::TenMin
        } else if has_used_1h
            && minute_of_day % 360 == 0
            && minutes_remaining >= 360
            && lookup(catalog, station, current, Granularity::SixHour)
        {
            Granularity::SixHour
        } else if minute_of_day % 60 == 0
            && minutes_remaining >= 60
            && lookup(catalog, station, current, Granularity::OneHour)
        {
            has_used_1h = true;
            Granularity::OneHour
        } else {
            Granularity::TenMin
        };

        let span = Duration::minutes(granularity.minutes() as i64);
        let source = match catalog
            .find_chunk(station, current.date_naive(), granularity, current.time())
        {
            Some(chunk) => PlanSource::Stored(chunk.clone()),
            None => {
                warn!(
                    "no {} chunk for {station} at {current}; planning silence",
                    granularity.label(),
                );
                PlanSource::Gap
            }
        };
        let samples = match &source {
            PlanSource::Stored(c) => c.samples,
            PlanSource::Gap => granularity.seconds() * sample_rate as u64,
        };

        entries.push(PlannedChunk {
            index: entries.len(),
            granularity,
            start: current,
            end: current + span,
            samples,
            source,
        });
        current += span;
    }

    if entries.is_empty() {
        return Err(PlanError::EmptyWindow { start, end });
    }

    let (normalization_min, normalization_max) = normalization_range(&entries);

    Ok(FetchPlan {
        station: station.to_string(),
        window_start,
        window_end,
        sample_rate,
        entries,
        normalization_min,
        normalization_max,
    })
}

/// True when a stored chunk of `granularity` starts at `at`.
fn lookup(catalog: &Catalog, station: &str, at: DateTime<Utc>, granularity: Granularity) -> bool {
    catalog
        .find_chunk(station, at.date_naive(), granularity, at.time())
        .is_some()
}

/// Sample rate for the window: taken from the first day that has a
/// manifest. A mid-window rate change is logged and the first rate wins.
fn window_sample_rate(
    catalog: &Catalog,
    station: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Option<u32> {
    let mut rate = None;
    let mut day = start.date_naive();
    let last = end.date_naive();
    while day <= last {
        if let Some(r) = catalog.sample_rate(station, day) {
            match rate {
                None => rate = Some(r),
                Some(first) if first != r => {
                    warn!("sample rate changes mid-window ({first} -> {r}) on {day}; using {first}");
                }
                _ => {}
            }
        }
        day = day.succ_opt()?;
    }
    rate
}

/// Min/max over the stored chunks of the plan, the data that will actually
/// be played. The day-wide range would saturate.
fn normalization_range(entries: &[PlannedChunk]) -> (i32, i32) {
    let mut range: Option<(i32, i32)> = None;
    for entry in entries {
        if let PlanSource::Stored(c) = &entry.source {
            range = Some(match range {
                None => (c.min, c.max),
                Some((lo, hi)) => (lo.min(c.min), hi.max(c.max)),
            });
        }
    }
    // All gaps: decoder emits zeros regardless of the range.
    range.unwrap_or((0, 0))
}
