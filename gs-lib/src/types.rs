use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Chunk aggregation granularities published by the collector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Granularity {
    /// 10-minute chunks, the finest; used for the first hour of any request.
    TenMin,
    /// 1-hour chunks.
    OneHour,
    /// 6-hour chunks, the coarsest; aligned to 00/06/12/18 UTC.
    SixHour,
}

impl Granularity {
    pub const ALL: &'static [Granularity] =
        &[Granularity::TenMin, Granularity::OneHour, Granularity::SixHour];

    /// Span of one chunk in minutes.
    pub fn minutes(self) -> u32 {
        match self {
            Granularity::TenMin => 10,
            Granularity::OneHour => 60,
            Granularity::SixHour => 360,
        }
    }

    pub fn seconds(self) -> u64 {
        self.minutes() as u64 * 60
    }

    /// Label used in manifests and storage keys ("10m", "1h", "6h").
    pub fn label(self) -> &'static str {
        match self {
            Granularity::TenMin => "10m",
            Granularity::OneHour => "1h",
            Granularity::SixHour => "6h",
        }
    }

    pub fn from_label(s: &str) -> Option<Granularity> {
        match s {
            "10m" => Some(Granularity::TenMin),
            "1h" => Some(Granularity::OneHour),
            "6h" => Some(Granularity::SixHour),
            _ => None,
        }
    }
}

/// One pre-aggregated interval of raw samples, addressable in the store.
/// Immutable once published; the client only reads.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkMeta {
    pub granularity: Granularity,
    /// Day this chunk is listed under (its starting day).
    pub date: NaiveDate,
    /// UTC time of day the chunk starts at, aligned to the granularity.
    pub start: NaiveTime,
    /// UTC time of day the chunk ends at. `end < start` means the chunk
    /// crosses midnight and ends on the following day.
    pub end: NaiveTime,
    /// Number of raw samples in the chunk.
    pub samples: u64,
    /// Minimum raw sample value over the chunk.
    pub min: i32,
    /// Maximum raw sample value over the chunk.
    pub max: i32,
}

impl ChunkMeta {
    /// Absolute UTC start instant.
    pub fn start_at(&self) -> DateTime<Utc> {
        self.date.and_time(self.start).and_utc()
    }

    /// Absolute UTC end instant, accounting for midnight wrap.
    pub fn end_at(&self) -> DateTime<Utc> {
        let date = if self.end <= self.start {
            self.date.succ_opt().unwrap_or(self.date)
        } else {
            self.date
        };
        date.and_time(self.end).and_utc()
    }

    /// Whether this chunk wraps past midnight into the next day.
    pub fn crosses_midnight(&self) -> bool {
        self.end <= self.start
    }
}

/// Per-day index of available chunks for one station.
#[derive(Clone, Debug)]
pub struct DayManifest {
    pub station: String,
    pub date: NaiveDate,
    /// Raw sample rate in Hz; fixed per day and station.
    pub sample_rate: u32,
    pub ten_min: Vec<ChunkMeta>,
    pub one_hour: Vec<ChunkMeta>,
    pub six_hour: Vec<ChunkMeta>,
}

impl DayManifest {
    pub fn chunks(&self, granularity: Granularity) -> &[ChunkMeta] {
        match granularity {
            Granularity::TenMin => &self.ten_min,
            Granularity::OneHour => &self.one_hour,
            Granularity::SixHour => &self.six_hour,
        }
    }

    /// Find the chunk of `granularity` starting exactly at `start_time`.
    pub fn find_chunk(&self, granularity: Granularity, start_time: NaiveTime) -> Option<&ChunkMeta> {
        self.chunks(granularity).iter().find(|c| c.start == start_time)
    }
}

/// Where a planned interval's samples come from.
#[derive(Clone, Debug)]
pub enum PlanSource {
    /// A chunk present in the manifest, fetchable from the store.
    Stored(ChunkMeta),
    /// No chunk exists for the interval; it decodes to silence.
    Gap,
}

impl PlanSource {
    pub fn is_gap(&self) -> bool {
        matches!(self, PlanSource::Gap)
    }

    pub fn chunk(&self) -> Option<&ChunkMeta> {
        match self {
            PlanSource::Stored(c) => Some(c),
            PlanSource::Gap => None,
        }
    }
}

/// One interval of a fetch plan.
#[derive(Clone, Debug)]
pub struct PlannedChunk {
    /// Position in the plan; decoded segments are emitted in this order.
    pub index: usize,
    pub granularity: Granularity,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Expected sample count (manifest value for stored chunks, nominal
    /// span × sample rate for gaps).
    pub samples: u64,
    pub source: PlanSource,
}

impl PlannedChunk {
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

/// Ordered, non-overlapping chunk list covering a request window, with the
/// normalization range taken over the chunks that will actually be fetched.
#[derive(Clone, Debug)]
pub struct FetchPlan {
    pub station: String,
    /// Request window rounded outward to 10-minute boundaries.
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub sample_rate: u32,
    pub entries: Vec<PlannedChunk>,
    /// Min over the stored chunks in the plan (not the whole day).
    pub normalization_min: i32,
    /// Max over the stored chunks in the plan.
    pub normalization_max: i32,
}

impl FetchPlan {
    /// Total expected raw sample count across all entries, gaps included.
    pub fn total_samples(&self) -> u64 {
        self.entries.iter().map(|e| e.samples).sum()
    }

    /// Number of entries that require a store fetch.
    pub fn stored_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.source.is_gap()).count()
    }
}

/// A subset of a plan fetched in parallel as one scheduling unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Batch {
    pub granularity: Granularity,
    /// Plan entry indices fetched concurrently in this batch.
    pub entries: Vec<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn granularity_labels_round_trip() {
        for &g in Granularity::ALL {
            assert_eq!(Granularity::from_label(g.label()), Some(g));
        }
        assert_eq!(Granularity::from_label("2h"), None);
    }

    #[test]
    fn midnight_wrap_end_instant() {
        let chunk = ChunkMeta {
            granularity: Granularity::SixHour,
            date: NaiveDate::from_ymd_opt(2025, 11, 6).unwrap(),
            start: t(18, 0),
            end: t(0, 0),
            samples: 2_160_000,
            min: -12,
            max: 31,
        };
        assert!(chunk.crosses_midnight());
        assert_eq!(
            chunk.end_at(),
            NaiveDate::from_ymd_opt(2025, 11, 7)
                .unwrap()
                .and_time(t(0, 0))
                .and_utc()
        );
        assert_eq!(chunk.end_at() - chunk.start_at(), Duration::hours(6));
    }
}
