//! Day-manifest parsing and the session chunk catalog.
//!
//! Manifests arrive as JSON from the store gateway. Parsing is strict about
//! the documented shape (date, sample_rate, per-granularity chunk arrays)
//! and tolerant about extra fields. Chunks inside one granularity must be
//! sorted, aligned, and non-overlapping; absent chunks are allowed; the
//! planner turns those intervals into silence.

use std::collections::HashMap;

use chrono::{NaiveDate, NaiveTime};
use serde::Deserialize;

use crate::error::StoreError;
use crate::types::{ChunkMeta, DayManifest, Granularity};

#[derive(Deserialize)]
struct ManifestJson {
    date: String,
    sample_rate: u32,
    chunks: ChunksJson,
}

#[derive(Deserialize, Default)]
struct ChunksJson {
    #[serde(rename = "10m", default)]
    ten_min: Vec<ChunkJson>,
    #[serde(rename = "1h", default)]
    one_hour: Vec<ChunkJson>,
    #[serde(rename = "6h", default)]
    six_hour: Vec<ChunkJson>,
}

#[derive(Deserialize)]
struct ChunkJson {
    start: String,
    end: String,
    samples: u64,
    min: i32,
    max: i32,
}

/// Parse and validate a day manifest from raw JSON bytes.
pub fn parse_manifest(station: &str, bytes: &[u8]) -> Result<DayManifest, StoreError> {
    let raw: ManifestJson = serde_json::from_slice(bytes)
        .map_err(|e| StoreError::ManifestMalformed(format!("invalid JSON: {e}")))?;

    let date = NaiveDate::parse_from_str(&raw.date, "%Y-%m-%d")
        .map_err(|e| StoreError::ManifestMalformed(format!("bad date {:?}: {e}", raw.date)))?;
    if raw.sample_rate == 0 {
        return Err(StoreError::ManifestMalformed("sample_rate is zero".into()));
    }

    let ten_min = parse_chunks(&raw.chunks.ten_min, Granularity::TenMin, date)?;
    let one_hour = parse_chunks(&raw.chunks.one_hour, Granularity::OneHour, date)?;
    let six_hour = parse_chunks(&raw.chunks.six_hour, Granularity::SixHour, date)?;

    Ok(DayManifest {
        station: station.to_string(),
        date,
        sample_rate: raw.sample_rate,
        ten_min,
        one_hour,
        six_hour,
    })
}

fn parse_chunks(
    raw: &[ChunkJson],
    granularity: Granularity,
    date: NaiveDate,
) -> Result<Vec<ChunkMeta>, StoreError> {
    let mut chunks = Vec::with_capacity(raw.len());
    for c in raw {
        let start = parse_time(&c.start)?;
        let end = parse_time(&c.end)?;
        let chunk = ChunkMeta {
            granularity,
            date,
            start,
            end,
            samples: c.samples,
            min: c.min,
            max: c.max,
        };
        validate_alignment(&chunk)?;
        chunks.push(chunk);
    }
    validate_ordering(&chunks, granularity)?;
    Ok(chunks)
}

fn parse_time(s: &str) -> Result<NaiveTime, StoreError> {
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .map_err(|e| StoreError::ManifestMalformed(format!("bad time {s:?}: {e}")))
}

/// A chunk's start must sit on its granularity grid.
fn validate_alignment(chunk: &ChunkMeta) -> Result<(), StoreError> {
    let minute_of_day =
        chunk.start.signed_duration_since(NaiveTime::MIN).num_minutes() as u32;
    if minute_of_day % chunk.granularity.minutes() != 0 {
        return Err(StoreError::ManifestMalformed(format!(
            "{} chunk start {} not aligned",
            chunk.granularity.label(),
            chunk.start,
        )));
    }
    Ok(())
}

/// Within a granularity, chunks must be sorted with no overlaps.
fn validate_ordering(chunks: &[ChunkMeta], granularity: Granularity) -> Result<(), StoreError> {
    for pair in chunks.windows(2) {
        if pair[1].start_at() < pair[0].end_at() {
            return Err(StoreError::ManifestMalformed(format!(
                "{} chunks overlap at {}",
                granularity.label(),
                pair[1].start,
            )));
        }
    }
    Ok(())
}

/// Session cache of day manifests, keyed by (station, date).
///
/// The catalog only reads: manifests are inserted after a fetch and looked
/// up by the planner for the remainder of the session.
#[derive(Default)]
pub struct Catalog {
    manifests: HashMap<(String, NaiveDate), DayManifest>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, manifest: DayManifest) {
        self.manifests
            .insert((manifest.station.clone(), manifest.date), manifest);
    }

    pub fn get(&self, station: &str, date: NaiveDate) -> Option<&DayManifest> {
        self.manifests.get(&(station.to_string(), date))
    }

    pub fn contains(&self, station: &str, date: NaiveDate) -> bool {
        self.manifests.contains_key(&(station.to_string(), date))
    }

    /// Find the chunk of `granularity` starting at `start_time` on `date`.
    pub fn find_chunk(
        &self,
        station: &str,
        date: NaiveDate,
        granularity: Granularity,
        start_time: NaiveTime,
    ) -> Option<&ChunkMeta> {
        self.get(station, date)?.find_chunk(granularity, start_time)
    }

    pub fn sample_rate(&self, station: &str, date: NaiveDate) -> Option<u32> {
        self.get(station, date).map(|m| m.sample_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"{
        "date": "2025-11-06",
        "sample_rate": 100,
        "chunks": {
            "10m": [
                {"start": "00:00:00", "end": "00:10:00", "samples": 60000, "min": -1000, "max": 3000},
                {"start": "00:10:00", "end": "00:20:00", "samples": 60000, "min": -800, "max": 2100}
            ],
            "1h": [
                {"start": "01:00:00", "end": "02:00:00", "samples": 360000, "min": -900, "max": 2500}
            ],
            "6h": [
                {"start": "18:00:00", "end": "00:00:00", "samples": 2160000, "min": -400, "max": 700}
            ]
        }
    }"#;

    #[test]
    fn parses_documented_shape() {
        let m = parse_manifest("ANMO", MANIFEST.as_bytes()).unwrap();
        assert_eq!(m.sample_rate, 100);
        assert_eq!(m.ten_min.len(), 2);
        assert_eq!(m.one_hour.len(), 1);
        assert_eq!(m.ten_min[0].min, -1000);
        assert_eq!(m.ten_min[1].samples, 60000);
        // 18:00 to 00:00 six-hour chunk wraps into the next day
        assert!(m.six_hour[0].crosses_midnight());
    }

    #[test]
    fn rejects_misaligned_chunk() {
        let bad = MANIFEST.replace("\"01:00:00\"", "\"01:05:00\"");
        let err = parse_manifest("ANMO", bad.as_bytes()).unwrap_err();
        assert!(matches!(err, StoreError::ManifestMalformed(_)));
    }

    #[test]
    fn rejects_overlapping_chunks() {
        let bad = MANIFEST.replace("\"00:10:00\", \"end\": \"00:20:00\"", "\"00:00:00\", \"end\": \"00:10:00\"");
        let err = parse_manifest("ANMO", bad.as_bytes()).unwrap_err();
        assert!(matches!(err, StoreError::ManifestMalformed(_)));
    }

    #[test]
    fn rejects_zero_sample_rate() {
        let bad = MANIFEST.replace("\"sample_rate\": 100", "\"sample_rate\": 0");
        assert!(parse_manifest("ANMO", bad.as_bytes()).is_err());
    }

    #[test]
    fn catalog_find_chunk() {
        let m = parse_manifest("ANMO", MANIFEST.as_bytes()).unwrap();
        let date = m.date;
        let mut catalog = Catalog::new();
        catalog.insert(m);

        let t = NaiveTime::from_hms_opt(0, 10, 0).unwrap();
        let found = catalog.find_chunk("ANMO", date, Granularity::TenMin, t);
        assert_eq!(found.unwrap().max, 2100);
        assert!(catalog
            .find_chunk("ANMO", date, Granularity::TenMin, NaiveTime::from_hms_opt(0, 30, 0).unwrap())
            .is_none());
    }
}
