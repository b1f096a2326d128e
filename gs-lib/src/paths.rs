//! Storage-key layout for the chunk store.
//!
//! Keys are flat strings interpreted by the gateway:
//!
//! ```text
//! {station}/{YYYY-MM-DD}/manifest.json
//! {station}/{YYYY-MM-DD}/{granularity}/{HH-MM-SS}.bin
//! ```
//!
//! A chunk belongs to its starting date, but some collectors file
//! midnight-crossing chunks under the day they end; `chunk_key_variants`
//! returns both spellings and the client tries them in order.

use chrono::NaiveDate;

use crate::types::{ChunkMeta, Granularity};

pub fn manifest_key(station: &str, date: NaiveDate) -> String {
    format!("{station}/{}/manifest.json", date.format("%Y-%m-%d"))
}

pub fn chunk_key(station: &str, date: NaiveDate, granularity: Granularity, chunk: &ChunkMeta) -> String {
    format!(
        "{station}/{}/{}/{}.bin",
        date.format("%Y-%m-%d"),
        granularity.label(),
        chunk.start.format("%H-%M-%S"),
    )
}

/// Candidate keys for a chunk, start-date spelling first.
pub fn chunk_key_variants(station: &str, chunk: &ChunkMeta) -> Vec<String> {
    let mut keys = vec![chunk_key(station, chunk.date, chunk.granularity, chunk)];
    if chunk.crosses_midnight() {
        if let Some(end_date) = chunk.date.succ_opt() {
            keys.push(chunk_key(station, end_date, chunk.granularity, chunk));
        }
    }
    keys
}

/// Sanitize a key for use as a relative filesystem path (disk cache).
pub fn key_to_rel_path(key: &str) -> String {
    key.chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '\\' | '|' | '?' | '*' => '_',
            c => c,
        })
        .collect()
}
