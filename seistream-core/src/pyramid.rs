//! Level-of-detail tile pyramid.
//!
//! Level 0 tiles are rendered from audio by the FFT pool; each parent is
//! built by averaging adjacent column pairs of its two children, cascading
//! until one tile covers the whole stream. Readiness events go out over a
//! channel in cascade order (base tiles as they arrive, parents strictly
//! after their children), which the renderer observes instead of being
//! called back directly.

use std::collections::HashSet;

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::debug;

use crate::tile::{SpectroTile, TileKey, TileRenderSpec, DEFAULT_BASE_TILE_SECS};
use crate::types::AudioStream;

pub struct TilePyramid {
    /// `levels[0]` is finest; the last level holds a single tile.
    levels: Vec<Vec<SpectroTile>>,
    base_tile_secs: f64,
    duration_secs: f64,
    sample_rate: u32,
    fft_size: usize,
    freq_bins: usize,
    ready_tx: Sender<TileKey>,
    ready_rx: Option<Receiver<TileKey>>,
    /// Base tiles currently scheduled on the pool (dedup guard).
    in_flight: HashSet<usize>,
}

impl TilePyramid {
    pub fn new(duration_secs: f64, sample_rate: u32, fft_size: usize) -> Self {
        Self::with_base_duration(duration_secs, sample_rate, fft_size, DEFAULT_BASE_TILE_SECS)
    }

    pub fn with_base_duration(
        duration_secs: f64,
        sample_rate: u32,
        fft_size: usize,
        base_tile_secs: f64,
    ) -> Self {
        let freq_bins = fft_size / 2 + 1;
        let base_count = (duration_secs / base_tile_secs).ceil().max(1.0) as usize;

        let mut levels = Vec::new();
        let mut count = base_count;
        let mut level = 0u8;
        loop {
            let tile_secs = base_tile_secs * (1u64 << level) as f64;
            let tiles = (0..count)
                .map(|i| {
                    let start = i as f64 * tile_secs;
                    let end = ((i + 1) as f64 * tile_secs).min(duration_secs);
                    SpectroTile::placeholder(level, i, start, end, freq_bins)
                })
                .collect();
            levels.push(tiles);
            if count == 1 {
                break;
            }
            count = count.div_ceil(2);
            level += 1;
        }

        let (ready_tx, ready_rx) = unbounded();
        Self {
            levels,
            base_tile_secs,
            duration_secs,
            sample_rate,
            fft_size,
            freq_bins,
            ready_tx,
            ready_rx: Some(ready_rx),
            in_flight: HashSet::new(),
        }
    }

    /// Receiver for tile readiness events. Taken once by the renderer.
    pub fn take_ready_events(&mut self) -> Option<Receiver<TileKey>> {
        self.ready_rx.take()
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn level_tiles(&self, level: u8) -> &[SpectroTile] {
        &self.levels[level as usize]
    }

    pub fn duration_secs(&self) -> f64 {
        self.duration_secs
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn freq_bins(&self) -> usize {
        self.freq_bins
    }

    /// Tile span in seconds at `level`.
    pub fn tile_duration_at(&self, level: u8) -> f64 {
        self.base_tile_secs * (1u64 << level) as f64
    }

    pub fn tile(&self, key: TileKey) -> Option<&SpectroTile> {
        self.levels
            .get(key.level as usize)?
            .get(key.index)
    }

    pub fn ready_base_count(&self) -> usize {
        self.levels[0].iter().filter(|t| t.ready).count()
    }

    /// Render specs for base tiles that can be computed from the currently
    /// available audio and are neither ready nor already scheduled. Marks
    /// them in flight; pass `stream_complete = true` once the assembler
    /// has published the final buffer so tail tiles render short.
    pub fn pending_base_specs(
        &mut self,
        audio: &AudioStream,
        stream_complete: bool,
    ) -> Vec<(usize, TileRenderSpec)> {
        let available = audio.len();
        let rate = self.sample_rate;
        let fft = self.fft_size;
        let mut specs = Vec::new();

        for tile in &self.levels[0] {
            if tile.ready || self.in_flight.contains(&tile.index) {
                continue;
            }
            // Before completion, only render tiles whose full span (plus
            // the trailing half-window) is present, so columns never need
            // recomputing later.
            let end_sample = (tile.end_sec * rate as f64).round() as usize + fft / 2;
            if !stream_complete && available < end_sample {
                continue;
            }
            if let Some(spec) =
                TileRenderSpec::for_base_tile(tile.start_sec, tile.end_sec, rate, fft, available)
            {
                specs.push((tile.index, spec));
            }
        }
        for (index, _) in &specs {
            self.in_flight.insert(*index);
        }
        specs
    }

    /// Install a rendered base tile and cascade upward.
    pub fn ingest_base(&mut self, index: usize, spec: TileRenderSpec, columns: Vec<Vec<u8>>) {
        self.in_flight.remove(&index);
        if columns.is_empty() {
            return;
        }
        let freq_bins = self.freq_bins;
        let rate = self.sample_rate;
        {
            let tile = &mut self.levels[0][index];
            tile.cols = columns.len();
            tile.actual_first_col_sec = spec.actual_first_col_sec(rate);
            tile.actual_last_col_sec =
                TileRenderSpec {
                    col_count: columns.len(),
                    ..spec
                }
                .actual_last_col_sec(rate);
            let mut flat = Vec::with_capacity(columns.len() * freq_bins);
            for col in &columns {
                debug_assert_eq!(col.len(), freq_bins);
                flat.extend_from_slice(col);
            }
            tile.magnitudes = Some(flat);
            tile.ready = true;
        }
        let _ = self.ready_tx.send(TileKey::new(0, index));
        debug!("base tile {index} ready ({} cols)", self.levels[0][index].cols);
        self.cascade_from(TileKey::new(0, index));
    }

    /// Drop a base tile back to pending so it can be re-rendered (after
    /// its texture was evicted while the CPU copy was trimmed).
    pub fn invalidate_base(&mut self, index: usize) {
        if let Some(tile) = self.levels[0].get_mut(index) {
            tile.ready = false;
            tile.magnitudes = None;
            tile.cols = 0;
        }
        self.in_flight.remove(&index);
    }

    /// Build ancestors of `key` as their children become ready.
    fn cascade_from(&mut self, key: TileKey) {
        let mut child = key;
        while (child.level as usize) + 1 < self.levels.len() {
            let parent = child.parent();
            if !self.parent_buildable(parent) {
                break;
            }
            self.build_parent(parent);
            let _ = self.ready_tx.send(parent);
            child = parent;
        }
    }

    /// A parent is buildable iff both children are ready, or its only
    /// child is (odd tail), and it has not been built already.
    fn parent_buildable(&self, parent: TileKey) -> bool {
        if self.tile(parent).map(|t| t.ready).unwrap_or(true) {
            return false;
        }
        let level = (parent.level - 1) as usize;
        let a = self.levels[level].get(parent.index * 2);
        let b = self.levels[level].get(parent.index * 2 + 1);
        match (a, b) {
            (Some(a), Some(b)) => a.ready && b.ready && a.magnitudes.is_some() && b.magnitudes.is_some(),
            (Some(a), None) => a.ready && a.magnitudes.is_some(),
            _ => false,
        }
    }

    fn build_parent(&mut self, parent: TileKey) {
        let child_level = (parent.level - 1) as usize;
        let freq_bins = self.freq_bins;

        let (cols, magnitudes, first_sec, last_sec) = {
            let a = &self.levels[child_level][parent.index * 2];
            let b = self.levels[child_level].get(parent.index * 2 + 1);

            let mut cols = 0usize;
            let mut flat = Vec::new();
            let mut first_sec = None;
            let mut last_sec = a.actual_last_col_sec;

            for child in std::iter::once(a).chain(b) {
                let pairs = child.cols / 2;
                let m = child
                    .magnitudes
                    .as_ref()
                    .expect("parent_buildable checked magnitudes");
                for c in 0..pairs {
                    for bin in 0..freq_bins {
                        let left = m[(2 * c) * freq_bins + bin] as u16;
                        let right = m[(2 * c + 1) * freq_bins + bin] as u16;
                        flat.push(((left + right + 1) / 2) as u8);
                    }
                }
                if pairs > 0 {
                    // A parent column is the average of two child frames;
                    // its center is the midpoint of their centers.
                    let center_first =
                        (child.col_center_sec(0) + child.col_center_sec(1.min(child.cols - 1))) / 2.0;
                    let center_last = (child.col_center_sec(2 * pairs - 2)
                        + child.col_center_sec(2 * pairs - 1))
                        / 2.0;
                    if first_sec.is_none() {
                        first_sec = Some(center_first);
                    }
                    last_sec = center_last;
                }
                cols += pairs;
            }
            (cols, flat, first_sec, last_sec)
        };

        if cols == 0 {
            return;
        }

        let tile = &mut self.levels[parent.level as usize][parent.index];
        tile.cols = cols;
        tile.magnitudes = Some(magnitudes);
        tile.actual_first_col_sec = first_sec.unwrap_or(tile.start_sec);
        tile.actual_last_col_sec = last_sec;
        tile.ready = true;
        debug!(
            "cascaded tile L{} #{} ready ({} cols)",
            parent.level, parent.index, cols,
        );
    }

    /// Drop CPU-side magnitudes for ready tiles far from the viewport
    /// whose pixels live in the texture cache (the GPU copy is then
    /// authoritative). `has_texture` is supplied by the cache.
    pub fn trim_far(
        &mut self,
        center_sec: f64,
        keep_radius_sec: f64,
        has_texture: impl Fn(TileKey) -> bool,
    ) -> usize {
        let mut trimmed = 0;
        for level in &mut self.levels {
            for tile in level.iter_mut() {
                if !tile.ready || tile.magnitudes.is_none() {
                    continue;
                }
                let center = (tile.start_sec + tile.end_sec) / 2.0;
                let far = (center - center_sec).abs() > keep_radius_sec + tile.duration_sec() / 2.0;
                if far && has_texture(tile.key()) {
                    tile.magnitudes = None;
                    trimmed += 1;
                }
            }
        }
        trimmed
    }
}
