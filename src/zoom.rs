//! Zoom-transition compositor.
//!
//! During a zoom animation no FFT work runs on the display path: each
//! frame blits a slice of the *elastic cache* (a full-view composite kept
//! when the user zooms in) at the interpolated time range, geometrically
//! stretched. Meanwhile a background re-render of the target region runs
//! on the pool (target sub-range at full quality, flanking buffer zones
//! at 1/8 quality) and crossfades in between 50% and 90% animation
//! progress. The transition only reports complete when both the timeline
//! has ended and the re-render has finished or been cancelled.

use log::debug;
use seistream_core::{
    pool::FftBatch, Colormap, RasterSurface, TextureId, TilePyramid, Window, TILE_COLS,
};

use crate::buffers::PixelArena;
use crate::viewport::{draw_stretched, select_level, ContentGeometry, FrequencyScale};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ZoomDirection {
    In,
    Out,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimeRange {
    pub start: f64,
    pub end: f64,
}

impl TimeRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    pub fn lerp(a: TimeRange, b: TimeRange, t: f64) -> TimeRange {
        TimeRange {
            start: a.start + (b.start - a.start) * t,
            end: a.end + (b.end - a.end) * t,
        }
    }

    pub fn contains(&self, other: &TimeRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// Cubic ease-in-out.
pub fn ease_in_out(p: f64) -> f64 {
    let p = p.clamp(0.0, 1.0);
    if p < 0.5 {
        4.0 * p * p * p
    } else {
        1.0 - (-2.0 * p + 2.0).powi(3) / 2.0
    }
}

/// Crossfade window in animation progress.
const FADE_START: f64 = 0.5;
const FADE_END: f64 = 0.9;

/// Flank quality divisor: buffer zones use 8× coarser hop.
const FLANK_DIVISOR: usize = 8;

/// A spectrogram composite over a time range on a uniform column grid,
/// held on the CPU and lazily uploaded as one texture.
pub struct Composite {
    pub range: TimeRange,
    pub cols: usize,
    pub freq_bins: usize,
    /// Column-major quantized magnitudes, like a tile.
    magnitudes: Vec<u8>,
    texture: Option<TextureId>,
}

impl Composite {
    /// Resample the pyramid into a `width_cols`-wide composite over
    /// `range`. Missing or trimmed tiles contribute zero columns.
    pub fn from_pyramid(pyramid: &TilePyramid, range: TimeRange, width_cols: usize) -> Composite {
        let freq_bins = pyramid.freq_bins();
        let level = select_level(pyramid, range.duration(), width_cols);
        let mut magnitudes = vec![0u8; width_cols * freq_bins];

        for c in 0..width_cols {
            let t = range.start + (c as f64 + 0.5) / width_cols as f64 * range.duration();
            let Some(tile) = pyramid
                .level_tiles(level)
                .iter()
                .find(|tile| tile.start_sec <= t && t < tile.end_sec)
            else {
                continue;
            };
            if !tile.ready || tile.cols == 0 {
                continue;
            }
            let span = tile.actual_last_col_sec - tile.actual_first_col_sec;
            let col = if span > 0.0 && tile.cols > 1 {
                (((t - tile.actual_first_col_sec) / span) * (tile.cols - 1) as f64).round()
            } else {
                0.0
            };
            let col = (col.max(0.0) as usize).min(tile.cols - 1);
            for bin in 0..freq_bins {
                if let Some(v) = tile.magnitude(col, bin) {
                    magnitudes[c * freq_bins + bin] = v;
                }
            }
        }

        Composite {
            range,
            cols: width_cols,
            freq_bins,
            magnitudes,
            texture: None,
        }
    }

    /// Build from per-zone pool output, expanding coarse zones onto the
    /// target-quality column grid so the composite stays uniform.
    fn from_zones(plan: &ReRenderPlan, zones: Vec<Vec<Vec<u8>>>, freq_bins: usize) -> Composite {
        let mut magnitudes = Vec::new();
        let mut cols = 0usize;
        for (job, columns) in plan.jobs.iter().zip(&zones) {
            for col in columns {
                debug_assert_eq!(col.len(), freq_bins);
                for _ in 0..job.repeat {
                    magnitudes.extend_from_slice(col);
                    cols += 1;
                }
            }
        }
        Composite {
            range: plan.expanded,
            cols,
            freq_bins,
            magnitudes,
            texture: None,
        }
    }

    fn ensure_texture(
        &mut self,
        surface: &mut impl RasterSurface,
        arena: &mut PixelArena,
    ) -> Option<TextureId> {
        if let Some(id) = self.texture {
            return Some(id);
        }
        if self.cols == 0 {
            return None;
        }
        // Row-major flip, row 0 = highest frequency (same as tiles). The
        // flip buffer is scratch; it goes back to the arena after upload.
        let mut pixels = arena.acquire(self.cols, self.freq_bins);
        for col in 0..self.cols {
            for bin in 0..self.freq_bins {
                let row = self.freq_bins - 1 - bin;
                pixels[row * self.cols + col] = self.magnitudes[col * self.freq_bins + bin];
            }
        }
        let id = surface.upload_texture(self.cols, self.freq_bins, &pixels);
        arena.release(pixels, self.cols, self.freq_bins);
        self.texture = Some(id);
        Some(id)
    }

    fn release(&mut self, surface: &mut impl RasterSurface) {
        if let Some(id) = self.texture.take() {
            surface.drop_texture(id);
        }
    }

    /// Texel X for stream time `t` (uniform grid, unclamped; the surface
    /// clamps at the edge).
    fn col_at(&self, t: f64) -> f32 {
        let col_w = self.range.duration() / self.cols as f64;
        let first_center = self.range.start + col_w / 2.0;
        let span = (self.cols - 1) as f64 * col_w;
        if span <= 0.0 {
            return 0.5;
        }
        ((t - first_center) / span * (self.cols - 1) as f64 + 0.5) as f32
    }

    /// Draw the part of this composite overlapping `visible` into a
    /// `canvas_w`-pixel-wide viewport.
    fn draw(
        &mut self,
        surface: &mut impl RasterSurface,
        visible: TimeRange,
        canvas_w: f64,
        geom: &ContentGeometry,
        alpha: f32,
        arena: &mut PixelArena,
    ) {
        let t0 = self.range.start.max(visible.start);
        let t1 = self.range.end.min(visible.end);
        if t1 <= t0 || visible.duration() <= 0.0 {
            return;
        }
        let Some(texture) = self.ensure_texture(surface, arena) else {
            return;
        };
        let dst_x = (t0 - visible.start) / visible.duration() * canvas_w;
        let dst_w = (t1 - t0) / visible.duration() * canvas_w;
        let src_x = self.col_at(t0);
        let src_w = (self.col_at(t1) - src_x).max(0.0);
        draw_stretched(
            surface,
            texture,
            self.freq_bins,
            src_x,
            src_w,
            dst_x as f32,
            dst_w as f32,
            geom,
            alpha,
        );
    }
}

/// One quality zone of a background re-render.
#[derive(Clone, Copy, Debug)]
pub struct ReRenderJob {
    pub start_sample: usize,
    pub hop: usize,
    pub col_count: usize,
    /// How many composite columns each output column fills (1 for the
    /// target zone, [`FLANK_DIVISOR`] for the coarse flanks).
    pub repeat: usize,
}

/// Work order for a background re-render: target region at full quality,
/// flanks at 1/8. Tagged with a region id so superseded results are
/// discarded.
#[derive(Clone, Debug)]
pub struct ReRenderPlan {
    pub region_id: u64,
    pub target: TimeRange,
    pub expanded: TimeRange,
    pub jobs: Vec<ReRenderJob>,
    pub fft_size: usize,
}

impl ReRenderPlan {
    pub fn batches(&self, audio: &seistream_core::AudioStream, window: Window) -> Vec<FftBatch> {
        self.jobs
            .iter()
            .enumerate()
            .map(|(i, job)| FftBatch {
                id: i,
                audio: audio.samples.clone(),
                start_sample: job.start_sample,
                fft_size: self.fft_size,
                hop: job.hop,
                col_count: job.col_count,
                window,
            })
            .collect()
    }
}

enum ReRenderState {
    Idle,
    Pending(u64),
    Ready(u64, Composite),
}

struct Transition {
    direction: ZoomDirection,
    old_range: TimeRange,
    new_range: TimeRange,
    /// Raw animation progress in [0, 1].
    progress: f64,
    /// Snapshot of the outgoing view (drawn shrinking on zoom-out).
    snapshot: Option<Composite>,
}

pub struct ZoomCompositor {
    anim_secs: f64,
    transition: Option<Transition>,
    /// Full-view composite kept in memory when the user zooms in.
    elastic: Option<Composite>,
    rerender: ReRenderState,
    next_region_id: u64,
}

impl ZoomCompositor {
    pub fn new(anim_secs: f64) -> Self {
        Self {
            anim_secs: anim_secs.max(1e-3),
            transition: None,
            elastic: None,
            rerender: ReRenderState::Idle,
            next_region_id: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.transition.is_some()
    }

    pub fn direction(&self) -> Option<ZoomDirection> {
        self.transition.as_ref().map(|t| t.direction)
    }

    pub fn progress(&self) -> f64 {
        self.transition.as_ref().map(|t| t.progress).unwrap_or(1.0)
    }

    /// Start a zoom from the currently displayed range to `new_range`.
    ///
    /// Any in-flight re-render is superseded (its result will be
    /// discarded on arrival). Returns the work order for the background
    /// re-render of the target region.
    pub fn begin(
        &mut self,
        pyramid: &TilePyramid,
        new_range: TimeRange,
        sample_rate: u32,
        fft_size: usize,
    ) -> ReRenderPlan {
        // A zoom during a zoom starts from the displayed composition,
        // not from the stale old_range.
        let old_range = self
            .current_range()
            .unwrap_or_else(|| self.display_fallback(pyramid));
        let direction = if new_range.duration() < old_range.duration() {
            ZoomDirection::In
        } else {
            ZoomDirection::Out
        };

        let snapshot = match direction {
            ZoomDirection::In => {
                // Keep the wide view in memory: it is the stretch source
                // for this zoom and the flank filler for a later zoom out.
                self.elastic = Some(Composite::from_pyramid(pyramid, old_range, TILE_COLS));
                None
            }
            // The zoomed view shrinks toward the expanding viewport while
            // the elastic (kept from the zoom in) fills revealed flanks.
            ZoomDirection::Out => Some(Composite::from_pyramid(pyramid, old_range, TILE_COLS)),
        };
        self.transition = Some(Transition {
            direction,
            old_range,
            new_range,
            progress: 0.0,
            snapshot,
        });

        let plan = self.plan_rerender(new_range, pyramid.duration_secs(), sample_rate, fft_size);
        self.rerender = ReRenderState::Pending(plan.region_id);
        debug!(
            "zoom {:?} {old_range:?} -> {new_range:?} (region {})",
            direction, plan.region_id,
        );
        plan
    }

    fn display_fallback(&self, pyramid: &TilePyramid) -> TimeRange {
        TimeRange::new(0.0, pyramid.duration_secs())
    }

    /// Quality-zoned work order: flanks one target-duration each side
    /// (clamped to the stream), rendered at an 8× coarser hop.
    fn plan_rerender(
        &mut self,
        target: TimeRange,
        stream_secs: f64,
        sample_rate: u32,
        fft_size: usize,
    ) -> ReRenderPlan {
        self.next_region_id += 1;
        let rate = sample_rate as f64;
        let target_samples = ((target.duration() * rate) as usize).max(TILE_COLS);
        let hop_target = (target_samples / TILE_COLS).max(1);
        let hop_flank = hop_target * FLANK_DIVISOR;

        let left = TimeRange::new((target.start - target.duration()).max(0.0), target.start);
        let right = TimeRange::new(target.end, (target.end + target.duration()).min(stream_secs));

        let mut jobs = Vec::new();
        let mut push_zone = |zone: TimeRange, hop: usize, repeat: usize| {
            let samples = (zone.duration() * rate) as usize;
            let col_count = samples / hop;
            if col_count > 0 {
                jobs.push(ReRenderJob {
                    start_sample: (zone.start * rate) as usize,
                    hop,
                    col_count,
                    repeat,
                });
            }
        };
        push_zone(left, hop_flank, FLANK_DIVISOR);
        push_zone(target, hop_target, 1);
        push_zone(right, hop_flank, FLANK_DIVISOR);

        ReRenderPlan {
            region_id: self.next_region_id,
            target,
            expanded: TimeRange::new(left.start, right.end),
            jobs,
            fft_size,
        }
    }

    /// Deliver per-zone pool output (in job order). Superseded regions
    /// are discarded.
    pub fn complete_rerender(
        &mut self,
        plan: &ReRenderPlan,
        zones: Vec<Vec<Vec<u8>>>,
        freq_bins: usize,
    ) {
        match self.rerender {
            ReRenderState::Pending(region) if region == plan.region_id => {
                let composite = Composite::from_zones(plan, zones, freq_bins);
                debug!(
                    "re-render region {} ready ({} cols)",
                    plan.region_id, composite.cols,
                );
                self.rerender = ReRenderState::Ready(plan.region_id, composite);
            }
            _ => debug!("discarding superseded re-render region {}", plan.region_id),
        }
    }

    /// Mark the in-flight re-render as abandoned (e.g. pool failure).
    pub fn cancel_rerender(&mut self) {
        if let ReRenderState::Pending(_) = self.rerender {
            self.rerender = ReRenderState::Idle;
        }
    }

    /// Advance the animation clock; returns the interpolated range to
    /// display this frame, or `None` when no transition is active.
    pub fn advance(&mut self, dt_secs: f64) -> Option<TimeRange> {
        let anim_secs = self.anim_secs;
        let t = self.transition.as_mut()?;
        t.progress = (t.progress + dt_secs / anim_secs).min(1.0);
        Some(TimeRange::lerp(t.old_range, t.new_range, ease_in_out(t.progress)))
    }

    /// Interpolated range at the current progress.
    pub fn current_range(&self) -> Option<TimeRange> {
        let t = self.transition.as_ref()?;
        Some(TimeRange::lerp(t.old_range, t.new_range, ease_in_out(t.progress)))
    }

    /// Crossfade alpha of the re-rendered composite over the elastic
    /// stretch: 0 before half progress, 1 from 90%, linear between.
    /// Always 0 until the re-render is actually ready.
    pub fn crossfade_alpha(&self) -> f64 {
        if !matches!(self.rerender, ReRenderState::Ready(..)) {
            return 0.0;
        }
        let p = self.progress();
        ((p - FADE_START) / (FADE_END - FADE_START)).clamp(0.0, 1.0)
    }

    /// Complete only when the timeline ended and the re-render finished
    /// or was cancelled.
    pub fn is_complete(&self) -> bool {
        match &self.transition {
            None => true,
            Some(t) => t.progress >= 1.0 && !matches!(self.rerender, ReRenderState::Pending(_)),
        }
    }

    /// Draw the composited frame for the current progress.
    pub fn draw(
        &mut self,
        surface: &mut impl RasterSurface,
        canvas_w: usize,
        canvas_h: usize,
        playback_rate: f64,
        scale: FrequencyScale,
        nyquist: f64,
        colormap: Colormap,
        arena: &mut PixelArena,
    ) {
        let Some(range) = self.current_range() else {
            return;
        };
        surface.clear(colormap.zero_color());
        let geom = ContentGeometry {
            canvas_h: canvas_h as f64,
            scale,
            stretch: scale.stretch_factor(playback_rate, nyquist),
            nyquist,
        };
        let w = canvas_w as f64;

        if let Some(elastic) = &mut self.elastic {
            elastic.draw(surface, range, w, &geom, 1.0, arena);
        }
        if let Some(t) = &mut self.transition {
            if t.direction == ZoomDirection::Out {
                if let Some(snapshot) = &mut t.snapshot {
                    snapshot.draw(surface, range, w, &geom, 1.0, arena);
                }
            }
        }
        let alpha = self.crossfade_alpha() as f32;
        if alpha > 0.0 {
            if let ReRenderState::Ready(_, composite) = &mut self.rerender {
                composite.draw(surface, range, w, &geom, alpha, arena);
            }
        }
    }

    /// Tear down a finished transition, releasing the outgoing snapshot's
    /// texture. Returns the final viewport range.
    pub fn finish(&mut self, surface: &mut impl RasterSurface) -> Option<TimeRange> {
        if !self.is_complete() {
            return None;
        }
        let t = self.transition.take()?;
        if let Some(mut snapshot) = t.snapshot {
            snapshot.release(surface);
        }
        Some(t.new_range)
    }
}
