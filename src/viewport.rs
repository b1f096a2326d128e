//! Viewport rendering: level selection, visible-tile assembly, and the
//! playback-rate frequency stretch.
//!
//! Screen X positions come from nominal tile bounds (tiles abut exactly);
//! texel X positions come from the actual first/last column centers
//! (pixels map to real FFT frames). Mixing the two up produces visible
//! seams at tile joins, which is exactly what the split exists to avoid.

use log::trace;
use seistream_core::waveform::EnvelopeColumn;
use seistream_core::{
    Colormap, RasterSurface, Rect, TextureCache, TileKey, TilePyramid, TILE_COLS,
};
use serde::{Deserialize, Serialize};

/// Positive frequency floor for the log scale.
pub const F_MIN_HZ: f64 = 0.1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FrequencyScale {
    #[default]
    Linear,
    Sqrt,
    Log,
}

impl FrequencyScale {
    /// Reference (unstretched) position of `freq` in [0, 1] from the
    /// bottom of the content box.
    pub fn position(self, freq: f64, nyquist: f64) -> f64 {
        match self {
            FrequencyScale::Linear => freq / nyquist,
            FrequencyScale::Sqrt => (freq / nyquist).max(0.0).sqrt(),
            FrequencyScale::Log => {
                let lo = F_MIN_HZ.log10();
                (freq.max(F_MIN_HZ).log10() - lo) / (nyquist.log10() - lo)
            }
        }
    }

    /// Inverse of [`position`]: frequency shown at fraction `q`.
    pub fn inverse(self, q: f64, nyquist: f64) -> f64 {
        match self {
            FrequencyScale::Linear => q * nyquist,
            FrequencyScale::Sqrt => q * q * nyquist,
            FrequencyScale::Log => {
                let lo = F_MIN_HZ.log10();
                10f64.powf(lo + q * (nyquist.log10() - lo))
            }
        }
    }

    /// Vertical stretch applied to the content box at playback rate
    /// `rate`. Identity at rate 1.0 for every scale.
    pub fn stretch_factor(self, rate: f64, nyquist: f64) -> f64 {
        match self {
            FrequencyScale::Linear => rate,
            FrequencyScale::Sqrt => rate.sqrt(),
            FrequencyScale::Log => {
                let lo = F_MIN_HZ.log10();
                let full = nyquist.log10() - lo;
                let target = ((nyquist / rate).max(F_MIN_HZ).log10() - lo).max(1e-9);
                full / target
            }
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ViewportState {
    pub view_start_sec: f64,
    pub view_end_sec: f64,
    pub canvas_width_px: usize,
    pub canvas_height_px: usize,
    pub playback_rate: f64,
    pub frequency_scale: FrequencyScale,
}

impl ViewportState {
    pub fn new(view_start_sec: f64, view_end_sec: f64, width: usize, height: usize) -> Self {
        Self {
            view_start_sec,
            view_end_sec,
            canvas_width_px: width,
            canvas_height_px: height,
            playback_rate: 1.0,
            frequency_scale: FrequencyScale::Linear,
        }
    }

    pub fn duration(&self) -> f64 {
        self.view_end_sec - self.view_start_sec
    }

    pub fn set_view(&mut self, start_sec: f64, end_sec: f64) {
        self.view_start_sec = start_sec;
        self.view_end_sec = end_sec;
    }
}

/// Pick the coarsest level that still yields at least one column per
/// screen pixel; fall back to level 0 when even it cannot.
pub fn select_level(pyramid: &TilePyramid, view_duration: f64, canvas_width: usize) -> u8 {
    let mut chosen = 0u8;
    for level in 0..pyramid.num_levels() as u8 {
        let visible_cols =
            view_duration / pyramid.tile_duration_at(level) * TILE_COLS as f64;
        if visible_cols >= canvas_width as f64 {
            chosen = level;
        } else {
            break;
        }
    }
    chosen
}

/// A tile clipped to the viewport.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VisibleTile {
    pub key: TileKey,
    /// Visible time span, clipped to both tile and viewport.
    pub t0: f64,
    pub t1: f64,
}

pub fn visible_tiles(
    pyramid: &TilePyramid,
    level: u8,
    view_start: f64,
    view_end: f64,
) -> Vec<VisibleTile> {
    let mut out = Vec::new();
    for tile in pyramid.level_tiles(level) {
        let t0 = tile.start_sec.max(view_start);
        let t1 = tile.end_sec.min(view_end);
        if t1 > t0 {
            out.push(VisibleTile {
                key: tile.key(),
                t0,
                t1,
            });
        }
    }
    out
}

/// A frequency-axis tick, positioned for the current rate and scale.
#[derive(Clone, Debug, PartialEq)]
pub struct Tick {
    pub freq_hz: f64,
    pub y_px: f64,
    pub label: String,
}

fn tick_label(freq_hz: f64) -> String {
    if freq_hz >= 1000.0 {
        let khz = freq_hz / 1000.0;
        if (khz - khz.round()).abs() < 1e-9 {
            format!("{:.0} kHz", khz)
        } else {
            format!("{:.1} kHz", khz)
        }
    } else if freq_hz >= 1.0 {
        format!("{:.0} Hz", freq_hz)
    } else {
        format!("{:.1} Hz", freq_hz)
    }
}

/// Ticks for the frequency axis. The tick set follows the scale (linear:
/// even by Nyquist; sqrt: denser near zero; log: decades); each tick
/// frequency is scaled by the playback rate first, then placed through
/// the reference scale transform.
pub fn frequency_ticks(viewport: &ViewportState, nyquist: f64) -> Vec<Tick> {
    let scale = viewport.frequency_scale;
    let rate = viewport.playback_rate;
    let h = viewport.canvas_height_px as f64;

    let candidates: Vec<f64> = match scale {
        FrequencyScale::Linear => (1..=8).map(|k| nyquist * k as f64 / 8.0).collect(),
        FrequencyScale::Sqrt => (1..=8)
            .map(|k| nyquist * (k as f64 / 8.0).powi(2))
            .collect(),
        FrequencyScale::Log => {
            let mut decades = Vec::new();
            let mut f = F_MIN_HZ;
            while f <= nyquist {
                decades.push(f);
                f *= 10.0;
            }
            decades
        }
    };

    candidates
        .into_iter()
        .filter_map(|freq| {
            let q = scale.position(freq * rate, nyquist);
            if !(0.0..=1.0).contains(&q) {
                return None;
            }
            Some(Tick {
                freq_hz: freq,
                y_px: h - q * h,
                label: tick_label(freq),
            })
        })
        .collect()
}

/// Horizontal texel coordinate for stream time `t` within a tile, mapped
/// against the actual column centers. Deliberately unclamped: times
/// outside the covered span map past the texture edge and the surface's
/// clamp-to-edge sampling holds the boundary column, which is what keeps
/// adjacent tiles seamless.
fn tile_col_at(tile: &seistream_core::SpectroTile, t: f64) -> f32 {
    let span = tile.actual_last_col_sec - tile.actual_first_col_sec;
    if span <= 0.0 || tile.cols < 2 {
        return 0.5;
    }
    let col = (t - tile.actual_first_col_sec) / span * (tile.cols - 1) as f64;
    (col + 0.5) as f32
}

/// Shared vertical geometry for spectrogram content drawing.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ContentGeometry {
    pub canvas_h: f64,
    pub scale: FrequencyScale,
    /// Vertical stretch factor for the current playback rate.
    pub stretch: f64,
    pub nyquist: f64,
}

/// Draw one horizontal span of spectrogram content (`src_x..src_x+src_w`
/// texels into `dst_x..dst_x+dst_w` pixels), anchored to the bottom edge
/// and vertically stretched per the geometry. Linear scale is a single
/// quad; sqrt/log map one strip per output row.
pub(crate) fn draw_stretched(
    surface: &mut impl RasterSurface,
    texture: seistream_core::TextureId,
    bins: usize,
    src_x: f32,
    src_w: f32,
    dst_x: f32,
    dst_w: f32,
    geom: &ContentGeometry,
    alpha: f32,
) {
    if dst_w <= 0.0 || src_w <= 0.0 {
        return;
    }
    let h = geom.canvas_h;
    let content_h = h * geom.stretch;
    let bins_f = bins as f32;

    match geom.scale {
        FrequencyScale::Linear => {
            surface.draw_quad(
                texture,
                Rect::new(src_x, 0.0, src_w, bins_f),
                Rect::new(dst_x, (h - content_h) as f32, dst_w, content_h as f32),
                alpha,
            );
        }
        FrequencyScale::Sqrt | FrequencyScale::Log => {
            for y in 0..h as usize {
                let q = (h - y as f64 - 0.5) / content_h;
                if q > 1.0 {
                    continue; // revealed band stays at zero color
                }
                let freq = geom.scale.inverse(q.max(0.0), geom.nyquist);
                let row = ((1.0 - freq / geom.nyquist) * (bins_f as f64 - 1.0))
                    .clamp(0.0, bins_f as f64 - 1.0);
                surface.draw_quad(
                    texture,
                    Rect::new(src_x, row as f32, src_w, 1.0),
                    Rect::new(dst_x, y as f32, dst_w, 1.0),
                    alpha,
                );
            }
        }
    }
}

/// Walk up the pyramid from `key` until a tile is drawable (texture
/// cached, or CPU magnitudes present for upload).
fn drawable_key(pyramid: &TilePyramid, cache: &TextureCache, key: TileKey) -> Option<TileKey> {
    let mut k = key;
    loop {
        if let Some(tile) = pyramid.tile(k) {
            if tile.ready && (cache.contains(k) || tile.magnitudes.is_some()) {
                return Some(k);
            }
        }
        if (k.level as usize) + 1 >= pyramid.num_levels() {
            return None;
        }
        k = k.parent();
    }
}

/// Draw the spectrogram for the viewport. Content is anchored to the
/// bottom edge; with stretch < 1 the revealed top band stays at the
/// colormap zero color, with stretch ≥ 1 the top of the content is
/// clipped off-screen.
pub fn render_spectrogram(
    surface: &mut impl RasterSurface,
    pyramid: &TilePyramid,
    cache: &mut TextureCache,
    viewport: &ViewportState,
    colormap: Colormap,
) {
    let w = viewport.canvas_width_px as f64;
    let h = viewport.canvas_height_px as f64;
    surface.clear(colormap.zero_color());
    if viewport.duration() <= 0.0 || w <= 0.0 || h <= 0.0 {
        return;
    }

    let nyquist = pyramid.sample_rate() as f64 / 2.0;
    let scale = viewport.frequency_scale;
    let geom = ContentGeometry {
        canvas_h: h,
        scale,
        stretch: scale.stretch_factor(viewport.playback_rate, nyquist),
        nyquist,
    };
    let level = select_level(pyramid, viewport.duration(), viewport.canvas_width_px);
    trace!("render: level {level}, stretch {:.3}", geom.stretch);

    for vis in visible_tiles(pyramid, level, viewport.view_start_sec, viewport.view_end_sec) {
        let Some(key) = drawable_key(pyramid, cache, vis.key) else {
            continue;
        };
        let tile = pyramid.tile(key).expect("drawable key exists");
        let Some(texture) = cache.get_or_upload(surface, tile) else {
            continue;
        };

        let dst_x = (vis.t0 - viewport.view_start_sec) / viewport.duration() * w;
        let dst_w = (vis.t1 - vis.t0) / viewport.duration() * w;
        let src_x = tile_col_at(tile, vis.t0);
        let src_w = (tile_col_at(tile, vis.t1) - src_x).max(0.0);
        draw_stretched(
            surface,
            texture,
            tile.freq_bins,
            src_x,
            src_w,
            dst_x as f32,
            dst_w as f32,
            &geom,
            1.0,
        );
    }
}

/// Nice 1-2-5 progression of time-tick intervals in seconds, from 100 ms
/// up to a day (deep-time windows zoom from sub-second to many hours).
const TIME_TICK_INTERVALS: &[f64] = &[
    0.1, 0.2, 0.5,
    1.0, 2.0, 5.0,
    10.0, 30.0, 60.0,
    120.0, 300.0, 600.0,
    1800.0, 3600.0, 7200.0,
    21_600.0, 43_200.0, 86_400.0,
];

/// Format a time value as a compact label whose precision matches the
/// tick interval.
fn format_time_label(seconds: f64, interval: f64) -> String {
    if interval < 1.0 {
        format!("{:.0}ms", seconds * 1000.0)
    } else if interval < 60.0 {
        format!("{:.0}s", seconds)
    } else if interval < 3600.0 {
        let mins = (seconds / 60.0).floor() as u64;
        let secs = (seconds % 60.0).round() as u64;
        if secs == 0 {
            format!("{mins}m")
        } else {
            format!("{mins}m{secs:02}s")
        }
    } else {
        let hours = (seconds / 3600.0).floor() as u64;
        let mins = ((seconds % 3600.0) / 60.0).round() as u64;
        if mins == 0 {
            format!("{hours}h")
        } else {
            format!("{hours}h{mins:02}m")
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TimeTick {
    pub sec: f64,
    pub x_px: f64,
    pub label: String,
}

/// Major time-axis ticks for the visible range, spaced so labels stay at
/// least ~100 px apart.
pub fn time_ticks(viewport: &ViewportState) -> Vec<TimeTick> {
    let duration = viewport.duration();
    let w = viewport.canvas_width_px as f64;
    if duration <= 0.0 || w <= 0.0 {
        return Vec::new();
    }
    let px_per_sec = w / duration;
    let min_interval = 100.0 / px_per_sec;
    let interval = TIME_TICK_INTERVALS
        .iter()
        .copied()
        .find(|&i| i >= min_interval)
        .unwrap_or(*TIME_TICK_INTERVALS.last().unwrap());

    let mut ticks = Vec::new();
    let mut t = (viewport.view_start_sec / interval).ceil() * interval;
    while t <= viewport.view_end_sec {
        ticks.push(TimeTick {
            sec: t,
            x_px: (t - viewport.view_start_sec) * px_per_sec,
            label: format_time_label(t, interval),
        });
        t += interval;
    }
    ticks
}

/// Draw time-axis tick strokes along the bottom edge.
pub fn render_time_axis(
    surface: &mut impl RasterSurface,
    viewport: &ViewportState,
    color: [u8; 4],
) {
    let h = viewport.canvas_height_px as f32;
    for tick in time_ticks(viewport) {
        surface.fill_rect(color, Rect::new(tick.x_px as f32, h - 12.0, 1.0, 12.0));
    }
}

/// Draw the full-duration overview strip into `rect` with an outline
/// marking the current viewport. Always the coarsest level, unstretched:
/// the overview is the reference map, not the zoomed display.
pub fn render_overview(
    surface: &mut impl RasterSurface,
    pyramid: &TilePyramid,
    cache: &mut TextureCache,
    viewport: &ViewportState,
    rect: Rect,
    marker: [u8; 4],
) {
    let duration = pyramid.duration_secs();
    if duration <= 0.0 || rect.w <= 0.0 || rect.h <= 0.0 {
        return;
    }
    let top = (pyramid.num_levels() - 1) as u8;

    for tile in pyramid.level_tiles(top) {
        let Some(key) = drawable_key(pyramid, cache, tile.key()) else {
            continue;
        };
        let tile = pyramid.tile(key).expect("drawable key exists");
        let Some(texture) = cache.get_or_upload(surface, tile) else {
            continue;
        };
        let dst_x = rect.x + (tile.start_sec / duration) as f32 * rect.w;
        let dst_w = (tile.duration_sec() / duration) as f32 * rect.w;
        surface.draw_quad(
            texture,
            Rect::new(
                tile_col_at(tile, tile.start_sec),
                0.0,
                (tile_col_at(tile, tile.end_sec) - tile_col_at(tile, tile.start_sec)).max(0.0),
                tile.freq_bins as f32,
            ),
            Rect::new(dst_x, rect.y, dst_w, rect.h),
            1.0,
        );
    }

    // Viewport indicator: a one-pixel outline over the visible span.
    let x0 = rect.x + (viewport.view_start_sec / duration).clamp(0.0, 1.0) as f32 * rect.w;
    let x1 = rect.x + (viewport.view_end_sec / duration).clamp(0.0, 1.0) as f32 * rect.w;
    let w = (x1 - x0).max(1.0);
    surface.fill_rect(marker, Rect::new(x0, rect.y, w, 1.0));
    surface.fill_rect(marker, Rect::new(x0, rect.bottom() - 1.0, w, 1.0));
    surface.fill_rect(marker, Rect::new(x0, rect.y, 1.0, rect.h));
    surface.fill_rect(marker, Rect::new(x1 - 1.0, rect.y, 1.0, rect.h));
}

/// Draw a min/max envelope strip into `rect`.
pub fn render_waveform(
    surface: &mut impl RasterSurface,
    columns: &[EnvelopeColumn],
    rect: Rect,
    background: [u8; 4],
    color: [u8; 4],
) {
    surface.fill_rect(background, rect);
    if columns.is_empty() {
        return;
    }
    let mid_y = rect.y + rect.h / 2.0;
    let half = rect.h / 2.0 * 0.9;
    let col_w = rect.w / columns.len() as f32;

    for (i, col) in columns.iter().enumerate() {
        let x = rect.x + i as f32 * col_w;
        let y_top = mid_y - col.max * half;
        let y_bot = mid_y - col.min * half;
        surface.fill_rect(
            color,
            Rect::new(x, y_top, col_w.max(1.0), (y_bot - y_top).max(1.0)),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seistream_core::{AudioStream, CancelToken, FftPool, SoftwareRaster, Window};

    fn rendered_pyramid(duration: f64, rate: u32, fft: usize, base: f64) -> TilePyramid {
        let mut p = TilePyramid::with_base_duration(duration, rate, fft, base);
        let n = (duration * rate as f64) as usize;
        let stream = AudioStream::new(
            (0..n)
                .map(|i| (2.0 * std::f32::consts::PI * 100.0 * i as f32 / rate as f32).sin())
                .collect(),
            rate,
        );
        let pool = FftPool::with_workers(2);
        loop {
            let specs = p.pending_base_specs(&stream, true);
            if specs.is_empty() {
                break;
            }
            for (index, spec) in specs {
                let results = pool.process_batches(
                    vec![spec.to_batch(index, &stream, Window::Hann)],
                    &CancelToken::new(),
                    |_| {},
                );
                let columns = results.into_iter().next().unwrap().columns;
                p.ingest_base(index, spec, columns);
            }
        }
        p
    }

    #[test]
    fn level_selection_prefers_coarsest_sufficient() {
        let p = TilePyramid::with_base_duration(8000.0, 1000, 512, 1000.0);
        // 8 base tiles -> levels 0..3 with durations 1000/2000/4000/8000 s.
        assert_eq!(p.num_levels(), 4);

        // Narrow viewport: only L0 gives >= 1 col/px.
        assert_eq!(select_level(&p, 500.0, 512), 0);
        // Wide viewport: top level still has enough columns.
        assert_eq!(select_level(&p, 8000.0, 512), 3);
        // Ultra-narrow viewport where even L0 is too coarse: stay at L0.
        assert_eq!(select_level(&p, 0.1, 4096), 0);
    }

    #[test]
    fn level_selection_is_monotone_in_view_width() {
        let p = TilePyramid::with_base_duration(16_000.0, 1000, 512, 500.0);
        let mut last = select_level(&p, 10.0, 800);
        for dur in [50.0, 200.0, 700.0, 2000.0, 8000.0, 16_000.0] {
            let level = select_level(&p, dur, 800);
            assert!(level >= last, "widening view chose finer level {level} < {last}");
            last = level;
        }
    }

    #[test]
    fn stretch_identity_at_rate_one() {
        for scale in [FrequencyScale::Linear, FrequencyScale::Sqrt, FrequencyScale::Log] {
            let s = scale.stretch_factor(1.0, 500.0);
            assert!((s - 1.0).abs() < 1e-9, "{scale:?} stretch {s} at rate 1");
        }
    }

    #[test]
    fn stretch_directions() {
        let ny = 500.0;
        // Faster playback raises frequencies: content grows.
        assert!(FrequencyScale::Linear.stretch_factor(4.0, ny) > 1.0);
        assert!(FrequencyScale::Sqrt.stretch_factor(4.0, ny) > 1.0);
        assert!(FrequencyScale::Log.stretch_factor(4.0, ny) > 1.0);
        // Slower playback lowers them: content shrinks.
        assert!(FrequencyScale::Linear.stretch_factor(0.25, ny) < 1.0);
        assert!(FrequencyScale::Log.stretch_factor(0.25, ny) < 1.0);
        // Sqrt is the geometric mean of the two.
        let lin = FrequencyScale::Linear.stretch_factor(4.0, ny);
        let sq = FrequencyScale::Sqrt.stretch_factor(4.0, ny);
        assert!((sq * sq - lin).abs() < 1e-9);
    }

    #[test]
    fn scale_position_round_trips() {
        for scale in [FrequencyScale::Linear, FrequencyScale::Sqrt, FrequencyScale::Log] {
            for freq in [1.0, 10.0, 123.0, 499.0] {
                let q = scale.position(freq, 500.0);
                let back = scale.inverse(q, 500.0);
                assert!(
                    (back - freq).abs() / freq < 1e-6,
                    "{scale:?}: {freq} -> {q} -> {back}",
                );
            }
        }
    }

    #[test]
    fn visible_tiles_clip_to_viewport() {
        let p = TilePyramid::with_base_duration(4000.0, 1000, 512, 1000.0);
        let tiles = visible_tiles(&p, 0, 1500.0, 2500.0);
        assert_eq!(tiles.len(), 2);
        assert_eq!(tiles[0].key, TileKey::new(0, 1));
        assert_eq!(tiles[0].t0, 1500.0);
        assert_eq!(tiles[0].t1, 2000.0);
        assert_eq!(tiles[1].key, TileKey::new(0, 2));
        assert_eq!(tiles[1].t1, 2500.0);
    }

    #[test]
    fn ticks_scale_with_playback_rate() {
        let mut vp = ViewportState::new(0.0, 100.0, 800, 400);
        vp.frequency_scale = FrequencyScale::Linear;
        let ny = 500.0;

        vp.playback_rate = 1.0;
        let at_unit = frequency_ticks(&vp, ny);
        assert_eq!(at_unit.len(), 8);
        // Top tick is the Nyquist itself at y = 0.
        let top = at_unit.last().unwrap();
        assert_eq!(top.freq_hz, 500.0);
        assert!(top.y_px.abs() < 1e-9);

        // Halving the rate moves every tick down; ticks above Nyquist
        // would fall off, none here.
        vp.playback_rate = 0.5;
        let at_half = frequency_ticks(&vp, ny);
        assert_eq!(at_half.len(), 8);
        for (a, b) in at_unit.iter().zip(&at_half) {
            assert!(b.y_px > a.y_px - 1e-9);
        }

        // Doubling the rate pushes the upper half off the top.
        vp.playback_rate = 2.0;
        let at_double = frequency_ticks(&vp, ny);
        assert_eq!(at_double.len(), 4);
    }

    #[test]
    fn log_ticks_are_decades() {
        let mut vp = ViewportState::new(0.0, 100.0, 800, 400);
        vp.frequency_scale = FrequencyScale::Log;
        let ticks = frequency_ticks(&vp, 500.0);
        let freqs: Vec<f64> = ticks.iter().map(|t| t.freq_hz).collect();
        assert_eq!(freqs, vec![0.1, 1.0, 10.0, 100.0]);
        assert_eq!(ticks[1].label, "1 Hz");
    }

    #[test]
    fn rendered_pixels_match_tile_at_rate_one() {
        let rate = 1000;
        let p = rendered_pyramid(50.0, rate, 256, 50.0);
        let tile = p.tile(TileKey::new(0, 0)).unwrap();
        let bins = tile.freq_bins;

        let mut cache = TextureCache::new(8);
        let mut surface = SoftwareRaster::new(tile.cols, bins, Colormap::Grayscale);
        let vp = ViewportState {
            view_start_sec: 0.0,
            view_end_sec: 50.0,
            canvas_width_px: tile.cols,
            canvas_height_px: bins,
            playback_rate: 1.0,
            frequency_scale: FrequencyScale::Linear,
        };
        render_spectrogram(&mut surface, &p, &mut cache, &vp, Colormap::Grayscale);

        // Away from clamped edges, canvas pixels equal the tile's own
        // quantized values through the grayscale map.
        let lut = Colormap::Grayscale.lut();
        for (col, bin) in [(100usize, 10usize), (500, 64), (900, 120)] {
            let expected = lut[tile.magnitude(col, bin).unwrap() as usize];
            // Row for bin: texture row 0 = highest bin.
            let y = bins - 1 - bin;
            let px_x = ((tile.col_center_sec(col) - vp.view_start_sec) / vp.duration()
                * tile.cols as f64) as usize;
            let got = surface.pixel(px_x.min(tile.cols - 1), y);
            assert_eq!(got, expected, "col {col} bin {bin}");
        }
    }

    #[test]
    fn slow_rate_reveals_zero_band_on_top() {
        let rate = 1000;
        let p = rendered_pyramid(50.0, rate, 256, 50.0);
        let mut cache = TextureCache::new(8);
        let mut surface = SoftwareRaster::new(64, 100, Colormap::Viridis);
        let mut vp = ViewportState::new(0.0, 50.0, 64, 100);
        vp.playback_rate = 0.5; // content shrinks to the bottom half

        render_spectrogram(&mut surface, &p, &mut cache, &vp, Colormap::Viridis);

        let zero = Colormap::Viridis.zero_color();
        // Top band is untouched zero color.
        assert_eq!(surface.pixel(32, 5), zero);
        assert_eq!(surface.pixel(10, 40), zero);
    }

    #[test]
    fn time_tick_interval_keeps_labels_apart() {
        // 1 hour over 800 px: 100 px needs >= 450 s, so 600 s ticks.
        let vp = ViewportState::new(0.0, 3600.0, 800, 400);
        let ticks = time_ticks(&vp);
        assert_eq!(ticks.len(), 7); // 0, 600, ..., 3600
        assert_eq!(ticks[0].sec, 0.0);
        assert_eq!(ticks[1].sec, 600.0);
        assert_eq!(ticks[1].label, "10m");
        assert_eq!(ticks.last().unwrap().label, "60m");

        // Tick spacing in pixels respects the 100 px floor.
        let dx = ticks[1].x_px - ticks[0].x_px;
        assert!(dx >= 100.0);
    }

    #[test]
    fn time_ticks_follow_scrolled_window() {
        let vp = ViewportState::new(95.0, 215.0, 600, 400);
        let ticks = time_ticks(&vp);
        // 120 s over 600 px: interval 30 s, first tick at 120.
        assert_eq!(ticks[0].sec, 120.0);
        assert_eq!(ticks[0].label, "120s");
        assert!((ticks[0].x_px - 125.0).abs() < 1e-6);
        assert!(ticks.iter().all(|t| t.sec <= 215.0));
    }

    #[test]
    fn time_label_precision_matches_interval() {
        assert_eq!(format_time_label(0.5, 0.1), "500ms");
        assert_eq!(format_time_label(45.0, 5.0), "45s");
        assert_eq!(format_time_label(90.0, 60.0), "1m30s");
        assert_eq!(format_time_label(7200.0, 3600.0), "2h");
        assert_eq!(format_time_label(23_400.0, 21_600.0), "6h30m");
    }

    #[test]
    fn overview_marks_current_viewport() {
        let rate = 1000;
        let p = rendered_pyramid(200.0, rate, 256, 50.0);
        let mut cache = TextureCache::new(8);
        let mut surface = SoftwareRaster::new(100, 40, Colormap::Grayscale);
        surface.clear([0, 0, 0, 255]);

        let mut vp = ViewportState::new(100.0, 150.0, 100, 40);
        vp.playback_rate = 1.0;
        render_overview(
            &mut surface,
            &p,
            &mut cache,
            &vp,
            Rect::new(0.0, 0.0, 100.0, 40.0),
            [255, 0, 0, 255],
        );

        // Marker outline sits over the visible span (50..75 px).
        assert_eq!(surface.pixel(50, 0), [255, 0, 0, 255]);
        assert_eq!(surface.pixel(74, 39), [255, 0, 0, 255]);
        // Outside the marker the strip holds spectrogram content.
        assert_ne!(surface.pixel(10, 20), [255, 0, 0, 255]);
    }

    #[test]
    fn waveform_strip_draws_envelope() {
        let mut surface = SoftwareRaster::new(100, 50, Colormap::Grayscale);
        let columns: Vec<EnvelopeColumn> = (0..100)
            .map(|i| {
                let a = if i == 50 { 1.0 } else { 0.1 };
                EnvelopeColumn { min: -a, max: a }
            })
            .collect();
        render_waveform(
            &mut surface,
            &columns,
            Rect::new(0.0, 0.0, 100.0, 50.0),
            [0, 0, 0, 255],
            [0, 255, 0, 255],
        );
        // The spike column is painted near the top; quiet columns are not.
        assert_eq!(surface.pixel(50, 4)[1], 255);
        assert_eq!(surface.pixel(10, 4)[1], 0);
        // Everything is painted at the midline.
        assert_eq!(surface.pixel(10, 25)[1], 255);
    }
}
