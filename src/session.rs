//! Session core: one value owns every mutable display-side structure.
//!
//! `RendererCore` is the controller-side handle: catalog, plan
//! execution, tile pyramid, texture cache, viewport, zoom transitions,
//! and scratch buffers all live here, so free functions receive a handle
//! instead of reaching for shared globals. Compute runs on the FFT pool;
//! fetches run as awaitable operations; everything that touches display
//! state happens through `&mut self` on the controller.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use crossbeam_channel::Receiver;
use gs_lib::plan::plan_window;
use gs_lib::{Catalog, ChunkFetcher, DayManifest, FetchPlan};
use log::{debug, info, warn};
use seistream_core::waveform::{dc_remove, envelope, EnvelopeColumn};
use seistream_core::{
    AudioStream, CancelToken, Colormap, FftPool, RasterSurface, TextureCache, TileKey,
    TilePyramid, Window,
};

use crate::buffers::PixelArena;
use crate::config::{SessionConfig, FFT_SIZES, MAX_PLAYBACK_RATE, MIN_PLAYBACK_RATE};
use crate::error::{EngineError, Result};
use crate::fetch::{stream_plan, StreamEvent};
use crate::sink::AudioSink;
use crate::viewport::{render_spectrogram, FrequencyScale, ViewportState};
use crate::zoom::{ReRenderPlan, TimeRange, ZoomCompositor};
use crate::{viewport, wav};

pub struct RendererCore {
    config: SessionConfig,
    catalog: Catalog,
    colormap: Colormap,

    pool: Option<FftPool>,
    pyramid: Option<TilePyramid>,
    tile_events: Option<Receiver<TileKey>>,
    texture_cache: TextureCache,

    stream: Option<AudioStream>,
    waveform: Option<Vec<EnvelopeColumn>>,
    dc_removal: bool,

    viewport: ViewportState,
    zoom: ZoomCompositor,
    pending_rerender: Option<ReRenderPlan>,

    arena: PixelArena,
    cancel: CancelToken,
}

impl RendererCore {
    pub fn new(config: SessionConfig) -> Self {
        let zoom = ZoomCompositor::new(config.zoom_anim_secs);
        Self {
            config,
            catalog: Catalog::new(),
            colormap: Colormap::default(),
            pool: None,
            pyramid: None,
            tile_events: None,
            texture_cache: TextureCache::with_adaptive_cap(None),
            stream: None,
            waveform: None,
            dc_removal: false,
            viewport: ViewportState::new(0.0, 0.0, 0, 0),
            zoom,
            pending_rerender: None,
            arena: PixelArena::new(),
            cancel: CancelToken::new(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn insert_manifest(&mut self, manifest: DayManifest) {
        self.catalog.insert(manifest);
    }

    pub fn stream(&self) -> Option<&AudioStream> {
        self.stream.as_ref()
    }

    pub fn pyramid(&self) -> Option<&TilePyramid> {
        self.pyramid.as_ref()
    }

    pub fn viewport(&self) -> &ViewportState {
        &self.viewport
    }

    pub fn waveform(&self) -> Option<&[EnvelopeColumn]> {
        self.waveform.as_deref()
    }

    /// Token cancelling the current request; clone it before spawning the
    /// stream task if you need to cancel from elsewhere.
    pub fn request_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    // ── Controller inputs ────────────────────────────────────────────────

    pub fn set_canvas_size(&mut self, width_px: usize, height_px: usize) {
        self.viewport.canvas_width_px = width_px;
        self.viewport.canvas_height_px = height_px;
    }

    /// Clamped to [0.1, 15].
    pub fn set_playback_rate(&mut self, rate: f64) {
        self.viewport.playback_rate = rate.clamp(MIN_PLAYBACK_RATE, MAX_PLAYBACK_RATE);
    }

    pub fn set_frequency_scale(&mut self, scale: FrequencyScale) {
        self.viewport.frequency_scale = scale;
    }

    pub fn set_colormap(&mut self, colormap: Colormap) {
        self.colormap = colormap;
    }

    /// Size the texture cache from the surface's device-memory hint.
    /// Call once the drawing surface exists; an occupied cache is left
    /// alone (its texture handles belong to the host).
    pub fn adapt_texture_cache(&mut self, surface: &impl RasterSurface) {
        let sized = TextureCache::with_adaptive_cap(surface.memory_hint_mb());
        if self.texture_cache.is_empty() && sized.cap() != self.texture_cache.cap() {
            self.texture_cache = sized;
        }
    }

    /// Changing the FFT size invalidates every tile; the pyramid is
    /// rebuilt from the published stream.
    pub fn set_fft_size(&mut self, fft_size: usize) -> Result<()> {
        if !FFT_SIZES.contains(&fft_size) {
            return Err(EngineError::BadFftSize(fft_size));
        }
        if self.config.fft_size == fft_size {
            return Ok(());
        }
        self.config.fft_size = fft_size;
        if self.stream.is_some() {
            self.rebuild_pyramid();
        }
        Ok(())
    }

    /// Toggle the first-order DC-removal pass under the waveform strip.
    pub fn set_dc_removal(&mut self, enabled: bool) {
        if self.dc_removal != enabled {
            self.dc_removal = enabled;
            // Rebuilt lazily from the published stream on next request.
            self.waveform = None;
        }
    }

    // ── Request pipeline ─────────────────────────────────────────────────

    /// Plan a request window from the session catalog (manifests must be
    /// inserted first). Equivalent plans can come from the store's
    /// progressive view instead.
    pub fn plan_request(
        &self,
        station: &str,
        start: DateTime<Utc>,
        duration_secs: i64,
    ) -> Result<FetchPlan> {
        let end = start + ChronoDuration::seconds(duration_secs);
        Ok(plan_window(&self.catalog, station, start, end)?)
    }

    /// Execute a plan: fetch, decode, and hand segments to `sink` in
    /// order, then publish the stream and set up pyramid and waveform.
    /// Supersedes any prior request.
    pub async fn stream_window<F, S>(
        &mut self,
        fetcher: Arc<F>,
        plan: FetchPlan,
        sink: &mut S,
        on_event: impl FnMut(StreamEvent),
    ) -> Result<()>
    where
        F: ChunkFetcher + 'static,
        S: AudioSink,
    {
        // Supersede the previous plan: its batches stop dispatching and
        // late results are discarded.
        self.cancel.cancel();
        self.cancel = CancelToken::new();
        if let Some(pool) = &self.pool {
            pool.terminate();
        }

        let plan = Arc::new(plan);
        info!(
            "request: {} chunks ({} stored) for {}",
            plan.entries.len(),
            plan.stored_count(),
            plan.station,
        );

        let stream = stream_plan(
            fetcher,
            plan,
            self.config.playback_rate_hz,
            self.config.fetch_timeout,
            self.cancel.clone(),
            sink,
            on_event,
        )
        .await?;

        self.viewport.set_view(0.0, stream.duration_secs());
        self.stream = Some(stream);
        self.waveform = None;
        self.rebuild_pyramid();
        self.rebuild_waveform();
        Ok(())
    }

    /// Cancel the in-flight request, if any.
    pub fn cancel_request(&mut self) {
        self.cancel.cancel();
        if let Some(pool) = &self.pool {
            pool.terminate();
        }
    }

    fn rebuild_pyramid(&mut self) {
        let Some(stream) = &self.stream else {
            return;
        };
        let mut pyramid = TilePyramid::with_base_duration(
            stream.duration_secs(),
            stream.sample_rate,
            self.config.fft_size,
            self.config.base_tile_secs,
        );
        self.tile_events = pyramid.take_ready_events();
        self.pyramid = Some(pyramid);
        // Old tiles' textures are unreachable now; start a fresh cache.
        self.texture_cache = TextureCache::with_adaptive_cap(None);
        debug!("pyramid rebuilt at fft {}", self.config.fft_size);
    }

    fn rebuild_waveform(&mut self) {
        let Some(stream) = &self.stream else {
            return;
        };
        let width = self.config.waveform_width;
        let columns = if self.dc_removal {
            // DC removal runs over the normalized stream and the result
            // is rescaled to unit range for display.
            let filtered = dc_remove(&stream.samples, self.config.dc_alpha);
            let peak = filtered.iter().fold(0.0f32, |m, &s| m.max(s.abs())).max(1e-12);
            let scaled: Vec<f32> = filtered.iter().map(|&s| s / peak).collect();
            envelope(&scaled, width)
        } else {
            envelope(&stream.samples, width)
        };
        self.waveform = Some(columns);
    }

    // ── Compute pumping ──────────────────────────────────────────────────

    fn pool(&mut self) -> &FftPool {
        // The pool spins up lazily on first use.
        self.pool.get_or_insert_with(FftPool::new)
    }

    /// Run pending compute: base-tile renders and any queued zoom
    /// re-render. Blocking (drive from a worker/blocking context).
    /// Returns the number of base tiles rendered.
    pub fn pump(&mut self) -> usize {
        let rendered = self.pump_tiles();
        self.pump_rerender();
        rendered
    }

    fn pump_tiles(&mut self) -> usize {
        let Some(stream) = self.stream.clone() else {
            return 0;
        };
        let Some(mut pyramid) = self.pyramid.take() else {
            return 0;
        };

        let specs = pyramid.pending_base_specs(&stream, true);
        if specs.is_empty() {
            self.pyramid = Some(pyramid);
            return 0;
        }
        let token = self.cancel.clone();
        let batches: Vec<_> = specs
            .iter()
            .map(|(index, spec)| spec.to_batch(*index, &stream, Window::Hann))
            .collect();
        let results = self.pool().process_batches(batches, &token, |_| {});

        let mut rendered = 0;
        for result in results {
            let spec = specs
                .iter()
                .find(|(index, _)| *index == result.id)
                .map(|(_, spec)| *spec)
                .expect("result id comes from specs");
            match result.status {
                seistream_core::BatchStatus::Done => {
                    pyramid.ingest_base(result.id, spec, result.columns);
                    rendered += 1;
                }
                seistream_core::BatchStatus::Cancelled => {
                    pyramid.invalidate_base(result.id);
                }
                seistream_core::BatchStatus::Failed => {
                    // Leave the tile pending; the viewport falls back to
                    // a coarser level meanwhile.
                    warn!("base tile {} failed to render", result.id);
                    pyramid.invalidate_base(result.id);
                }
            }
        }
        self.pyramid = Some(pyramid);
        rendered
    }

    fn pump_rerender(&mut self) {
        let Some(plan) = self.pending_rerender.take() else {
            return;
        };
        let Some(stream) = self.stream.clone() else {
            return;
        };
        let freq_bins = match &self.pyramid {
            Some(p) => p.freq_bins(),
            None => return,
        };

        let token = self.cancel.clone();
        let batches = plan.batches(&stream, Window::Hann);
        let mut zones: Vec<Vec<Vec<u8>>> = vec![Vec::new(); plan.jobs.len()];
        let results = self.pool().process_batches(batches, &token, |_| {});

        let mut failed = false;
        for result in results {
            match result.status {
                seistream_core::BatchStatus::Done => zones[result.id] = result.columns,
                _ => failed = true,
            }
        }
        if failed {
            warn!("zoom re-render region {} abandoned", plan.region_id);
            self.zoom.cancel_rerender();
        } else {
            self.zoom.complete_rerender(&plan, zones, freq_bins);
        }
    }

    /// Count of tile-ready events since the last call (drives redraws).
    pub fn drain_tile_events(&mut self) -> usize {
        self.tile_events
            .as_ref()
            .map(|rx| rx.try_iter().count())
            .unwrap_or(0)
    }

    // ── Zoom ─────────────────────────────────────────────────────────────

    /// Animate the viewport to `[start_sec, end_sec]`. The background
    /// re-render is queued and executed on the next `pump`.
    pub fn begin_zoom(&mut self, start_sec: f64, end_sec: f64) -> Result<()> {
        let Some(pyramid) = &self.pyramid else {
            return Err(EngineError::NoStream);
        };
        let stream_rate = pyramid.sample_rate();
        let plan = self.zoom.begin(
            pyramid,
            TimeRange::new(start_sec, end_sec),
            stream_rate,
            self.config.fft_size,
        );
        self.pending_rerender = Some(plan);
        Ok(())
    }

    pub fn zoom_active(&self) -> bool {
        self.zoom.is_active()
    }

    pub fn zoom_complete(&self) -> bool {
        self.zoom.is_complete()
    }

    // ── Frame rendering ──────────────────────────────────────────────────

    /// Draw one frame, advancing any zoom animation by `dt_secs`.
    pub fn render_frame(&mut self, surface: &mut impl RasterSurface, dt_secs: f64) {
        let Some(pyramid) = &self.pyramid else {
            return;
        };
        let nyquist = pyramid.sample_rate() as f64 / 2.0;

        if self.zoom.is_active() {
            if let Some(range) = self.zoom.advance(dt_secs) {
                self.viewport.set_view(range.start, range.end);
            }
            self.zoom.draw(
                surface,
                self.viewport.canvas_width_px,
                self.viewport.canvas_height_px,
                self.viewport.playback_rate,
                self.viewport.frequency_scale,
                nyquist,
                self.colormap,
                &mut self.arena,
            );
            if let Some(final_range) = self.zoom.finish(surface) {
                self.viewport.set_view(final_range.start, final_range.end);
            }
            return;
        }

        render_spectrogram(
            surface,
            pyramid,
            &mut self.texture_cache,
            &self.viewport,
            self.colormap,
        );
    }

    /// Draw the waveform strip into `rect`.
    pub fn render_waveform_strip(
        &mut self,
        surface: &mut impl RasterSurface,
        rect: seistream_core::Rect,
    ) {
        if self.waveform.is_none() {
            self.rebuild_waveform();
        }
        let Some(columns) = &self.waveform else {
            return;
        };
        viewport::render_waveform(
            surface,
            columns,
            rect,
            [10, 10, 10, 255],
            [102, 170, 102, 255],
        );
    }

    /// Draw the full-duration overview strip with a viewport marker.
    pub fn render_overview_strip(
        &mut self,
        surface: &mut impl RasterSurface,
        rect: seistream_core::Rect,
        marker: [u8; 4],
    ) {
        let Some(pyramid) = &self.pyramid else {
            return;
        };
        viewport::render_overview(
            surface,
            pyramid,
            &mut self.texture_cache,
            &self.viewport,
            rect,
            marker,
        );
    }

    /// Draw time-axis ticks along the bottom of the spectrogram canvas.
    pub fn render_time_axis(&mut self, surface: &mut impl RasterSurface) {
        viewport::render_time_axis(surface, &self.viewport, [255, 255, 255, 120]);
    }

    /// Drop CPU copies of far-from-viewport tiles whose textures are
    /// cached.
    pub fn trim_memory(&mut self) -> usize {
        let center = (self.viewport.view_start_sec + self.viewport.view_end_sec) / 2.0;
        let keep = self.config.trim_keep_radius_secs;
        let cache = &self.texture_cache;
        match &mut self.pyramid {
            Some(pyramid) => pyramid.trim_far(center, keep, |key| cache.contains(key)),
            None => 0,
        }
    }

    /// Export the published stream as WAV.
    pub fn export_wav(&self, path: &std::path::Path) -> Result<()> {
        let stream = self.stream.as_ref().ok_or(EngineError::NoStream)?;
        wav::export_wav(path, stream)
    }
}
