use std::time::Duration;

use serde::{Deserialize, Serialize};

/// FFT sizes the controller accepts.
pub const FFT_SIZES: &[usize] = &[512, 1024, 2048, 4096];

/// Playback-rate bounds.
pub const MIN_PLAYBACK_RATE: f64 = 0.1;
pub const MAX_PLAYBACK_RATE: f64 = 15.0;

/// Session configuration. One value per `RendererCore`; every field has a
/// sensible default so `SessionConfig::default()` runs out of the box.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Playback sample rate Rp the audio sink runs at.
    pub playback_rate_hz: u32,
    /// FFT size for spectrogram tiles (one of [`FFT_SIZES`]).
    pub fft_size: usize,
    /// Level-0 tile span in stream seconds.
    pub base_tile_secs: f64,
    /// DC-removal filter coefficient for the waveform strip, in
    /// [0.9, 0.999].
    pub dc_alpha: f32,
    /// Waveform envelope width in columns.
    pub waveform_width: usize,
    /// Per-chunk fetch wall-clock limit.
    #[serde(with = "duration_secs")]
    pub fetch_timeout: Duration,
    /// Zoom animation length in seconds.
    pub zoom_anim_secs: f64,
    /// Radius around the viewport inside which tile CPU copies are kept.
    pub trim_keep_radius_secs: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            playback_rate_hz: 44_100,
            fft_size: 2048,
            base_tile_secs: 900.0,
            dc_alpha: 0.995,
            waveform_width: 1024,
            fetch_timeout: Duration::from_secs(30),
            zoom_anim_secs: 0.5,
            trim_keep_radius_secs: 3600.0,
        }
    }
}

mod duration_secs {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}
