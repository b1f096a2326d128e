//! Spectrogram tile descriptors and base-tile render math.
//!
//! A level-0 tile covers `base_tile_duration` seconds of stream time and
//! holds up to [`TILE_COLS`] quantized STFT columns. Nominal tile bounds
//! (`start_sec`/`end_sec`) tile the stream exactly; the *actual* first and
//! last column times are the centers of the first and last FFT frames and
//! differ from the nominal bounds by half a window. UV mapping must use
//! the actuals or tile joins show seams.

use crate::pool::FftBatch;
use crate::stft::Window;
use crate::types::AudioStream;

/// Columns per full tile.
pub const TILE_COLS: usize = 1024;

/// Default level-0 tile span in stream seconds (15 minutes).
pub const DEFAULT_BASE_TILE_SECS: f64 = 900.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TileKey {
    pub level: u8,
    pub index: usize,
}

impl TileKey {
    pub fn new(level: u8, index: usize) -> Self {
        Self { level, index }
    }

    pub fn parent(self) -> TileKey {
        TileKey::new(self.level + 1, self.index / 2)
    }

    pub fn sibling(self) -> TileKey {
        TileKey::new(self.level, self.index ^ 1)
    }
}

#[derive(Clone, Debug)]
pub struct SpectroTile {
    pub level: u8,
    pub index: usize,
    /// Nominal window bounds; tiles abut exactly on these.
    pub start_sec: f64,
    pub end_sec: f64,
    /// Center of the first FFT frame.
    pub actual_first_col_sec: f64,
    /// Center of the last FFT frame.
    pub actual_last_col_sec: f64,
    pub cols: usize,
    pub freq_bins: usize,
    /// Column-major quantized dB values (`cols × freq_bins`), bin 0 = DC.
    /// `None` once the CPU copy has been trimmed (texture is
    /// authoritative).
    pub magnitudes: Option<Vec<u8>>,
    pub ready: bool,
}

impl SpectroTile {
    pub fn placeholder(level: u8, index: usize, start_sec: f64, end_sec: f64, freq_bins: usize) -> Self {
        Self {
            level,
            index,
            start_sec,
            end_sec,
            actual_first_col_sec: start_sec,
            actual_last_col_sec: end_sec,
            cols: 0,
            freq_bins,
            magnitudes: None,
            ready: false,
        }
    }

    pub fn key(&self) -> TileKey {
        TileKey::new(self.level, self.index)
    }

    pub fn duration_sec(&self) -> f64 {
        self.end_sec - self.start_sec
    }

    pub fn magnitude(&self, col: usize, bin: usize) -> Option<u8> {
        let m = self.magnitudes.as_ref()?;
        if col >= self.cols || bin >= self.freq_bins {
            return None;
        }
        Some(m[col * self.freq_bins + bin])
    }

    /// Stream time at the center of column `col` (linear between the
    /// actual first and last column centers).
    pub fn col_center_sec(&self, col: usize) -> f64 {
        if self.cols <= 1 {
            return self.actual_first_col_sec;
        }
        let t = col as f64 / (self.cols - 1) as f64;
        self.actual_first_col_sec + t * (self.actual_last_col_sec - self.actual_first_col_sec)
    }

    /// Row-major 8-bit texture pixels, row 0 = highest frequency.
    pub fn texture_pixels(&self) -> Option<Vec<u8>> {
        let m = self.magnitudes.as_ref()?;
        if self.cols == 0 || self.freq_bins == 0 {
            return None;
        }
        let mut pixels = vec![0u8; self.cols * self.freq_bins];
        for col in 0..self.cols {
            for bin in 0..self.freq_bins {
                let row = self.freq_bins - 1 - bin;
                pixels[row * self.cols + col] = m[col * self.freq_bins + bin];
            }
        }
        Some(pixels)
    }
}

/// Frame layout for rendering one base tile.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileRenderSpec {
    /// Sample index where column 0's frame starts.
    pub start_sample: usize,
    pub hop: usize,
    pub col_count: usize,
    pub fft_size: usize,
}

impl TileRenderSpec {
    /// Frame layout for a base tile over `[start_sec, end_sec)`.
    ///
    /// The hop is chosen so [`TILE_COLS`] columns span the tile; the slice
    /// extends `fft_size/2` past the nominal end so the last frames have
    /// data. Returns `None` while the stream is too short for a single
    /// frame.
    pub fn for_base_tile(
        start_sec: f64,
        end_sec: f64,
        sample_rate: u32,
        fft_size: usize,
        available_samples: usize,
    ) -> Option<TileRenderSpec> {
        let rate = sample_rate as f64;
        let start_sample = (start_sec * rate).round() as usize;
        let end_sample = (end_sec * rate).round() as usize;
        let tile_samples = end_sample.saturating_sub(start_sample);
        if tile_samples == 0 {
            return None;
        }

        let hop = (tile_samples / TILE_COLS).max(1);
        let slice_end = (end_sample + fft_size / 2).min(available_samples);
        let len = slice_end.saturating_sub(start_sample);
        if len < fft_size {
            return None;
        }

        let col_count = ((len - fft_size) / hop).min(TILE_COLS).max(1);
        Some(TileRenderSpec {
            start_sample,
            hop,
            col_count,
            fft_size,
        })
    }

    /// Center of the first FFT frame, in stream seconds.
    pub fn actual_first_col_sec(&self, sample_rate: u32) -> f64 {
        (self.start_sample + self.fft_size / 2) as f64 / sample_rate as f64
    }

    /// Center of the last FFT frame, in stream seconds.
    pub fn actual_last_col_sec(&self, sample_rate: u32) -> f64 {
        (self.start_sample + (self.col_count - 1) * self.hop + self.fft_size / 2) as f64
            / sample_rate as f64
    }

    pub fn to_batch(self, id: usize, audio: &AudioStream, window: Window) -> FftBatch {
        FftBatch {
            id,
            audio: audio.samples.clone(),
            start_sample: self.start_sample,
            fft_size: self.fft_size,
            hop: self.hop,
            col_count: self.col_count,
            window,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_and_sibling_keys() {
        assert_eq!(TileKey::new(0, 5).parent(), TileKey::new(1, 2));
        assert_eq!(TileKey::new(0, 4).parent(), TileKey::new(1, 2));
        assert_eq!(TileKey::new(0, 4).sibling(), TileKey::new(0, 5));
        assert_eq!(TileKey::new(0, 5).sibling(), TileKey::new(0, 4));
    }

    #[test]
    fn base_spec_spans_tile() {
        let rate = 44_100;
        let fft = 2048;
        // Full 15-minute tile with plenty of audio available.
        let available = 46 * 60 * rate as usize;
        let spec = TileRenderSpec::for_base_tile(0.0, 900.0, rate, fft, available).unwrap();

        let tile_samples = 900 * rate as usize;
        assert_eq!(spec.hop, tile_samples / TILE_COLS);
        assert!(spec.col_count <= TILE_COLS);
        assert!(spec.col_count > TILE_COLS - 3, "cols = {}", spec.col_count);

        // Actual column centers sit half a window inside the nominal span.
        let first = spec.actual_first_col_sec(rate);
        assert!((first - (fft as f64 / 2.0) / rate as f64).abs() < 1e-9);
        let last = spec.actual_last_col_sec(rate);
        let hop_sec = spec.hop as f64 / rate as f64;
        assert!(last < 900.0 + fft as f64 / rate as f64);
        assert!(last > 900.0 - 3.0 * hop_sec, "last col at {last}");
    }

    #[test]
    fn short_tail_tile_gets_fewer_cols() {
        let rate = 44_100;
        // Only 60 seconds of a 900-second tile exist.
        let available = 60 * rate as usize;
        let spec = TileRenderSpec::for_base_tile(0.0, 900.0, rate, 2048, available).unwrap();
        assert!(spec.col_count < TILE_COLS / 10);
    }

    #[test]
    fn no_spec_until_one_frame_fits() {
        let rate = 44_100;
        assert!(TileRenderSpec::for_base_tile(0.0, 900.0, rate, 2048, 1000).is_none());
        assert!(TileRenderSpec::for_base_tile(0.0, 900.0, rate, 2048, 0).is_none());
    }

    #[test]
    fn texture_pixels_flip_rows() {
        let mut tile = SpectroTile::placeholder(0, 0, 0.0, 1.0, 3);
        tile.cols = 2;
        tile.ready = true;
        // col-major: col0 = [dc, mid, top], col1 = [10, 20, 30]
        tile.magnitudes = Some(vec![1, 2, 3, 10, 20, 30]);

        let px = tile.texture_pixels().unwrap();
        // Row 0 = highest frequency bin (index 2).
        assert_eq!(px, vec![3, 30, 2, 20, 1, 10]);
        assert_eq!(tile.magnitude(1, 0), Some(10));
        assert_eq!(tile.magnitude(2, 0), None);
    }

    #[test]
    fn col_center_interpolates() {
        let mut tile = SpectroTile::placeholder(0, 0, 0.0, 10.0, 4);
        tile.cols = 3;
        tile.actual_first_col_sec = 1.0;
        tile.actual_last_col_sec = 9.0;
        assert_eq!(tile.col_center_sec(0), 1.0);
        assert_eq!(tile.col_center_sec(1), 5.0);
        assert_eq!(tile.col_center_sec(2), 9.0);
    }
}
