//! Short-time Fourier transform kernels.
//!
//! Plans and window tables are cached per `Stft` instance; the worker pool
//! gives each worker its own instance so no locking is needed on the hot
//! path.

use std::collections::HashMap;
use std::sync::Arc;

use realfft::{RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};

/// Quantization floor in dB; values at or below map to 0.
pub const DB_FLOOR: f32 = -100.0;
/// Quantization range in dB; `DB_FLOOR + DB_RANGE` maps to 255.
pub const DB_RANGE: f32 = 100.0;

/// Window function applied to each FFT frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Window {
    #[default]
    Hann,
    Hamming,
    Blackman,
}

impl Window {
    pub fn generate(self, size: usize) -> Vec<f32> {
        let n = (size.max(2) - 1) as f32;
        (0..size)
            .map(|i| {
                let x = i as f32 / n;
                match self {
                    Window::Hann => 0.5 * (1.0 - (2.0 * std::f32::consts::PI * x).cos()),
                    Window::Hamming => 0.54 - 0.46 * (2.0 * std::f32::consts::PI * x).cos(),
                    Window::Blackman => {
                        0.42 - 0.5 * (2.0 * std::f32::consts::PI * x).cos()
                            + 0.08 * (4.0 * std::f32::consts::PI * x).cos()
                    }
                }
            })
            .collect()
    }
}

/// Quantize a linear magnitude to 8-bit dB.
#[inline]
pub fn quantize_db(mag: f32) -> u8 {
    if mag <= 0.0 {
        return 0;
    }
    let db = 20.0 * mag.log10();
    let clamped = db.max(DB_FLOOR).min(DB_FLOOR + DB_RANGE);
    (((clamped - DB_FLOOR) / DB_RANGE) * 255.0) as u8
}

pub struct Stft {
    planner: RealFftPlanner<f32>,
    plans: HashMap<usize, Arc<dyn RealToComplex<f32>>>,
    windows: HashMap<(Window, usize), Arc<Vec<f32>>>,
}

impl Default for Stft {
    fn default() -> Self {
        Self::new()
    }
}

impl Stft {
    pub fn new() -> Self {
        Self {
            planner: RealFftPlanner::new(),
            plans: HashMap::new(),
            windows: HashMap::new(),
        }
    }

    fn plan(&mut self, fft_size: usize) -> Arc<dyn RealToComplex<f32>> {
        self.plans
            .entry(fft_size)
            .or_insert_with(|| self.planner.plan_fft_forward(fft_size))
            .clone()
    }

    fn window(&mut self, window: Window, fft_size: usize) -> Arc<Vec<f32>> {
        self.windows
            .entry((window, fft_size))
            .or_insert_with(|| Arc::new(window.generate(fft_size)))
            .clone()
    }

    /// Compute quantized magnitude columns.
    ///
    /// Column `k` covers samples `[start + k·hop, start + k·hop + fft_size)`
    /// of `samples`; frames that would run past the end are dropped, so the
    /// result may hold fewer than `col_count` columns. Each column has
    /// `fft_size/2 + 1` bins, bin 0 = DC.
    pub fn columns(
        &mut self,
        samples: &[f32],
        start: usize,
        fft_size: usize,
        hop: usize,
        window: Window,
        col_count: usize,
    ) -> Vec<Vec<u8>> {
        if samples.len() < fft_size || col_count == 0 || hop == 0 {
            return Vec::new();
        }
        let fft = self.plan(fft_size);
        let win = self.window(window, fft_size);

        let mut input = fft.make_input_vec();
        let mut spectrum = fft.make_output_vec();
        let mut columns = Vec::with_capacity(col_count);

        for k in 0..col_count {
            let pos = start + k * hop;
            if pos + fft_size > samples.len() {
                break;
            }
            for (inp, (&s, &w)) in input
                .iter_mut()
                .zip(samples[pos..pos + fft_size].iter().zip(win.iter()))
            {
                *inp = s * w;
            }
            if fft.process(&mut input, &mut spectrum).is_err() {
                break;
            }
            columns.push(spectrum.iter().map(|c| quantize_db(c.norm())).collect());
        }
        columns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hann_window_shape() {
        let w = Window::Hann.generate(1024);
        assert_eq!(w.len(), 1024);
        assert!(w[0] < 0.01);
        assert!(w[1023] < 0.01);
        assert!(w[512] > 0.9);
    }

    #[test]
    fn quantization_endpoints() {
        assert_eq!(quantize_db(0.0), 0);
        assert_eq!(quantize_db(1e-6), 0); // -120 dB, below floor
        assert_eq!(quantize_db(1.0), 255); // 0 dB
        // -50 dB sits mid-range
        let mid = quantize_db(10f32.powf(-50.0 / 20.0));
        assert!((126..=129).contains(&mid));
    }

    #[test]
    fn sine_peaks_at_expected_bin() {
        let sample_rate = 44_100.0f32;
        let freq = 1000.0f32;
        let samples: Vec<f32> = (0..8192)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate).sin())
            .collect();

        let mut stft = Stft::new();
        let cols = stft.columns(&samples, 0, 1024, 512, Window::Hann, 4);
        assert_eq!(cols.len(), 4);
        assert_eq!(cols[0].len(), 513);

        let col = &cols[1];
        let peak_bin = col
            .iter()
            .enumerate()
            .max_by_key(|(_, &v)| v)
            .unwrap()
            .0;
        let freq_resolution = sample_rate / 1024.0;
        let peak_freq = peak_bin as f32 * freq_resolution;
        assert!(
            (peak_freq - freq).abs() < freq_resolution * 2.0,
            "peak at {peak_freq} Hz, expected ~{freq} Hz",
        );
    }

    #[test]
    fn truncates_at_buffer_end() {
        let samples = vec![0.0f32; 2000];
        let mut stft = Stft::new();
        // Only (2000 - 1024) / 512 + 1 = 2 full frames fit.
        let cols = stft.columns(&samples, 0, 1024, 512, Window::Hann, 10);
        assert_eq!(cols.len(), 2);
    }
}
