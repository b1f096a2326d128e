//! Color maps for spectrogram display.
//!
//! Tiles store quantized 8-bit dB values; color is applied when pixels hit
//! the surface. `zero_color` is what the renderer paints where no signal
//! content exists (e.g. the revealed top band when playback is slowed).

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Colormap {
    #[default]
    Viridis,
    Inferno,
    Grayscale,
}

impl Colormap {
    /// Map an 8-bit intensity to RGBA.
    pub fn map(self, v: u8) -> [u8; 4] {
        let t = v as f32 / 255.0;
        let [r, g, b] = match self {
            Colormap::Viridis => viridis(t),
            Colormap::Inferno => inferno(t),
            Colormap::Grayscale => [t, t, t],
        };
        [
            (r * 255.0) as u8,
            (g * 255.0) as u8,
            (b * 255.0) as u8,
            255,
        ]
    }

    /// Color of zero intensity, used to fill regions with no content.
    pub fn zero_color(self) -> [u8; 4] {
        self.map(0)
    }

    /// 256-entry RGBA lookup table for bulk colorization.
    pub fn lut(self) -> [[u8; 4]; 256] {
        let mut lut = [[0u8; 4]; 256];
        for (i, entry) in lut.iter_mut().enumerate() {
            *entry = self.map(i as u8);
        }
        lut
    }
}

fn viridis(t: f32) -> [f32; 3] {
    let r = 0.267 + t * (0.993 - 0.267);
    let g = if t < 0.5 {
        0.004 + t * 2.0 * (0.507 - 0.004)
    } else {
        0.507 + (t - 0.5) * 2.0 * (0.906 - 0.507)
    };
    let b = 0.329 + t * 0.1 * (1.0 - t) * 4.0;
    [r.min(1.0), g.min(1.0), b.min(1.0)]
}

fn inferno(t: f32) -> [f32; 3] {
    let r = t.powf(0.5);
    let g = t * t * 0.8;
    let b = 0.4 * (1.0 - t);
    [r.min(1.0), g.min(1.0), b.min(1.0)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_are_monotone_enough() {
        // Brightness should broadly increase with intensity.
        for map in [Colormap::Viridis, Colormap::Inferno, Colormap::Grayscale] {
            let lo = map.map(10);
            let hi = map.map(250);
            let sum = |c: [u8; 4]| c[0] as u32 + c[1] as u32 + c[2] as u32;
            assert!(sum(hi) > sum(lo), "{map:?} not brighter at high intensity");
        }
    }

    #[test]
    fn zero_color_matches_lut() {
        let map = Colormap::Viridis;
        assert_eq!(map.zero_color(), map.lut()[0]);
    }

    #[test]
    fn alpha_is_opaque() {
        assert_eq!(Colormap::Inferno.map(128)[3], 255);
    }
}
