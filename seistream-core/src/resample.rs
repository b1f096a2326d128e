//! Source-rate to playback-rate conversion.
//!
//! One `Resampler` is built per fetch plan so every segment shares the same
//! ratio and segment boundaries land on integer playback indices. The index
//! mapping is the contract other components rely on: source sample `k`
//! lives at playback index `round(k · Rp / R0)`.

/// Bidirectional mapping between source sample indices and playback
/// indices.
#[derive(Clone, Copy, Debug)]
pub struct RateMap {
    pub source_rate: u32,
    pub playback_rate: u32,
}

impl RateMap {
    pub fn new(source_rate: u32, playback_rate: u32) -> Self {
        Self {
            source_rate,
            playback_rate,
        }
    }

    pub fn ratio(&self) -> f64 {
        self.playback_rate as f64 / self.source_rate as f64
    }

    /// Playback index of the k-th source sample.
    pub fn playback_index(&self, k: u64) -> u64 {
        (k as f64 * self.ratio()).round() as u64
    }

    /// Source sample whose playback position contains playback index `i`.
    pub fn source_index(&self, i: u64) -> u64 {
        (i as f64 / self.ratio()).floor() as u64
    }
}

/// Plan-wide resampler: linear interpolation at a fixed ratio.
#[derive(Clone, Copy, Debug)]
pub struct Resampler {
    map: RateMap,
}

impl Resampler {
    pub fn new(source_rate: u32, playback_rate: u32) -> Self {
        Self {
            map: RateMap::new(source_rate, playback_rate),
        }
    }

    pub fn map(&self) -> RateMap {
        self.map
    }

    /// Output length for a segment of `len` source samples starting at
    /// cumulative source offset `source_offset`.
    pub fn output_len(&self, source_offset: u64, len: u64) -> usize {
        (self.map.playback_index(source_offset + len) - self.map.playback_index(source_offset))
            as usize
    }

    /// Resample one segment. `source_offset` is the number of source
    /// samples before this segment in the plan; using it keeps adjacent
    /// segment outputs exactly abutting in playback index space.
    pub fn resample(&self, input: &[f32], source_offset: u64) -> Vec<f32> {
        if self.map.source_rate == self.map.playback_rate {
            return input.to_vec();
        }
        if input.is_empty() {
            return Vec::new();
        }

        let out_start = self.map.playback_index(source_offset);
        let out_len = self.output_len(source_offset, input.len() as u64);
        let inv_ratio = 1.0 / self.map.ratio();

        let mut out = Vec::with_capacity(out_len);
        for i in 0..out_len {
            // Absolute source position of this playback index, relative to
            // the segment start.
            let pos = (out_start + i as u64) as f64 * inv_ratio - source_offset as f64;
            let base = pos.floor();
            let frac = (pos - base) as f32;
            let i0 = (base.max(0.0) as usize).min(input.len() - 1);
            let i1 = (i0 + 1).min(input.len() - 1);
            out.push(input[i0] + (input[i1] - input[i0]) * frac);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_contract() {
        let map = RateMap::new(100, 44_100);
        assert_eq!(map.playback_index(0), 0);
        assert_eq!(map.playback_index(1), 441);
        assert_eq!(map.playback_index(100), 44_100);
        assert_eq!(map.source_index(441), 1);
        assert_eq!(map.source_index(440), 0);
    }

    #[test]
    fn identity_when_rates_match() {
        let rs = Resampler::new(44_100, 44_100);
        let input = vec![0.1, -0.2, 0.3];
        assert_eq!(rs.resample(&input, 1000), input);
    }

    #[test]
    fn segments_abut_in_playback_space() {
        let rs = Resampler::new(100, 44_100);
        let a = rs.resample(&vec![0.0; 600], 0);
        let b = rs.resample(&vec![0.0; 600], 600);
        assert_eq!(a.len(), rs.output_len(0, 600));
        assert_eq!(
            a.len() as u64,
            rs.map().playback_index(600),
        );
        assert_eq!(
            (a.len() + b.len()) as u64,
            rs.map().playback_index(1200),
        );
    }

    #[test]
    fn upsampling_interpolates_linearly() {
        // 2 Hz -> 4 Hz doubles the sample count with midpoints in between.
        let rs = Resampler::new(2, 4);
        let out = rs.resample(&[0.0, 1.0], 0);
        assert_eq!(out.len(), 4);
        assert!((out[0] - 0.0).abs() < 1e-6);
        assert!((out[1] - 0.5).abs() < 1e-6);
        assert!((out[2] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn downsampling_preserves_duration() {
        let rs = Resampler::new(200, 100);
        let out = rs.resample(&vec![0.5; 1000], 0);
        assert_eq!(out.len(), 500);
        assert!(out.iter().all(|&s| (s - 0.5).abs() < 1e-6));
    }
}
