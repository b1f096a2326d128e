use std::sync::Arc;

/// The assembled playback-rate sample stream. Shared read-only between the
/// waveform builder, the FFT pool, and renderers once segments land.
#[derive(Clone, Debug)]
pub struct AudioStream {
    pub samples: Arc<Vec<f32>>,
    pub sample_rate: u32,
}

impl AudioStream {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: Arc::new(samples),
            sample_rate,
        }
    }

    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// One decoded plan segment: unit-range samples for playback plus the
/// raw-unit stream the waveform builder needs for DC removal. Both are at
/// the playback rate.
#[derive(Clone, Debug)]
pub struct DecodedSegment {
    /// Position in the fetch plan; segments may arrive out of order and
    /// are reordered by this index before emission.
    pub plan_index: usize,
    pub normalized: Vec<f32>,
    pub raw: Vec<f32>,
}

impl DecodedSegment {
    pub fn len(&self) -> usize {
        self.normalized.len()
    }

    pub fn is_empty(&self) -> bool {
        self.normalized.is_empty()
    }
}
