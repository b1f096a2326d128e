//! Audio sink contract.
//!
//! The engine never talks to an audio device; it hands fixed-size frames
//! to whatever implements [`AudioSink`] and polls the buffer status after
//! `data_complete` to know when the stream has been absorbed.

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BufferStatus {
    /// Samples currently queued inside the sink.
    pub samples_in_buffer: u64,
    /// Total samples the sink has accepted since the stream started.
    pub total_samples_written: u64,
}

pub trait AudioSink: Send {
    /// Accept one fixed-length frame of normalized samples.
    fn push_frame(&mut self, frame: &[f32]);

    /// Begin playback now, with whatever is buffered.
    fn start_immediately(&mut self);

    /// The stream is finished; `total_samples` is the final length.
    fn data_complete(&mut self, total_samples: u64);

    fn buffer_status(&self) -> BufferStatus;
}

/// Sink that absorbs everything into memory. Used by tests and by offline
/// export paths where no device exists.
#[derive(Default)]
pub struct MemorySink {
    samples: Vec<f32>,
    started: bool,
    completed_total: Option<u64>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn started(&self) -> bool {
        self.started
    }

    pub fn completed_total(&self) -> Option<u64> {
        self.completed_total
    }
}

impl AudioSink for MemorySink {
    fn push_frame(&mut self, frame: &[f32]) {
        self.samples.extend_from_slice(frame);
    }

    fn start_immediately(&mut self) {
        self.started = true;
    }

    fn data_complete(&mut self, total_samples: u64) {
        self.completed_total = Some(total_samples);
    }

    fn buffer_status(&self) -> BufferStatus {
        BufferStatus {
            samples_in_buffer: 0,
            total_samples_written: self.samples.len() as u64,
        }
    }
}
