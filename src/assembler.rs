//! Stream assembler: ordered segment emission into the audio sink.
//!
//! Segments arrive in whatever order their fetches complete; the sink is
//! fed strictly in plan order. The first emission starts playback
//! immediately with a short amplitude ramp so the onset does not click;
//! wall-clock from request to that first frame is the TTFA metric.

use std::collections::HashMap;
use std::time::Duration;

use log::{debug, warn};
use seistream_core::{AudioStream, DecodedSegment};

use crate::sink::AudioSink;

/// Samples per frame handed to the sink.
pub const FRAME_SAMPLES: usize = 1024;

/// Onset amplitude ramp length.
pub const ONSET_RAMP: Duration = Duration::from_millis(50);

/// How long `finalize` waits for the sink to absorb the stream before
/// giving up and publishing anyway.
const ABSORB_DEADLINE: Duration = Duration::from_secs(10);

pub struct StreamAssembler {
    expected_segments: usize,
    playback_rate: u32,
    next_to_emit: usize,
    pending: HashMap<usize, DecodedSegment>,
    /// Accumulated normalized stream (playback order).
    samples: Vec<f32>,
    /// Accumulated raw-unit stream for the waveform builder.
    raw: Vec<f32>,
    started: bool,
}

impl StreamAssembler {
    pub fn new(expected_segments: usize, playback_rate: u32) -> Self {
        Self {
            expected_segments,
            playback_rate,
            next_to_emit: 0,
            pending: HashMap::new(),
            samples: Vec::new(),
            raw: Vec::new(),
            started: false,
        }
    }

    pub fn next_to_emit(&self) -> usize {
        self.next_to_emit
    }

    /// All expected segments have been emitted to the sink.
    pub fn is_complete(&self) -> bool {
        self.next_to_emit >= self.expected_segments
    }

    /// Normalized samples accumulated so far (grows in emission order).
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn raw(&self) -> &[f32] {
        &self.raw
    }

    /// Store segment `k`; emit it and any directly following pending
    /// segments in order. Returns how many segments were emitted by this
    /// call.
    pub fn accept(&mut self, segment: DecodedSegment, sink: &mut impl AudioSink) -> usize {
        if segment.plan_index < self.next_to_emit {
            warn!("duplicate segment {} ignored", segment.plan_index);
            return 0;
        }
        self.pending.insert(segment.plan_index, segment);

        let mut emitted = 0;
        while let Some(seg) = self.pending.remove(&self.next_to_emit) {
            self.emit(seg, sink);
            self.next_to_emit += 1;
            emitted += 1;
        }
        emitted
    }

    fn emit(&mut self, seg: DecodedSegment, sink: &mut impl AudioSink) {
        let mut normalized = seg.normalized;

        if !self.started {
            // Ramp the opening samples from near-zero so playback starts
            // without a click, then start the sink right away.
            let ramp_len = ((ONSET_RAMP.as_secs_f64() * self.playback_rate as f64) as usize)
                .min(normalized.len());
            for (i, s) in normalized.iter_mut().take(ramp_len).enumerate() {
                *s *= i as f32 / ramp_len as f32;
            }
            debug!("first segment emitted; starting sink ({ramp_len}-sample ramp)");
        }

        for frame in normalized.chunks(FRAME_SAMPLES) {
            sink.push_frame(frame);
        }
        if !self.started {
            sink.start_immediately();
            self.started = true;
        }

        self.samples.extend_from_slice(&normalized);
        self.raw.extend_from_slice(&seg.raw);
    }

    /// Signal `data-complete`, wait for the sink to absorb the full
    /// stream, and publish the final buffer.
    pub async fn finalize(self, sink: &mut impl AudioSink) -> AudioStream {
        let total = self.samples.len() as u64;
        sink.data_complete(total);

        let deadline = tokio::time::Instant::now() + ABSORB_DEADLINE;
        loop {
            let status = sink.buffer_status();
            if status.total_samples_written >= total {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    "sink absorbed only {}/{total} samples before deadline; publishing anyway",
                    status.total_samples_written,
                );
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        AudioStream::new(self.samples, self.playback_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;

    fn segment(plan_index: usize, value: f32, len: usize) -> DecodedSegment {
        DecodedSegment {
            plan_index,
            normalized: vec![value; len],
            raw: vec![value * 1000.0; len],
        }
    }

    #[test]
    fn out_of_order_segments_emit_in_order() {
        let mut asm = StreamAssembler::new(3, 44_100);
        let mut sink = MemorySink::new();

        assert_eq!(asm.accept(segment(2, 0.3, 100), &mut sink), 0);
        assert_eq!(asm.accept(segment(1, 0.2, 100), &mut sink), 0);
        assert!(!sink.started());

        // Segment 0 unblocks everything, in order.
        assert_eq!(asm.accept(segment(0, 0.1, 100), &mut sink), 3);
        assert!(asm.is_complete());
        assert!(sink.started());

        let s = sink.samples();
        assert_eq!(s.len(), 300);
        // Values appear in plan order (segment 0 carries the onset ramp).
        assert_eq!(s[0], 0.0);
        assert!((s[99] - 0.1 * 99.0 / 100.0).abs() < 1e-6);
        assert_eq!(s[150], 0.2);
        assert_eq!(s[250], 0.3);
    }

    #[test]
    fn onset_ramp_suppresses_click() {
        let mut asm = StreamAssembler::new(1, 44_100);
        let mut sink = MemorySink::new();
        asm.accept(segment(0, 1.0, 44_100), &mut sink);

        let s = sink.samples();
        // 50 ms at 44.1 kHz = 2205 ramp samples.
        assert_eq!(s[0], 0.0);
        assert!(s[1000] < 0.5);
        assert_eq!(s[2205], 1.0);
        assert_eq!(s[44_099], 1.0);
    }

    #[test]
    fn sink_started_on_first_emission_only() {
        let mut asm = StreamAssembler::new(2, 44_100);
        let mut sink = MemorySink::new();

        asm.accept(segment(1, 0.2, 10), &mut sink);
        assert!(!sink.started(), "start must wait for segment 0");
        asm.accept(segment(0, 0.1, 10), &mut sink);
        assert!(sink.started());
    }

    #[test]
    fn duplicate_segment_is_ignored() {
        let mut asm = StreamAssembler::new(2, 44_100);
        let mut sink = MemorySink::new();
        asm.accept(segment(0, 0.5, 10), &mut sink);
        assert_eq!(asm.accept(segment(0, 0.9, 10), &mut sink), 0);
        assert_eq!(asm.samples().len(), 10);
    }

    #[tokio::test]
    async fn finalize_publishes_after_absorb() {
        let mut asm = StreamAssembler::new(1, 8000);
        let mut sink = MemorySink::new();
        asm.accept(segment(0, 0.25, 2048), &mut sink);

        let stream = asm.finalize(&mut sink).await;
        assert_eq!(stream.len(), 2048);
        assert_eq!(stream.sample_rate, 8000);
        assert_eq!(sink.completed_total(), Some(2048));
    }

    #[test]
    fn raw_stream_accumulates_for_waveform() {
        let mut asm = StreamAssembler::new(1, 44_100);
        let mut sink = MemorySink::new();
        asm.accept(segment(0, 0.5, 4), &mut sink);
        assert_eq!(asm.raw(), &[500.0, 500.0, 500.0, 500.0]);
    }
}
