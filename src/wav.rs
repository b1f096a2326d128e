//! WAV export of the assembled stream.

use std::path::Path;

use hound::{SampleFormat, WavSpec, WavWriter};
use seistream_core::AudioStream;

use crate::error::Result;

/// Write the normalized playback-rate stream as 32-bit float mono WAV.
pub fn export_wav(path: &Path, stream: &AudioStream) -> Result<()> {
    let spec = WavSpec {
        channels: 1,
        sample_rate: stream.sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(path, spec)?;
    for &s in stream.samples.iter() {
        writer.write_sample(s)?;
    }
    writer.finalize()?;
    Ok(())
}
