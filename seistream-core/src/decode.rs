//! Chunk decoding: decompress, parse, normalize, resample.
//!
//! Chunk bodies are a compressed stream of little-endian i32 samples at the
//! manifest's sample rate. The codec is identified by magic bytes (zstd or
//! gzip), mirroring how file loaders sniff container headers.

use std::io::Read;

use thiserror::Error;

use crate::resample::Resampler;
use crate::types::DecodedSegment;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("decode failed: {0}")]
    DecodeFailed(String),

    #[error("unexpected length: expected {expected} samples, got {got}")]
    UnexpectedLength { expected: u64, got: u64 },
}

const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Decompress a chunk body. Codec is sniffed from the leading bytes.
pub fn decompress(bytes: &[u8]) -> Result<Vec<u8>, DecodeError> {
    if bytes.len() >= 4 && bytes[..4] == ZSTD_MAGIC {
        zstd::stream::decode_all(bytes).map_err(|e| DecodeError::DecodeFailed(format!("zstd: {e}")))
    } else if bytes.len() >= 2 && bytes[..2] == GZIP_MAGIC {
        let mut out = Vec::new();
        flate2::read::GzDecoder::new(bytes)
            .read_to_end(&mut out)
            .map_err(|e| DecodeError::DecodeFailed(format!("gzip: {e}")))?;
        Ok(out)
    } else {
        Err(DecodeError::DecodeFailed(
            "unknown compression (expected zstd or gzip)".into(),
        ))
    }
}

/// Parse decompressed bytes as little-endian i32 samples.
fn parse_samples(bytes: &[u8]) -> Result<Vec<i32>, DecodeError> {
    if bytes.len() % 4 != 0 {
        return Err(DecodeError::DecodeFailed(format!(
            "body length {} is not a multiple of 4",
            bytes.len(),
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

/// Rescale a raw sample into [-1, 1] against the plan's normalization
/// range. A degenerate range yields zeros.
#[inline]
pub fn normalize_sample(x: i32, min: i32, max: i32) -> f32 {
    if max == min {
        return 0.0;
    }
    let y = 2.0 * (x - min) as f64 / (max - min) as f64 - 1.0;
    y.clamp(-1.0, 1.0) as f32
}

/// Decode one fetched chunk into a plan segment.
///
/// `source_offset` is the cumulative source-sample count of all plan
/// entries before this one; the shared resampler uses it to keep segment
/// boundaries on integer playback indices.
pub fn decode_segment(
    bytes: &[u8],
    norm_min: i32,
    norm_max: i32,
    plan_index: usize,
    expected_samples: u64,
    resampler: &Resampler,
    source_offset: u64,
) -> Result<DecodedSegment, DecodeError> {
    let body = decompress(bytes)?;
    let raw_ints = parse_samples(&body)?;

    let got = raw_ints.len() as u64;
    if got.abs_diff(expected_samples) > 1 {
        return Err(DecodeError::UnexpectedLength {
            expected: expected_samples,
            got,
        });
    }

    let raw: Vec<f32> = raw_ints.iter().map(|&x| x as f32).collect();
    let normalized: Vec<f32> = raw_ints
        .iter()
        .map(|&x| normalize_sample(x, norm_min, norm_max))
        .collect();

    // Resample both streams with the same mapping so waveform (raw) and
    // audio (normalized) indices stay aligned. Use the nominal expected
    // count for the mapping so a one-sample deviation cannot shift every
    // later segment.
    let normalized = resample_to_nominal(resampler, &normalized, source_offset, expected_samples);
    let raw = resample_to_nominal(resampler, &raw, source_offset, expected_samples);

    Ok(DecodedSegment {
        plan_index,
        normalized,
        raw,
    })
}

/// A segment of silence for a gap or failed chunk.
pub fn silent_segment(
    plan_index: usize,
    expected_samples: u64,
    resampler: &Resampler,
    source_offset: u64,
) -> DecodedSegment {
    let len = resampler.output_len(source_offset, expected_samples);
    DecodedSegment {
        plan_index,
        normalized: vec![0.0; len],
        raw: vec![0.0; len],
    }
}

fn resample_to_nominal(
    resampler: &Resampler,
    input: &[f32],
    source_offset: u64,
    nominal_len: u64,
) -> Vec<f32> {
    let mut out = resampler.resample(input, source_offset);
    let want = resampler.output_len(source_offset, nominal_len);
    // Off-by-one input tolerance: pad or trim to the nominal grid.
    match out.len().cmp(&want) {
        std::cmp::Ordering::Less => out.resize(want, *out.last().unwrap_or(&0.0)),
        std::cmp::Ordering::Greater => out.truncate(want),
        std::cmp::Ordering::Equal => {}
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn gzip_body(samples: &[i32]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(samples.len() * 4);
        for s in samples {
            bytes.extend_from_slice(&s.to_le_bytes());
        }
        let mut enc = GzEncoder::new(Vec::new(), Compression::fast());
        enc.write_all(&bytes).unwrap();
        enc.finish().unwrap()
    }

    fn zstd_body(samples: &[i32]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(samples.len() * 4);
        for s in samples {
            bytes.extend_from_slice(&s.to_le_bytes());
        }
        zstd::stream::encode_all(&bytes[..], 1).unwrap()
    }

    fn identity_resampler() -> Resampler {
        Resampler::new(100, 100)
    }

    #[test]
    fn normalization_formula() {
        // min -1000, max 3000: raw -500 -> 2*(500)/4000 - 1 = -0.75
        assert_eq!(normalize_sample(-500, -1000, 3000), -0.75);
        assert_eq!(normalize_sample(-1000, -1000, 3000), -1.0);
        assert_eq!(normalize_sample(3000, -1000, 3000), 1.0);
        // Out-of-range values clamp.
        assert_eq!(normalize_sample(9000, -1000, 3000), 1.0);
        // Degenerate range yields zeros.
        assert_eq!(normalize_sample(7, 7, 7), 0.0);
    }

    #[test]
    fn decodes_gzip_chunk() {
        let samples = [-1000, -500, 0, 3000];
        let body = gzip_body(&samples);
        let seg =
            decode_segment(&body, -1000, 3000, 2, 4, &identity_resampler(), 0).unwrap();

        assert_eq!(seg.plan_index, 2);
        assert_eq!(seg.raw, vec![-1000.0, -500.0, 0.0, 3000.0]);
        assert_eq!(seg.normalized[0], -1.0);
        assert_eq!(seg.normalized[1], -0.75);
        assert_eq!(seg.normalized[3], 1.0);
    }

    #[test]
    fn decodes_zstd_chunk() {
        let samples = [1, 2, 3];
        let body = zstd_body(&samples);
        let seg = decode_segment(&body, 0, 4, 0, 3, &identity_resampler(), 0).unwrap();
        assert_eq!(seg.raw, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn rejects_unknown_codec() {
        let err = decompress(b"PLAIN-DATA").unwrap_err();
        assert!(matches!(err, DecodeError::DecodeFailed(_)));
    }

    #[test]
    fn length_tolerance_is_one_sample() {
        let body = gzip_body(&[0; 9]);
        // expected 10, got 9: within tolerance
        assert!(decode_segment(&body, -1, 1, 0, 10, &identity_resampler(), 0).is_ok());
        // expected 12, got 9: out of tolerance
        let err = decode_segment(&body, -1, 1, 0, 12, &identity_resampler(), 0).unwrap_err();
        assert!(matches!(err, DecodeError::UnexpectedLength { expected: 12, got: 9 }));
    }

    #[test]
    fn short_chunk_padded_to_nominal_grid() {
        let rs = Resampler::new(100, 44_100);
        let body = gzip_body(&vec![5; 599]); // one short of 600
        let seg = decode_segment(&body, -10, 10, 0, 600, &rs, 0).unwrap();
        assert_eq!(seg.normalized.len(), rs.output_len(0, 600));
    }

    #[test]
    fn silence_matches_nominal_grid() {
        let rs = Resampler::new(100, 44_100);
        let seg = silent_segment(3, 600, &rs, 1200);
        assert_eq!(seg.normalized.len(), rs.output_len(1200, 600));
        assert!(seg.normalized.iter().all(|&s| s == 0.0));
    }
}
