//! Min/max waveform envelope.
//!
//! One column per output pixel; column `c` summarizes samples
//! `[⌊cN/W⌋, ⌊(c+1)N/W⌋)`. The builder recomputes only the columns a new
//! segment touches, so a growing stream stays cheap to keep current.

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EnvelopeColumn {
    pub min: f32,
    pub max: f32,
}

impl EnvelopeColumn {
    const EMPTY: EnvelopeColumn = EnvelopeColumn { min: 0.0, max: 0.0 };
}

/// Compute a full envelope in one pass.
pub fn envelope(samples: &[f32], width: usize) -> Vec<EnvelopeColumn> {
    let mut builder = WaveformBuilder::new(samples.len(), width);
    builder.extend(samples, 0);
    builder.into_columns()
}

/// Incremental envelope over a stream with a known final length.
pub struct WaveformBuilder {
    /// Expected final sample count N (column ranges are fixed up front).
    total_samples: usize,
    width: usize,
    columns: Vec<EnvelopeColumn>,
    /// How many leading samples have been folded in so far.
    covered: usize,
}

impl WaveformBuilder {
    pub fn new(total_samples: usize, width: usize) -> Self {
        Self {
            total_samples,
            width,
            columns: vec![EnvelopeColumn::EMPTY; width],
            covered: 0,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn columns(&self) -> &[EnvelopeColumn] {
        &self.columns
    }

    pub fn into_columns(self) -> Vec<EnvelopeColumn> {
        self.columns
    }

    /// First sample index of column `c`.
    fn column_start(&self, c: usize) -> usize {
        c * self.total_samples / self.width
    }

    /// Fold in `samples`, the full stream prefix up to `prefix_len`
    /// (`samples.len() >= prefix_len`), where everything before
    /// `self.covered` was already folded. Only affected columns are
    /// recomputed.
    pub fn extend(&mut self, samples: &[f32], _from: usize) {
        let prefix_len = samples.len().min(self.total_samples);
        if self.width == 0 || self.total_samples == 0 || prefix_len <= self.covered {
            return;
        }

        let first_col = self.covered * self.width / self.total_samples;
        let last_col = ((prefix_len - 1) * self.width / self.total_samples).min(self.width - 1);

        for c in first_col..=last_col {
            let lo = self.column_start(c);
            let hi = self.column_start(c + 1).min(prefix_len);
            if lo >= hi {
                self.columns[c] = EnvelopeColumn::EMPTY;
                continue;
            }
            let mut min = f32::MAX;
            let mut max = f32::MIN;
            for &s in &samples[lo..hi] {
                if s < min {
                    min = s;
                }
                if s > max {
                    max = s;
                }
            }
            self.columns[c] = EnvelopeColumn { min, max };
        }
        self.covered = prefix_len;
    }
}

/// First-order IIR DC-removal filter: `y[n] = x[n] − x[n−1] + α·y[n−1]`.
/// `alpha` close to 1.0 preserves more low-frequency content.
pub fn dc_remove(input: &[f32], alpha: f32) -> Vec<f32> {
    let alpha = alpha.clamp(0.9, 0.999);
    let mut out = Vec::with_capacity(input.len());
    let mut prev_x = 0.0f32;
    let mut prev_y = 0.0f32;
    for &x in input {
        let y = x - prev_x + alpha * prev_y;
        out.push(y);
        prev_x = x;
        prev_y = y;
    }
    out
}
