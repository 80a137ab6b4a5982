//! # Channel Downmix and Sample-Rate Conversion
//!
//! Both operations work packet by packet so the transcoder never has to hold the whole
//! audio resource in memory.

/// Average interleaved frames down to a single channel.
///
/// ## Parameters:
/// - **interleaved**: samples as `[L, R, L, R, ...]` (any channel count)
/// - **channels**: number of interleaved channels; 0 or 1 returns the input unchanged
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }

    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Streaming linear-interpolation resampler for mono audio.
///
/// ## How it works:
/// Output sample `n` sits at input position `n * step`, where `step = from / to`.
/// Each output value is interpolated between the two neighbouring input samples. The
/// last input sample of every block is carried into the next call so interpolation is
/// continuous across packet boundaries, and the fractional read position is kept as
/// an offset from that carried sample.
///
/// Splitting the input into blocks does not change the output.
#[derive(Debug, Clone)]
pub struct LinearResampler {
    step: f64,
    /// Read position, relative to `last` when `last` is set
    position: f64,
    last: Option<f32>,
}

impl LinearResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        Self {
            step: from_rate as f64 / to_rate as f64,
            position: 0.0,
            last: None,
        }
    }

    fn is_passthrough(&self) -> bool {
        (self.step - 1.0).abs() < f64::EPSILON
    }

    /// Resample one block of input.
    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        if input.is_empty() {
            return Vec::new();
        }
        if self.is_passthrough() {
            return input.to_vec();
        }

        let mut window = Vec::with_capacity(input.len() + 1);
        if let Some(last) = self.last {
            window.push(last);
        }
        window.extend_from_slice(input);

        let mut output = Vec::with_capacity((input.len() as f64 / self.step) as usize + 1);
        let last_index = window.len() - 1;

        while (self.position as usize) < last_index {
            let index = self.position as usize;
            let frac = (self.position - index as f64) as f32;
            let a = window[index];
            let b = window[index + 1];
            output.push(a + (b - a) * frac);
            self.position += self.step;
        }

        self.position -= last_index as f64;
        self.last = Some(window[last_index]);
        output
    }

    /// Emit the final sample if the read position landed exactly on it.
    pub fn flush(&mut self) -> Vec<f32> {
        if self.is_passthrough() {
            return Vec::new();
        }
        match self.last.take() {
            Some(last) if self.position.abs() < 1e-9 => vec![last],
            _ => Vec::new(),
        }
    }
}
