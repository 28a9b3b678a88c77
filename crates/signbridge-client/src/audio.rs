pub mod mic;

pub use mic::MicCapture;

/// A block of mono f32 samples in [-1, 1].
#[derive(Clone, Debug)]
pub struct AudioChunk {
    pub samples: Vec<f32>,
    pub sample_rate_hz: u32,
}

/// Streaming linear-interpolation resampler. Good enough for speech on both
/// the capture and playback paths.
pub struct LinearResampler {
    out_rate_hz: u32,
    in_rate_hz: u32,
    step: f64,
    pos: f64,
    buf: Vec<f32>,
}

impl LinearResampler {
    pub fn new(in_rate_hz: u32, out_rate_hz: u32) -> Self {
        Self {
            in_rate_hz,
            out_rate_hz,
            step: in_rate_hz as f64 / out_rate_hz as f64,
            pos: 0.0,
            buf: Vec::new(),
        }
    }

    pub fn process_into(&mut self, input: &[f32], out: &mut Vec<f32>) {
        out.clear();
        if input.is_empty() {
            return;
        }

        self.buf.extend_from_slice(input);

        let approx_out_len = ((input.len() as u64 * self.out_rate_hz as u64)
            / self.in_rate_hz.max(1) as u64)
            .saturating_add(2) as usize;
        out.reserve(approx_out_len);

        while self.pos + 1.0 < self.buf.len() as f64 {
            let i = self.pos.floor() as usize;
            let frac = self.pos - i as f64;

            let a = self.buf[i];
            let b = self.buf[i + 1];

            out.push(a + (b - a) * frac as f32);
            self.pos += self.step;
        }

        let drain = self.pos.floor() as usize;
        if drain > 0 {
            self.buf.drain(0..drain);
            self.pos -= drain as f64;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downsampling_halves_the_sample_count() {
        let mut r = LinearResampler::new(48_000, 16_000);
        let input: Vec<f32> = (0..4800).map(|i| (i as f32 / 100.0).sin()).collect();

        let mut out = Vec::new();
        let mut total = 0usize;
        for chunk in input.chunks(480) {
            r.process_into(chunk, &mut out);
            total += out.len();
        }

        // One third of the input rate, within edge effects.
        assert!((total as i64 - 1600).unsigned_abs() <= 2, "got {total}");
    }

    #[test]
    fn identity_rate_passes_samples_through() {
        let mut r = LinearResampler::new(16_000, 16_000);
        let input = vec![0.0, 0.5, -0.5, 1.0];
        let mut out = Vec::new();
        r.process_into(&input, &mut out);

        // The interpolator holds one sample of lookahead.
        assert_eq!(out.len(), input.len() - 1);
        for (a, b) in input.iter().zip(out.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }
}
