// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::f32::consts::PI;
use std::sync::Arc;

use num_complex::Complex;
use rustfft::{Fft, FftPlanner};

/// Largest input chunk fed through one FFT; longer blocks are split.
const MAX_CHUNK: usize = 16_384;

/// Hann-windowed sinc low-pass, normalised to unity DC gain.
///
/// `cutoff_norm` is `cutoff_hz / sample_rate` (0.0 to 0.5).
pub fn lowpass_taps(cutoff_norm: f32, taps: usize) -> Vec<f32> {
    let taps = taps.max(1);
    let m = (taps - 1) as f32;
    let mut coeffs = Vec::with_capacity(taps);
    for i in 0..taps {
        let x = i as f32 - m / 2.0;
        let sinc = if x == 0.0 {
            2.0 * cutoff_norm
        } else {
            (2.0 * PI * cutoff_norm * x).sin() / (PI * x)
        };
        let window = if taps == 1 {
            1.0
        } else {
            0.5 * (1.0 - (2.0 * PI * i as f32 / m).cos())
        };
        coeffs.push(sinc * window);
    }
    let sum: f32 = coeffs.iter().sum();
    if sum.abs() > 1e-12 {
        let inv = 1.0 / sum;
        for coeff in &mut coeffs {
            *coeff *= inv;
        }
    }
    coeffs
}

/// FFT overlap-save FIR filter over complex samples.
///
/// History is carried across calls so consecutive blocks filter as one
/// continuous stream. Output length always equals input length; the filter
/// is causal with a group delay of `(taps - 1) / 2` samples.
pub struct BlockFirFilter {
    h_freq: Vec<Complex<f32>>,
    overlap: Vec<Complex<f32>>,
    fft_size: usize,
    chunk_len: usize,
    fft: Arc<dyn Fft<f32>>,
    ifft: Arc<dyn Fft<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl BlockFirFilter {
    pub fn from_taps(coeffs: &[f32], block_hint: usize) -> Self {
        let n_overlap = coeffs.len().saturating_sub(1);
        let fft_size = (block_hint.clamp(1, MAX_CHUNK) + n_overlap).next_power_of_two();

        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(fft_size);
        let ifft = planner.plan_fft_inverse(fft_size);

        let mut h_freq: Vec<Complex<f32>> = if coeffs.is_empty() {
            vec![Complex::new(1.0, 0.0)]
        } else {
            coeffs.iter().map(|&c| Complex::new(c, 0.0)).collect()
        };
        h_freq.resize(fft_size, Complex::new(0.0, 0.0));
        fft.process(&mut h_freq);
        // Fold the inverse FFT scaling into the kernel once.
        let scale = 1.0 / fft_size as f32;
        for h in &mut h_freq {
            *h *= scale;
        }

        Self {
            h_freq,
            overlap: vec![Complex::new(0.0, 0.0); n_overlap],
            fft_size,
            chunk_len: fft_size - n_overlap,
            fft,
            ifft,
            scratch: Vec::with_capacity(fft_size),
        }
    }

    /// Low-pass with `cutoff_norm = cutoff_hz / sample_rate`.
    pub fn lowpass(cutoff_norm: f32, taps: usize, block_hint: usize) -> Self {
        Self::from_taps(&lowpass_taps(cutoff_norm, taps), block_hint)
    }

    /// Filter `input`, appending exactly `input.len()` samples to `output`.
    pub fn filter_into(&mut self, input: &[Complex<f32>], output: &mut Vec<Complex<f32>>) {
        output.reserve(input.len());
        for chunk in input.chunks(self.chunk_len) {
            self.filter_chunk(chunk, output);
        }
    }

    fn filter_chunk(&mut self, chunk: &[Complex<f32>], output: &mut Vec<Complex<f32>>) {
        let n_new = chunk.len();
        let n_overlap = self.overlap.len();

        let buf = &mut self.scratch;
        buf.clear();
        buf.extend_from_slice(&self.overlap);
        buf.extend_from_slice(chunk);
        buf.resize(self.fft_size, Complex::new(0.0, 0.0));

        self.fft.process(buf);
        for (x, h) in buf.iter_mut().zip(&self.h_freq) {
            *x *= *h;
        }
        self.ifft.process(buf);
        output.extend_from_slice(&buf[n_overlap..n_overlap + n_new]);

        if n_overlap > 0 {
            if n_new >= n_overlap {
                self.overlap.copy_from_slice(&chunk[n_new - n_overlap..]);
            } else {
                let keep_old = n_overlap - n_new;
                self.overlap.copy_within(n_new..n_overlap, 0);
                self.overlap[keep_old..].copy_from_slice(chunk);
            }
        }
    }

    /// Forget all history, as if freshly built.
    pub fn reset(&mut self) {
        self.overlap.fill(Complex::new(0.0, 0.0));
    }
}

/// Real-valued wrapper around [`BlockFirFilter`].
pub struct RealFirFilter {
    inner: BlockFirFilter,
    widened: Vec<Complex<f32>>,
    filtered: Vec<Complex<f32>>,
}

impl RealFirFilter {
    pub fn lowpass(cutoff_norm: f32, taps: usize, block_hint: usize) -> Self {
        Self {
            inner: BlockFirFilter::lowpass(cutoff_norm, taps, block_hint),
            widened: Vec::new(),
            filtered: Vec::new(),
        }
    }

    pub fn filter_into(&mut self, input: &[f32], output: &mut Vec<f32>) {
        self.widened.clear();
        self.widened
            .extend(input.iter().map(|&x| Complex::new(x, 0.0)));
        self.filtered.clear();
        self.inner.filter_into(&self.widened, &mut self.filtered);
        output.extend(self.filtered.iter().map(|c| c.re));
    }

    pub fn reset(&mut self) {
        self.inner.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn direct_convolve(coeffs: &[f32], input: &[Complex<f32>]) -> Vec<Complex<f32>> {
        (0..input.len())
            .map(|n| {
                coeffs
                    .iter()
                    .enumerate()
                    .filter(|(k, _)| *k <= n)
                    .map(|(k, &c)| input[n - k] * c)
                    .sum()
            })
            .collect()
    }

    #[test]
    fn taps_have_unity_dc_gain() {
        let taps = lowpass_taps(0.1, 31);
        let sum: f32 = taps.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert_eq!(lowpass_taps(0.25, 1), vec![1.0]);
    }

    #[test]
    fn matches_direct_convolution_across_uneven_blocks() {
        let taps = lowpass_taps(0.2, 17);
        let input: Vec<Complex<f32>> = (0..300)
            .map(|n| Complex::new((n as f32 * 0.37).sin(), (n as f32 * 0.11).cos()))
            .collect();
        let expected = direct_convolve(&taps, &input);

        // Small block hint forces chunking, and the uneven split exercises
        // blocks shorter than the overlap.
        let mut filter = BlockFirFilter::from_taps(&taps, 32);
        let mut out = Vec::new();
        for piece in [&input[..5], &input[5..120], &input[120..121], &input[121..]] {
            filter.filter_into(piece, &mut out);
        }
        assert_eq!(out.len(), input.len());
        for (n, (a, b)) in out.iter().zip(&expected).enumerate() {
            assert!((a - b).norm() < 1e-4, "sample {n}: {a} vs {b}");
        }
    }

    #[test]
    fn real_filter_passes_dc_and_rejects_high_tone() {
        let mut filter = RealFirFilter::lowpass(0.05, 101, 1024);
        let mut out = Vec::new();
        filter.filter_into(&vec![1.0; 1024], &mut out);
        assert!((out[1023] - 1.0).abs() < 1e-3, "dc: {}", out[1023]);

        filter.reset();
        let tone: Vec<f32> = (0..2048).map(|n| (n as f32 * PI * 0.8).sin()).collect();
        out.clear();
        filter.filter_into(&tone, &mut out);
        let tail_peak = out[1024..].iter().fold(0.0_f32, |m, x| m.max(x.abs()));
        assert!(tail_peak < 0.01, "stopband leak {tail_peak}");
    }
}
