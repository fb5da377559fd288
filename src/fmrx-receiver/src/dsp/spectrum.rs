// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::f32::consts::PI;
use std::sync::{Arc, Mutex, PoisonError};

use fmrx_core::WaterfallImage;
use num_complex::Complex;
use rustfft::{Fft, FftPlanner};

/// Added to every magnitude before the log so empty bins stay finite.
const MAGNITUDE_FLOOR: f32 = 1e-12;

/// Value of waterfall cells that have not been written yet (dB).
pub const WATERFALL_FLOOR_DB: f32 = -120.0;

/// Hann-windowed FFT magnitude of the most recent `fft_size` samples.
///
/// Rows hold the positive-frequency half in dB, shifted so the strongest
/// bin reads 0 dB.
pub struct SpectrumAnalyzer {
    fft_size: usize,
    hann_window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
    scratch: Vec<Complex<f32>>,
    interval: usize,
    counter: usize,
}

impl SpectrumAnalyzer {
    pub fn new(fft_size: usize, interval_blocks: usize) -> Self {
        let fft_size = fft_size.max(2);
        let hann_window: Vec<f32> = (0..fft_size)
            .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / (fft_size - 1) as f32).cos()))
            .collect();

        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(fft_size);

        Self {
            fft_size,
            hann_window,
            fft,
            scratch: Vec::with_capacity(fft_size),
            interval: interval_blocks.max(1),
            counter: 0,
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Positive-frequency bins produced per row.
    pub fn bins(&self) -> usize {
        self.fft_size / 2
    }

    /// Analyze only every `interval_blocks`th call.
    pub fn update(&mut self, samples: &[Complex<f32>]) -> Option<Vec<f32>> {
        self.counter += 1;
        if self.counter < self.interval {
            return None;
        }
        self.counter = 0;
        Some(self.analyze(samples))
    }

    /// Spectrum of the last `fft_size` samples, zero padded when shorter.
    pub fn analyze(&mut self, samples: &[Complex<f32>]) -> Vec<f32> {
        let take = samples.len().min(self.fft_size);
        let recent = &samples[samples.len() - take..];

        let buf = &mut self.scratch;
        buf.clear();
        buf.extend(
            recent
                .iter()
                .zip(&self.hann_window)
                .map(|(&sample, &w)| sample * w),
        );
        buf.resize(self.fft_size, Complex::new(0.0, 0.0));
        self.fft.process(buf);

        let mut bins: Vec<f32> = buf[..self.fft_size / 2]
            .iter()
            .map(|value| 20.0 * (value.norm() + MAGNITUDE_FLOOR).log10())
            .collect();
        let max = bins.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        if max.is_finite() {
            for bin in &mut bins {
                *bin -= max;
            }
        }
        bins
    }
}

/// Offset from the tuned frequency of each positive-frequency bin, in Hz.
pub fn spectrum_bin_offsets(sample_rate: u32, fft_size: usize) -> Vec<f64> {
    let fft_size = fft_size.max(1);
    let resolution = sample_rate as f64 / fft_size as f64;
    (0..fft_size / 2).map(|k| k as f64 * resolution).collect()
}

/// Absolute frequency of each positive-frequency bin, in Hz.
pub fn spectrum_bin_frequencies(center_hz: u64, sample_rate: u32, fft_size: usize) -> Vec<f64> {
    spectrum_bin_offsets(sample_rate, fft_size)
        .into_iter()
        .map(|offset| center_hz as f64 + offset)
        .collect()
}

/// Fixed-size spectrogram with ring-buffer-by-row storage.
pub struct Waterfall {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
    /// Index of the oldest row, which the next push overwrites.
    head: usize,
}

impl Waterfall {
    pub fn new(rows: usize, cols: usize) -> Self {
        let rows = rows.max(1);
        let cols = cols.max(1);
        Self {
            rows,
            cols,
            data: vec![WATERFALL_FLOOR_DB; rows * cols],
            head: 0,
        }
    }

    /// Replace the oldest row with `spectrum`, linearly resampled to the
    /// column count when the widths differ.
    pub fn push_row(&mut self, spectrum: &[f32]) {
        let start = self.head * self.cols;
        let row = &mut self.data[start..start + self.cols];
        resample_linear(spectrum, row);
        self.head = (self.head + 1) % self.rows;
    }

    /// Copy of the image, oldest row first.
    pub fn snapshot(&self) -> WaterfallImage {
        let split = self.head * self.cols;
        let mut data = Vec::with_capacity(self.data.len());
        data.extend_from_slice(&self.data[split..]);
        data.extend_from_slice(&self.data[..split]);
        WaterfallImage {
            rows: self.rows,
            cols: self.cols,
            data,
        }
    }
}

/// Sample `src` at `dst.len()` evenly spaced points spanning its full range.
fn resample_linear(src: &[f32], dst: &mut [f32]) {
    match src.len() {
        0 => dst.fill(WATERFALL_FLOOR_DB),
        n if n == dst.len() => dst.copy_from_slice(src),
        1 => dst.fill(src[0]),
        n => {
            let last = (n - 1) as f64;
            let denom = (dst.len().max(2) - 1) as f64;
            for (i, out) in dst.iter_mut().enumerate() {
                let pos = i as f64 * last / denom;
                let lo = (pos.floor() as usize).min(n - 1);
                let hi = (lo + 1).min(n - 1);
                let frac = (pos - lo as f64) as f32;
                *out = src[lo] + (src[hi] - src[lo]) * frac;
            }
        }
    }
}

/// Latest spectrum row and waterfall, shared with display readers.
///
/// The processing thread writes under the lock; readers get copies, so a
/// reader never observes a half-written row.
#[derive(Clone)]
pub struct SpectrumShared {
    spectrum: Arc<Mutex<Option<Vec<f32>>>>,
    waterfall: Arc<Mutex<Waterfall>>,
}

impl SpectrumShared {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            spectrum: Arc::new(Mutex::new(None)),
            waterfall: Arc::new(Mutex::new(Waterfall::new(rows, cols))),
        }
    }

    pub fn publish(&self, row: Vec<f32>) {
        self.waterfall
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_row(&row);
        *self.spectrum.lock().unwrap_or_else(PoisonError::into_inner) = Some(row);
    }

    pub fn spectrum(&self) -> Option<Vec<f32>> {
        self.spectrum
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn waterfall(&self) -> WaterfallImage {
        self.waterfall
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::TAU;

    #[test]
    fn tone_peaks_at_its_bin_and_reads_zero_db() {
        let fft_size = 1024;
        let bin = 100;
        let samples: Vec<Complex<f32>> = (0..4096)
            .map(|n| Complex::from_polar(0.5, TAU * bin as f32 * n as f32 / fft_size as f32))
            .collect();
        let mut analyzer = SpectrumAnalyzer::new(fft_size, 1);
        let row = analyzer.analyze(&samples);
        assert_eq!(row.len(), fft_size / 2);
        let (peak_idx, &peak) = row
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .unwrap();
        assert_eq!(peak_idx, bin);
        assert_eq!(peak, 0.0);
        assert!(row[400] < -60.0, "far bin {}", row[400]);
    }

    #[test]
    fn silence_stays_finite() {
        let mut analyzer = SpectrumAnalyzer::new(64, 1);
        let row = analyzer.analyze(&[Complex::new(0.0, 0.0); 10]);
        assert!(row.iter().all(|v| v.is_finite() && *v == 0.0));
    }

    #[test]
    fn update_respects_interval() {
        let mut analyzer = SpectrumAnalyzer::new(16, 3);
        let block = vec![Complex::new(1.0, 0.0); 16];
        let produced: Vec<bool> = (0..6).map(|_| analyzer.update(&block).is_some()).collect();
        assert_eq!(produced, vec![false, false, true, false, false, true]);
    }

    #[test]
    fn bin_frequencies_cover_positive_half() {
        let freqs = spectrum_bin_frequencies(101_000_000, 1_024_000, 8);
        assert_eq!(
            freqs,
            vec![101_000_000.0, 101_128_000.0, 101_256_000.0, 101_384_000.0]
        );
    }

    #[test]
    fn waterfall_scrolls_oldest_first() {
        let mut wf = Waterfall::new(3, 2);
        wf.push_row(&[1.0, 1.0]);
        wf.push_row(&[2.0, 2.0]);
        let image = wf.snapshot();
        assert_eq!(image.row(0), Some(&[WATERFALL_FLOOR_DB; 2][..]));
        assert_eq!(image.newest(), Some(&[2.0, 2.0][..]));

        wf.push_row(&[3.0, 3.0]);
        wf.push_row(&[4.0, 4.0]);
        let image = wf.snapshot();
        assert_eq!(image.data, vec![2.0, 2.0, 3.0, 3.0, 4.0, 4.0]);
    }

    #[test]
    fn waterfall_interpolates_rows() {
        let mut wf = Waterfall::new(1, 5);
        wf.push_row(&[0.0, -10.0, -20.0]);
        assert_eq!(wf.snapshot().data, vec![0.0, -5.0, -10.0, -15.0, -20.0]);
    }

    #[test]
    fn shared_readers_see_published_rows() {
        let writer = SpectrumShared::new(2, 2);
        let reader = writer.clone();
        assert_eq!(reader.spectrum(), None);
        writer.publish(vec![0.0, -1.0, -2.0]);
        assert_eq!(reader.spectrum(), Some(vec![0.0, -1.0, -2.0]));
        assert_eq!(reader.waterfall().newest(), Some(&[0.0, -2.0][..]));
    }
}
