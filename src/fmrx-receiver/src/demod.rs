// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use num_complex::Complex;

/// FM quadrature discriminator: instantaneous frequency via
/// `arg(s[n] * conj(s[n-1]))`, in radians per sample.
///
/// The last sample of each block is kept so the first output of the next
/// block is a true phase difference. The very first sample of a session has
/// no predecessor and yields 0.
#[derive(Debug, Clone, Default)]
pub struct FmDiscriminator {
    prev: Option<Complex<f32>>,
}

impl FmDiscriminator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Demodulate `samples`, appending exactly `samples.len()` values.
    pub fn demodulate_into(&mut self, samples: &[Complex<f32>], output: &mut Vec<f32>) {
        let Some((&last, _)) = samples.split_last() else {
            return;
        };
        output.reserve(samples.len());
        output.push(match self.prev {
            Some(prev) => (samples[0] * prev.conj()).arg(),
            None => 0.0,
        });
        output.extend(samples.windows(2).map(|w| (w[1] * w[0].conj()).arg()));
        self.prev = Some(last);
    }

    pub fn demodulate(&mut self, samples: &[Complex<f32>]) -> Vec<f32> {
        let mut output = Vec::with_capacity(samples.len());
        self.demodulate_into(samples, &mut output);
        output
    }

    pub fn reset(&mut self) {
        self.prev = None;
    }
}
