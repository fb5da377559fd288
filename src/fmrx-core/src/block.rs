// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Sample containers handed between pipeline stages.

use num_complex::Complex;

/// A block of complex baseband samples tagged with its capture rate.
///
/// Blocks are moved from stage to stage; nothing mutates a block after the
/// source produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBlock {
    samples: Vec<Complex<f32>>,
    sample_rate: u32,
}

impl SampleBlock {
    pub fn new(samples: Vec<Complex<f32>>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn samples(&self) -> &[Complex<f32>] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// The most recent `n` samples (or all of them when the block is shorter).
    pub fn tail(&self, n: usize) -> &[Complex<f32>] {
        let start = self.samples.len().saturating_sub(n);
        &self.samples[start..]
    }

    pub fn into_samples(self) -> Vec<Complex<f32>> {
        self.samples
    }
}

/// A fixed-length frame of mono audio at the output rate.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    samples: Vec<f32>,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>) -> Self {
        Self { samples }
    }

    pub fn silence(len: usize) -> Self {
        Self {
            samples: vec![0.0; len],
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Peak absolute amplitude of the frame.
    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0_f32, |acc, s| acc.max(s.abs()))
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }
}

impl From<Vec<f32>> for AudioFrame {
    fn from(samples: Vec<f32>) -> Self {
        Self::new(samples)
    }
}
