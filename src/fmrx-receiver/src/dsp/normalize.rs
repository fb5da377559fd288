// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

/// Memoryless per-block peak normaliser.
///
/// Each block is scaled so its peak lands on `ceiling`. Blocks of differing
/// loudness get different gains, which is audible as pumping on material
/// with a wide dynamic range.
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    ceiling: f32,
}

impl Normalizer {
    pub fn new(ceiling: f32) -> Self {
        Self {
            ceiling: ceiling.clamp(f32::MIN_POSITIVE, 1.0),
        }
    }

    pub fn ceiling(&self) -> f32 {
        self.ceiling
    }

    /// Scale `samples` in place and return the applied gain.
    ///
    /// Silence (peak of zero) passes through untouched with a gain of 1.
    pub fn apply(&self, samples: &mut [f32]) -> f32 {
        let peak = samples.iter().fold(0.0_f32, |m, s| m.max(s.abs()));
        if peak <= 0.0 || !peak.is_finite() {
            return 1.0;
        }
        let gain = self.ceiling / peak;
        for s in samples.iter_mut() {
            *s = (*s * gain).clamp(-self.ceiling, self.ceiling);
        }
        gain
    }
}
