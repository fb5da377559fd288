// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use fmrx_core::DeemphasisForm;

/// Single-pole de-emphasis low-pass, `y[n] = b0 x[n] + a1 y[n-1]`.
///
/// Both forms have unity DC gain and a -3 dB corner near `1 / (2 pi tau)`
/// (2122 Hz at 75 µs, 3183 Hz at 50 µs); they differ by a fraction of a dB
/// in the upper audio band.
#[derive(Debug, Clone)]
pub struct Deemphasis {
    b0: f32,
    a1: f32,
    y: f32,
}

impl Deemphasis {
    pub fn new(sample_rate: f32, tau_us: f32, form: DeemphasisForm) -> Self {
        let sr = sample_rate.max(1.0);
        let tau = tau_us.max(f32::EPSILON) * 1e-6;
        let (b0, a1) = match form {
            DeemphasisForm::MatchedPole => {
                let a = (-1.0 / (sr * tau)).exp();
                (1.0 - a, a)
            }
            DeemphasisForm::BackwardEuler => {
                let alpha = sr * tau;
                (1.0 / (1.0 + alpha), alpha / (1.0 + alpha))
            }
        };
        Self { b0, a1, y: 0.0 }
    }

    #[inline]
    pub fn process(&mut self, x: f32) -> f32 {
        self.y = self.b0 * x + self.a1 * self.y;
        self.y
    }

    pub fn process_in_place(&mut self, samples: &mut [f32]) {
        for s in samples {
            *s = self.process(*s);
        }
    }

    pub fn reset(&mut self) {
        self.y = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::TAU;

    /// Steady-state gain in dB for a sine at `freq`, measured by RMS over an
    /// integer number of periods.
    fn measured_gain_db(filter: &mut Deemphasis, sample_rate: f32, freq: f32) -> f32 {
        filter.reset();
        let settle = 2_000;
        let window = 4_800;
        let mut sum_sq = 0.0_f64;
        for n in 0..settle + window {
            let x = (TAU * freq * n as f32 / sample_rate).sin();
            let y = filter.process(x);
            if n >= settle {
                sum_sq += (y as f64) * (y as f64);
            }
        }
        let amplitude = (2.0 * sum_sq / window as f64).sqrt();
        20.0 * amplitude.log10() as f32
    }

    fn analog_gain_db(freq: f32, tau_us: f32) -> f32 {
        let corner = 1.0 / (TAU * tau_us * 1e-6);
        -10.0 * (1.0 + (freq / corner).powi(2)).log10()
    }

    #[test]
    fn tracks_analog_response_in_audio_band() {
        for form in [DeemphasisForm::MatchedPole, DeemphasisForm::BackwardEuler] {
            let mut filter = Deemphasis::new(48_000.0, 75.0, form);
            for freq in [250.0, 500.0, 1_000.0, 2_000.0, 4_000.0, 8_000.0] {
                let got = measured_gain_db(&mut filter, 48_000.0, freq);
                let want = analog_gain_db(freq, 75.0);
                assert!(
                    (got - want).abs() < 1.0,
                    "{form:?} at {freq} Hz: {got:.2} dB vs analog {want:.2} dB"
                );
            }
        }
    }

    #[test]
    fn rolls_off_six_db_per_octave_above_corner() {
        for form in [DeemphasisForm::MatchedPole, DeemphasisForm::BackwardEuler] {
            let mut filter = Deemphasis::new(192_000.0, 75.0, form);
            let low = measured_gain_db(&mut filter, 192_000.0, 8_000.0);
            let high = measured_gain_db(&mut filter, 192_000.0, 16_000.0);
            let slope = low - high;
            assert!(
                (slope - 6.02).abs() < 0.75,
                "{form:?}: octave slope {slope:.2} dB"
            );
        }
    }

    #[test]
    fn unity_dc_gain_and_state_carries() {
        let mut filter = Deemphasis::new(48_000.0, 50.0, DeemphasisForm::MatchedPole);
        let mut block = vec![1.0_f32; 64];
        filter.process_in_place(&mut block);
        let last = block[63];
        assert!(last > 0.99, "{last}");

        let mut next = vec![1.0_f32; 1];
        filter.process_in_place(&mut next);
        assert!(next[0] >= last, "state lost between blocks");
    }
}
