// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Stateful polyphase sample-rate conversion.
//!
//! A [`PolyphaseResampler`] upsamples by `L`, low-pass filters and keeps
//! every `M`th sample without ever materialising the zero-stuffed stream.
//! The position of the next output relative to the newest input is carried
//! between calls, so splitting a stream into blocks of any length yields the
//! same samples as processing it in one piece.

use fmrx_core::ResamplePlan;

use super::filter::lowpass_taps;

/// Prototype length per unit of `max(L, M)`.
const TAPS_PER_FACTOR: usize = 20;
/// Anti-alias cutoff as a fraction of the narrower Nyquist band.
const CUTOFF_RATIO: f32 = 0.9;

pub struct PolyphaseResampler {
    up: usize,
    down: usize,
    /// One reversed sub-filter per phase, each `taps` long.
    phases: Vec<Vec<f32>>,
    taps: usize,
    /// Doubled ring: the newest `taps` inputs are always contiguous.
    ring: Vec<f32>,
    pos: usize,
    /// Upsampled-domain offset of the next output from the newest input.
    phase: usize,
}

impl PolyphaseResampler {
    pub fn new(up: u32, down: u32) -> Self {
        let up = up.max(1) as usize;
        let down = down.max(1) as usize;
        let factor = up.max(down);
        let taps = if factor == 1 {
            1
        } else {
            (TAPS_PER_FACTOR * factor).div_ceil(up)
        };
        let cutoff = CUTOFF_RATIO * 0.5 / factor as f32;
        let prototype: Vec<f32> = if taps == 1 {
            vec![1.0; up]
        } else {
            lowpass_taps(cutoff, taps * up)
                .into_iter()
                .map(|h| h * up as f32)
                .collect()
        };

        let phases = (0..up)
            .map(|p| {
                (0..taps)
                    .rev()
                    .map(|j| prototype.get(p + j * up).copied().unwrap_or(0.0))
                    .collect()
            })
            .collect();

        Self {
            up,
            down,
            phases,
            taps,
            ring: vec![0.0; taps * 2],
            pos: 0,
            phase: 0,
        }
    }

    pub fn ratio(&self) -> (usize, usize) {
        (self.up, self.down)
    }

    /// Resample `input`, appending the produced samples to `output`.
    pub fn process_into(&mut self, input: &[f32], output: &mut Vec<f32>) {
        output.reserve(input.len() * self.up / self.down + 1);
        for &x in input {
            self.pos = (self.pos + 1) % self.taps;
            self.ring[self.pos] = x;
            self.ring[self.pos + self.taps] = x;
            let window = &self.ring[self.pos + 1..=self.pos + self.taps];

            while self.phase < self.up {
                let coeffs = &self.phases[self.phase];
                let acc: f32 = coeffs.iter().zip(window).map(|(c, s)| c * s).sum();
                output.push(acc);
                self.phase += self.down;
            }
            self.phase -= self.up;
        }
    }

    pub fn reset(&mut self) {
        self.ring.fill(0.0);
        self.pos = 0;
        self.phase = 0;
    }
}

/// Rate converter built from a validated [`ResamplePlan`].
pub enum Resampler {
    Rational(PolyphaseResampler),
    Cascade {
        stages: Vec<PolyphaseResampler>,
        /// Output of the previous stage.
        staged: Vec<f32>,
        scratch: Vec<f32>,
    },
}

impl Resampler {
    pub fn from_plan(plan: &ResamplePlan) -> Self {
        match plan {
            ResamplePlan::Rational { up, down, .. } => {
                Resampler::Rational(PolyphaseResampler::new(*up, *down))
            }
            ResamplePlan::Cascade { stages } => Resampler::Cascade {
                stages: stages
                    .iter()
                    .map(|&factor| PolyphaseResampler::new(1, factor))
                    .collect(),
                staged: Vec::new(),
                scratch: Vec::new(),
            },
        }
    }

    pub fn process_into(&mut self, input: &[f32], output: &mut Vec<f32>) {
        match self {
            Resampler::Rational(stage) => stage.process_into(input, output),
            Resampler::Cascade {
                stages,
                staged,
                scratch,
            } => {
                let Some((last, head)) = stages.split_last_mut() else {
                    output.extend_from_slice(input);
                    return;
                };
                let Some((first, middle)) = head.split_first_mut() else {
                    last.process_into(input, output);
                    return;
                };
                staged.clear();
                first.process_into(input, staged);
                for stage in middle {
                    scratch.clear();
                    stage.process_into(staged, scratch);
                    std::mem::swap(staged, scratch);
                }
                last.process_into(staged, output);
            }
        }
    }

    pub fn reset(&mut self) {
        match self {
            Resampler::Rational(stage) => stage.reset(),
            Resampler::Cascade { stages, .. } => stages.iter_mut().for_each(|s| s.reset()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::TAU;

    fn tone(freq_norm: f32, len: usize) -> Vec<f32> {
        (0..len).map(|n| (TAU * freq_norm * n as f32).sin()).collect()
    }

    #[test]
    fn rate_law_holds_over_many_blocks() {
        // 1.024 MHz -> 48 kHz with L/M = 3/64.
        let mut resampler = PolyphaseResampler::new(3, 64);
        let block = vec![0.25_f32; 131_072 / 8];
        let mut total_in = 0usize;
        let mut total_out = 0usize;
        for _ in 0..50 {
            let mut out = Vec::new();
            resampler.process_into(&block, &mut out);
            total_in += block.len();
            total_out += out.len();
            let expected = total_in as f64 * 3.0 / 64.0;
            assert!(
                (total_out as f64 - expected).abs() <= 1.0,
                "after {total_in} inputs: {total_out} outputs, expected {expected}"
            );
        }
    }

    #[test]
    fn block_split_is_invisible() {
        let input = tone(0.003, 5000);
        let mut whole = PolyphaseResampler::new(3, 64);
        let mut expected = Vec::new();
        whole.process_into(&input, &mut expected);

        let mut split = PolyphaseResampler::new(3, 64);
        let mut got = Vec::new();
        for chunk in input.chunks(77) {
            split.process_into(chunk, &mut got);
        }
        assert_eq!(got, expected);
    }

    #[test]
    fn passes_dc_at_unity_gain() {
        let mut resampler = PolyphaseResampler::new(3, 64);
        let mut out = Vec::new();
        resampler.process_into(&vec![1.0; 20_000], &mut out);
        let settled = &out[out.len() / 2..];
        for &s in settled {
            assert!((s - 1.0).abs() < 0.01, "dc gain drift: {s}");
        }
    }

    #[test]
    fn cascade_matches_total_factor() {
        let plan = ResamplePlan::Cascade {
            stages: vec![10, 5],
        };
        let mut resampler = Resampler::from_plan(&plan);
        let mut out = Vec::new();
        for chunk in tone(0.001, 24_000).chunks(2400) {
            resampler.process_into(chunk, &mut out);
        }
        assert!((out.len() as i64 - 480).abs() <= 1, "got {}", out.len());
    }

    #[test]
    fn cascade_equals_chained_stages() {
        let input = tone(0.002, 6_000);
        let mut expected = input.clone();
        for factor in [2, 3, 2] {
            let mut stage = PolyphaseResampler::new(1, factor);
            let mut next = Vec::new();
            stage.process_into(&expected, &mut next);
            expected = next;
        }

        let mut cascade = Resampler::from_plan(&ResamplePlan::Cascade {
            stages: vec![2, 3, 2],
        });
        let mut got = Vec::new();
        for chunk in input.chunks(600) {
            cascade.process_into(chunk, &mut got);
        }
        assert_eq!(got, expected);
    }

    #[test]
    fn identity_ratio_copies_input() {
        let mut resampler = PolyphaseResampler::new(1, 1);
        let input = tone(0.1, 32);
        let mut out = Vec::new();
        resampler.process_into(&input, &mut out);
        assert_eq!(out, input);
    }
}
