// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Session configuration for the demodulation pipeline.
//!
//! A `PipelineConfig` is fixed for the lifetime of a running session. Any
//! change goes through validation again and rebuilds every stateful stage.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RxError, RxResult};
use crate::math::{approximate_ratio, decimation_stages};

/// How the discriminator rate is reduced to the audio rate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResamplerStrategy {
    /// Single polyphase upsample-by-L / downsample-by-M stage.
    #[default]
    Rational,
    /// Chain of integer decimators, each with its own anti-alias filter.
    Cascade,
}

/// Which single-pole discretisation the de-emphasis filter uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeemphasisForm {
    /// `a = exp(-1 / (fs * tau))`, `y = (1 - a) x + a y[-1]`.
    #[default]
    MatchedPole,
    /// `alpha = fs * tau`, `y = (x + alpha y[-1]) / (1 + alpha)`.
    BackwardEuler,
}

/// What the sink buffer does when a frame arrives and it is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Wait up to the push timeout for room, then drop the oldest frame.
    #[default]
    Block,
    /// Drop the oldest frame immediately.
    DropOldest,
}

/// Resolved sample-rate conversion plan.
#[derive(Debug, Clone, PartialEq)]
pub enum ResamplePlan {
    Rational { up: u32, down: u32, rel_error: f64 },
    Cascade { stages: Vec<u32> },
}

impl ResamplePlan {
    /// Output rate produced for `in_rate` input.
    pub fn output_rate(&self, in_rate: u32) -> f64 {
        match self {
            ResamplePlan::Rational { up, down, .. } => {
                in_rate as f64 * *up as f64 / *down as f64
            }
            ResamplePlan::Cascade { stages } => {
                stages
                    .iter()
                    .fold(in_rate as f64, |rate, &factor| rate / factor as f64)
            }
        }
    }
}

/// Immutable per-session pipeline parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Front-end IQ sample rate (Hz).
    pub sample_rate: u32,
    /// Audio output rate (Hz).
    pub audio_rate: u32,
    /// IQ samples read per block.
    pub block_size: usize,
    /// Occupied FM channel bandwidth (Hz). The channel filter passes half of
    /// this on either side of the carrier.
    pub channel_bandwidth_hz: u32,
    /// Channel filter length.
    pub channel_taps: usize,
    /// Audio band-limit applied before rate reduction (Hz).
    pub audio_bandwidth_hz: u32,
    /// Audio band-limiter length.
    pub audio_taps: usize,
    pub resampler: ResamplerStrategy,
    /// Largest tolerated relative error of a rational `up / down` ratio.
    pub resample_tolerance: f64,
    /// Upper bound on the rational interpolation factor.
    pub max_interpolation: u32,
    /// Upper bound on a single cascade decimation stage.
    pub max_stage_factor: u32,
    /// De-emphasis time constant (µs): 75 in the Americas, 50 elsewhere.
    pub deemphasis_us: f32,
    pub deemphasis_form: DeemphasisForm,
    /// Peak level each audio block is normalized to.
    pub output_peak: f32,
    /// Samples per audio frame handed to the sink.
    pub frame_len: usize,
    /// Sink buffer capacity in frames.
    pub sink_capacity: usize,
    pub overflow_policy: OverflowPolicy,
    /// Longest a blocked push waits before dropping (ms). `None` derives four
    /// frame durations.
    pub push_timeout_ms: Option<u64>,
    /// How long the audio consumer waits before reporting an underrun (ms).
    pub underrun_timeout_ms: u64,
    /// Spectrum FFT length (power of two).
    pub fft_size: usize,
    pub waterfall_rows: usize,
    pub waterfall_cols: usize,
    /// Compute a spectrum every this many blocks.
    pub spectrum_interval_blocks: usize,
    /// Consecutive source read failures tolerated before the run ends.
    pub read_error_tolerance: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 1_024_000,
            audio_rate: 48_000,
            block_size: 131_072,
            channel_bandwidth_hz: 200_000,
            channel_taps: 101,
            audio_bandwidth_hz: 15_000,
            audio_taps: 129,
            resampler: ResamplerStrategy::Rational,
            resample_tolerance: 0.001,
            max_interpolation: 256,
            max_stage_factor: 10,
            deemphasis_us: 75.0,
            deemphasis_form: DeemphasisForm::MatchedPole,
            output_peak: 0.8,
            frame_len: 1024,
            sink_capacity: 10,
            overflow_policy: OverflowPolicy::Block,
            push_timeout_ms: None,
            underrun_timeout_ms: 250,
            fft_size: 16_384,
            waterfall_rows: 256,
            waterfall_cols: 1024,
            spectrum_interval_blocks: 1,
            read_error_tolerance: 0,
        }
    }
}

impl PipelineConfig {
    /// Reject parameters the pipeline cannot run with.
    pub fn validate(&self) -> RxResult<()> {
        let err = |msg: String| Err(RxError::Configuration(msg));

        if self.sample_rate == 0 {
            return err("sample_rate must be > 0".into());
        }
        if self.audio_rate == 0 {
            return err("audio_rate must be > 0".into());
        }
        if self.audio_rate >= self.sample_rate {
            return err(format!(
                "audio_rate ({}) must be below sample_rate ({})",
                self.audio_rate, self.sample_rate
            ));
        }
        if self.block_size < 2 {
            return err("block_size must be >= 2".into());
        }
        if self.channel_bandwidth_hz == 0 || self.channel_bandwidth_hz >= self.sample_rate {
            return err(format!(
                "channel_bandwidth_hz ({}) must be in 1..{}",
                self.channel_bandwidth_hz, self.sample_rate
            ));
        }
        if self.audio_bandwidth_hz == 0 || self.audio_bandwidth_hz as u64 * 2 >= self.audio_rate as u64 {
            return err(format!(
                "audio_bandwidth_hz ({}) must be in 1..{} (below the audio Nyquist rate)",
                self.audio_bandwidth_hz,
                self.audio_rate / 2
            ));
        }
        if self.channel_taps == 0 || self.audio_taps == 0 {
            return err("filter tap counts must be > 0".into());
        }
        if !(self.resample_tolerance > 0.0 && self.resample_tolerance < 1.0) {
            return err(format!(
                "resample_tolerance ({}) must be in (0, 1)",
                self.resample_tolerance
            ));
        }
        if !(self.deemphasis_us.is_finite() && self.deemphasis_us > 0.0) {
            return err(format!(
                "deemphasis_us ({}) must be > 0",
                self.deemphasis_us
            ));
        }
        if !(self.output_peak > 0.0 && self.output_peak <= 1.0) {
            return err(format!(
                "output_peak ({}) must be in (0, 1]",
                self.output_peak
            ));
        }
        if self.frame_len == 0 {
            return err("frame_len must be > 0".into());
        }
        if self.sink_capacity == 0 {
            return err("sink_capacity must be > 0".into());
        }
        if self.underrun_timeout_ms == 0 {
            return err("underrun_timeout_ms must be > 0".into());
        }
        if self.fft_size < 2 || !self.fft_size.is_power_of_two() {
            return err(format!(
                "fft_size ({}) must be a power of two >= 2",
                self.fft_size
            ));
        }
        if self.waterfall_rows == 0 || self.waterfall_cols == 0 {
            return err("waterfall dimensions must be > 0".into());
        }
        if self.spectrum_interval_blocks == 0 {
            return err("spectrum_interval_blocks must be > 0".into());
        }
        self.resample_plan().map(|_| ())
    }

    /// Derive the sample-rate conversion plan for this configuration.
    pub fn resample_plan(&self) -> RxResult<ResamplePlan> {
        match self.resampler {
            ResamplerStrategy::Rational => {
                let approx = approximate_ratio(
                    self.audio_rate as u64,
                    self.sample_rate as u64,
                    self.max_interpolation,
                )
                .ok_or_else(|| {
                    RxError::Configuration(format!(
                        "no rational ratio for {} Hz -> {} Hz",
                        self.sample_rate, self.audio_rate
                    ))
                })?;
                if approx.rel_error > self.resample_tolerance {
                    return Err(RxError::Configuration(format!(
                        "best ratio {}/{} for {} Hz -> {} Hz is off by {:.4}% (tolerance {:.4}%)",
                        approx.up,
                        approx.down,
                        self.sample_rate,
                        self.audio_rate,
                        approx.rel_error * 100.0,
                        self.resample_tolerance * 100.0
                    )));
                }
                Ok(ResamplePlan::Rational {
                    up: approx.up,
                    down: approx.down,
                    rel_error: approx.rel_error,
                })
            }
            ResamplerStrategy::Cascade => {
                if self.sample_rate % self.audio_rate != 0 {
                    return Err(RxError::Configuration(format!(
                        "cascade resampling needs an integer ratio ({} Hz / {} Hz is not)",
                        self.sample_rate, self.audio_rate
                    )));
                }
                let factor = (self.sample_rate / self.audio_rate) as u64;
                let stages = decimation_stages(factor, self.max_stage_factor as u64)
                    .ok_or_else(|| {
                        RxError::Configuration(format!(
                            "decimation by {} cannot be split into stages of at most {}",
                            factor, self.max_stage_factor
                        ))
                    })?;
                Ok(ResamplePlan::Cascade { stages })
            }
        }
    }

    /// Duration of one audio frame.
    pub fn frame_duration(&self) -> Duration {
        Duration::from_secs_f64(self.frame_len as f64 / self.audio_rate.max(1) as f64)
    }

    pub fn push_timeout(&self) -> Duration {
        match self.push_timeout_ms {
            Some(ms) => Duration::from_millis(ms),
            None => self.frame_duration() * 4,
        }
    }

    pub fn underrun_timeout(&self) -> Duration {
        Duration::from_millis(self.underrun_timeout_ms)
    }

    /// De-emphasis corner frequency `1 / (2 pi tau)` in Hz.
    pub fn deemphasis_corner_hz(&self) -> f32 {
        1.0 / (2.0 * std::f32::consts::PI * self.deemphasis_us * 1e-6)
    }
}
