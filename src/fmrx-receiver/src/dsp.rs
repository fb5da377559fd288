// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Demodulation chain: channel filter, discriminator, audio band-limiter,
//! resampler, de-emphasis, normaliser and framer.

pub mod deemphasis;
pub mod filter;
pub mod framer;
pub mod normalize;
pub mod resample;
pub mod spectrum;

use fmrx_core::{AudioFrame, PipelineConfig, ResamplePlan, RxResult};
use num_complex::Complex;

use crate::demod::FmDiscriminator;

pub use deemphasis::Deemphasis;
pub use filter::{lowpass_taps, BlockFirFilter, RealFirFilter};
pub use framer::Framer;
pub use normalize::Normalizer;
pub use resample::{PolyphaseResampler, Resampler};
pub use spectrum::{
    spectrum_bin_frequencies, spectrum_bin_offsets, SpectrumAnalyzer, SpectrumShared, Waterfall,
};

/// Every stateful stage of one session's audio path.
///
/// Coefficients are derived once here; only delay lines change per block.
/// Rebuild the chain to apply a new configuration.
pub struct DspChain {
    channel_filter: BlockFirFilter,
    discriminator: FmDiscriminator,
    band_limiter: RealFirFilter,
    resampler: Resampler,
    deemphasis: Deemphasis,
    normalizer: Normalizer,
    framer: Framer,
    filtered: Vec<Complex<f32>>,
    baseband: Vec<f32>,
    limited: Vec<f32>,
    audio: Vec<f32>,
    last_gain: f32,
}

impl DspChain {
    pub fn new(config: &PipelineConfig) -> RxResult<Self> {
        config.validate()?;
        let plan = config.resample_plan()?;
        let sample_rate = config.sample_rate as f32;

        let channel_cutoff = config.channel_bandwidth_hz as f32 / 2.0 / sample_rate;
        let audio_cutoff = config.audio_bandwidth_hz as f32 / sample_rate;
        let deemphasis_rate = plan.output_rate(config.sample_rate) as f32;

        match &plan {
            ResamplePlan::Rational {
                up,
                down,
                rel_error,
            } => tracing::info!(
                "DSP chain: {} Hz -> {} Hz via L/M = {}/{} (rate error {:.4}%)",
                config.sample_rate,
                config.audio_rate,
                up,
                down,
                rel_error * 100.0
            ),
            ResamplePlan::Cascade { stages } => tracing::info!(
                "DSP chain: {} Hz -> {} Hz via decimation stages {:?}",
                config.sample_rate,
                config.audio_rate,
                stages
            ),
        }
        tracing::debug!(
            "channel LPF {:.0} Hz ({} taps), audio LPF {} Hz ({} taps), de-emphasis {} us ({:?}, corner {:.0} Hz)",
            config.channel_bandwidth_hz as f32 / 2.0,
            config.channel_taps,
            config.audio_bandwidth_hz,
            config.audio_taps,
            config.deemphasis_us,
            config.deemphasis_form,
            config.deemphasis_corner_hz()
        );

        Ok(Self {
            channel_filter: BlockFirFilter::lowpass(
                channel_cutoff,
                config.channel_taps,
                config.block_size,
            ),
            discriminator: FmDiscriminator::new(),
            band_limiter: RealFirFilter::lowpass(audio_cutoff, config.audio_taps, config.block_size),
            resampler: Resampler::from_plan(&plan),
            deemphasis: Deemphasis::new(
                deemphasis_rate,
                config.deemphasis_us,
                config.deemphasis_form,
            ),
            normalizer: Normalizer::new(config.output_peak),
            framer: Framer::new(config.frame_len),
            filtered: Vec::with_capacity(config.block_size),
            baseband: Vec::with_capacity(config.block_size),
            limited: Vec::with_capacity(config.block_size),
            audio: Vec::new(),
            last_gain: 1.0,
        })
    }

    /// Run one block of IQ samples through the chain, appending every
    /// completed audio frame to `frames`.
    pub fn process(&mut self, samples: &[Complex<f32>], frames: &mut Vec<AudioFrame>) {
        self.filtered.clear();
        self.channel_filter.filter_into(samples, &mut self.filtered);

        self.baseband.clear();
        self.discriminator
            .demodulate_into(&self.filtered, &mut self.baseband);

        self.limited.clear();
        self.band_limiter
            .filter_into(&self.baseband, &mut self.limited);

        self.audio.clear();
        self.resampler.process_into(&self.limited, &mut self.audio);

        self.deemphasis.process_in_place(&mut self.audio);
        self.last_gain = self.normalizer.apply(&mut self.audio);
        self.framer.push(&self.audio, frames);
    }

    /// Emit the trailing partial frame padded with silence.
    pub fn flush(&mut self) -> Option<AudioFrame> {
        self.framer.flush()
    }

    /// Gain the normaliser applied to the most recent block.
    pub fn last_gain(&self) -> f32 {
        self.last_gain
    }
}
