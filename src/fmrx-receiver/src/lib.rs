// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! FM broadcast receiver: IQ sources, the demodulation chain, audio
//! outputs and the [`Receiver`] engine tying them together.

pub mod audio;
pub mod demod;
pub mod dsp;
pub mod engine;
pub mod file_source;
#[cfg(feature = "soapysdr")]
pub mod real_iq_source;
pub mod scan;
pub mod sink;
pub mod source;

pub use audio::{AudioOutput, AudioSink, NullOutput};
#[cfg(feature = "cpal")]
pub use audio::{list_output_devices, CpalOutput};
pub use dsp::{spectrum_bin_frequencies, DspChain, SpectrumShared};
pub use engine::{Receiver, Tuning};
pub use file_source::{FileIqSource, IqFormat};
#[cfg(feature = "soapysdr")]
pub use real_iq_source::RealIqSource;
pub use scan::{auto_tune, mean_power, scan, scan_frequencies, tune_to_best, ScanSettings};
pub use sink::{PopOutcome, PushOutcome, SinkBuffer};
pub use source::{IqSource, MockIqSource, ToneIqSource, ToneStation};
