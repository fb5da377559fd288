// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Band sweep and strongest-channel selection.

use fmrx_core::{Freq, FreqRange, RxError, RxResult, ScanEntry, ScanResult};
use num_complex::Complex;
use serde::{Deserialize, Serialize};

use crate::source::IqSource;

/// How much is captured at every candidate frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    /// Samples averaged into each power estimate.
    pub capture_len: usize,
    /// Samples discarded after each retune while the tuner settles.
    pub settle_samples: usize,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            capture_len: 32 * 1024,
            settle_samples: 0,
        }
    }
}

/// Mean squared magnitude of `samples`, 0 for an empty slice.
pub fn mean_power(samples: &[Complex<f32>]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|s| s.norm_sqr() as f64).sum();
    sum / samples.len() as f64
}

/// Retune to each of `freqs`, measure its power and rank the results.
pub fn scan_frequencies<S: IqSource + ?Sized>(
    source: &mut S,
    freqs: &[Freq],
    settings: &ScanSettings,
) -> RxResult<ScanResult> {
    let capture_len = settings.capture_len.max(1);
    let mut entries = Vec::with_capacity(freqs.len());
    for &freq in freqs {
        source.set_frequency(freq.hz)?;
        if settings.settle_samples > 0 {
            source.read_block(settings.settle_samples)?;
        }
        let block = source.read_block(capture_len)?;
        let power = mean_power(block.samples());
        tracing::debug!("scan {}: power {:.6}", freq, power);
        entries.push(ScanEntry { freq, power });
    }
    Ok(ScanResult::from_measurements(entries))
}

/// Sweep `[range.start, range.stop)` in `step_hz` increments.
pub fn scan<S: IqSource + ?Sized>(
    source: &mut S,
    range: FreqRange,
    step_hz: u64,
    settings: &ScanSettings,
) -> RxResult<ScanResult> {
    let freqs = range.candidates(step_hz)?;
    tracing::info!(
        "Scanning {} candidate(s) from {} to {} in {} Hz steps",
        freqs.len(),
        Freq::new(range.start_hz),
        Freq::new(range.stop_hz),
        step_hz
    );
    let result = scan_frequencies(source, &freqs, settings)?;
    if let Some(best) = result.entries().first() {
        tracing::info!("Scan complete: strongest {} (power {:.6})", best.freq, best.power);
    }
    Ok(result)
}

/// Tune `source` to the strongest entry of `result`.
///
/// Refuses with [`RxError::ScanEmpty`] rather than picking an arbitrary
/// frequency, leaving the source where it was.
pub fn tune_to_best<S: IqSource + ?Sized>(
    source: &mut S,
    result: &ScanResult,
) -> RxResult<ScanEntry> {
    let best = result.best()?;
    source.set_frequency(best.freq.hz)?;
    tracing::info!("Auto-tuned to {} (power {:.6})", best.freq, best.power);
    Ok(best)
}

/// Scan, then tune to the strongest candidate.
pub fn auto_tune<S: IqSource + ?Sized>(
    source: &mut S,
    range: FreqRange,
    step_hz: u64,
    settings: &ScanSettings,
    fallback: Freq,
) -> RxResult<(ScanResult, ScanEntry)> {
    let result = scan(source, range, step_hz, settings)?;
    match tune_to_best(source, &result) {
        Ok(best) => Ok((result, best)),
        Err(err @ RxError::ScanEmpty(_)) => {
            // Scanning left the tuner at the last candidate.
            source.set_frequency(fallback.hz)?;
            Err(err)
        }
        Err(err) => Err(err),
    }
}
