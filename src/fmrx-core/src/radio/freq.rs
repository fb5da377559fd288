// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{RxError, RxResult};

/// Frequency wrapper (Hz).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Freq {
    pub hz: u64,
}

impl Freq {
    #[must_use]
    pub fn new(hz: u64) -> Self {
        Self { hz }
    }

    /// Build from a megahertz value, rounding to the nearest hertz.
    #[must_use]
    pub fn from_mhz(mhz: f64) -> Self {
        Self {
            hz: (mhz * 1e6).round().max(0.0) as u64,
        }
    }

    pub fn mhz(&self) -> f64 {
        self.hz as f64 / 1e6
    }
}

impl fmt::Display for Freq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3} MHz", self.mhz())
    }
}

/// Half-open frequency range `[start, stop)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreqRange {
    pub start_hz: u64,
    pub stop_hz: u64,
}

impl FreqRange {
    pub fn new(start_hz: u64, stop_hz: u64) -> Self {
        Self { start_hz, stop_hz }
    }

    /// Candidate frequencies `start, start + step, ...` strictly below `stop`.
    pub fn candidates(&self, step_hz: u64) -> RxResult<Vec<Freq>> {
        if step_hz == 0 {
            return Err(RxError::Configuration("scan step must be > 0".into()));
        }
        if self.stop_hz <= self.start_hz {
            return Err(RxError::Configuration(format!(
                "scan range is empty ({} Hz .. {} Hz)",
                self.start_hz, self.stop_hz
            )));
        }
        Ok((self.start_hz..self.stop_hz)
            .step_by(step_hz as usize)
            .map(Freq::new)
            .collect())
    }

    pub fn contains(&self, freq: Freq) -> bool {
        freq.hz >= self.start_hz && freq.hz < self.stop_hz
    }
}
