// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use serde::Serialize;

use super::freq::Freq;
use crate::error::{RxError, RxResult};

/// One measured scan candidate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScanEntry {
    pub freq: Freq,
    /// Mean squared magnitude of the captured samples.
    pub power: f64,
}

/// Scan candidates ordered by descending power.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScanResult {
    entries: Vec<ScanEntry>,
}

impl ScanResult {
    /// Sort `entries` strongest-first. Ties keep their sweep order.
    pub fn from_measurements(mut entries: Vec<ScanEntry>) -> Self {
        entries.sort_by(|a, b| b.power.total_cmp(&a.power));
        Self { entries }
    }

    pub fn entries(&self) -> &[ScanEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The strongest candidate, refusing empty or powerless scans.
    pub fn best(&self) -> RxResult<ScanEntry> {
        let Some(first) = self.entries.first() else {
            return Err(RxError::ScanEmpty("no candidates were measured".into()));
        };
        if !first.power.is_finite() || first.power <= 0.0 {
            return Err(RxError::ScanEmpty(format!(
                "all {} candidate(s) measured zero power",
                self.entries.len()
            )));
        }
        Ok(*first)
    }
}
