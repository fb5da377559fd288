// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{RxError, RxResult};

/// Front-end gain setting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gain {
    /// Hardware AGC.
    #[default]
    Auto,
    /// Fixed gain in dB.
    Manual(f64),
}

impl Gain {
    /// Build from the `mode`/`value` pair used in config files.
    pub fn from_mode(mode: &str, value: f64) -> RxResult<Self> {
        match mode.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Gain::Auto),
            "manual" => {
                if !value.is_finite() || value < 0.0 {
                    return Err(RxError::Configuration(format!(
                        "manual gain must be a non-negative dB value (got {value})"
                    )));
                }
                Ok(Gain::Manual(value))
            }
            other => Err(RxError::Configuration(format!(
                "gain mode '{other}' is invalid (expected 'auto' or 'manual')"
            ))),
        }
    }
}

impl fmt::Display for Gain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gain::Auto => write!(f, "auto"),
            Gain::Manual(db) => write!(f, "{db:.1} dB"),
        }
    }
}
