// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Configuration file support for the `fmrx` binary.
//!
//! Config is loaded from the `[fmrx-server]` section of `fmrx.toml`.
//! Default search order:
//! 1. Path specified via `--config` CLI argument
//! 2. `./fmrx.toml`
//! 3. `~/.config/fmrx/fmrx.toml`
//! 4. `/etc/fmrx/fmrx.toml`

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use fmrx_app::{ConfigError, ConfigFile};
use fmrx_core::{FreqRange, Gain, PipelineConfig, RxResult};
use fmrx_receiver::{IqFormat, ScanSettings, ToneStation};

/// Top-level configuration of the `fmrx` binary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub general: GeneralConfig,
    /// Where IQ samples come from.
    pub source: SourceConfig,
    /// Initial frequency and gain.
    pub tuning: TuningConfig,
    /// Demodulation chain, sink buffer and spectrum settings.
    pub pipeline: PipelineConfig,
    /// Where audio goes.
    pub audio: AudioConfig,
    /// Channel scan and auto-tune.
    pub scan: ScanConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: Option<String>,
    /// Seconds between status log lines; 0 disables them.
    pub status_interval_secs: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: None,
            status_interval_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Silence, for exercising the pipeline.
    Mock,
    /// Synthetic FM stations.
    #[default]
    Tone,
    /// Raw IQ capture file.
    File,
    /// SoapySDR device (needs the `soapysdr` feature).
    Soapysdr,
}

/// IQ source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub kind: SourceKind,
    /// SoapySDR device arguments (e.g. "driver=rtlsdr").
    pub args: String,
    /// Hardware filter bandwidth in Hz; 0 keeps the device default.
    pub bandwidth_hz: u32,
    /// Capture file for `kind = "file"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Sample encoding of the capture file.
    pub format: IqFormat,
    /// Restart the capture file at its end instead of stopping.
    pub looping: bool,
    /// Release synthetic and file samples at the capture rate.
    pub paced: bool,
    /// Stations heard by `kind = "tone"`.
    pub stations: Vec<ToneStation>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::default(),
            args: "driver=rtlsdr".to_string(),
            bandwidth_hz: 0,
            path: None,
            format: IqFormat::default(),
            looping: false,
            paced: true,
            stations: vec![
                ToneStation {
                    freq_hz: 107_700_000,
                    amplitude: 0.8,
                    ..ToneStation::default()
                },
                ToneStation {
                    freq_hz: 101_500_000,
                    amplitude: 0.5,
                    audio_hz: 440.0,
                    ..ToneStation::default()
                },
            ],
        }
    }
}

/// Initial tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TuningConfig {
    /// Center frequency in Hz.
    pub freq_hz: u64,
    pub gain: GainConfig,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            freq_hz: 107_700_000,
            gain: GainConfig::default(),
        }
    }
}

/// Gain control mode for the front end.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GainConfig {
    /// "auto" (hardware AGC) or "manual" (fixed dB).
    pub mode: String,
    /// Gain in dB; effective only when mode = "manual".
    pub value: f64,
}

impl Default for GainConfig {
    fn default() -> Self {
        Self {
            mode: "auto".to_string(),
            value: 40.0,
        }
    }
}

impl GainConfig {
    pub fn gain(&self) -> RxResult<Gain> {
        Gain::from_mode(&self.mode, self.value)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    /// Discard audio.
    #[default]
    Null,
    /// Sound card via cpal (needs the `cpal` feature).
    Cpal,
}

/// Audio output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub kind: OutputKind,
    /// Output device name; the default device when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    /// Consume frames at the audio rate when `kind = "null"`.
    pub paced: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            kind: OutputKind::default(),
            device: None,
            paced: true,
        }
    }
}

/// Channel scan settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Scan before streaming and tune to the strongest channel.
    pub auto_tune: bool,
    /// First candidate in Hz.
    pub start_hz: u64,
    /// Exclusive upper bound in Hz.
    pub stop_hz: u64,
    pub step_hz: u64,
    /// Samples measured per candidate.
    pub capture_len: usize,
    /// Samples discarded after each retune.
    pub settle_samples: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        let settings = ScanSettings::default();
        Self {
            auto_tune: false,
            start_hz: 101_000_000,
            stop_hz: 102_000_000,
            step_hz: 200_000,
            capture_len: settings.capture_len,
            settle_samples: settings.settle_samples,
        }
    }
}

impl ScanConfig {
    pub fn range(&self) -> FreqRange {
        FreqRange::new(self.start_hz, self.stop_hz)
    }

    pub fn settings(&self) -> ScanSettings {
        ScanSettings {
            capture_len: self.capture_len,
            settle_samples: self.settle_samples,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), String> {
        validate_log_level(self.general.log_level.as_deref())?;

        if self.tuning.freq_hz == 0 {
            return Err("[tuning].freq_hz must be > 0".to_string());
        }
        self.tuning
            .gain
            .gain()
            .map_err(|e| format!("[tuning.gain]: {}", e))?;

        self.pipeline
            .validate()
            .map_err(|e| format!("[pipeline]: {}", e))?;

        match self.source.kind {
            SourceKind::File if self.source.path.is_none() => {
                return Err("[source].path is required when kind = \"file\"".to_string());
            }
            SourceKind::Soapysdr if self.source.args.trim().is_empty() => {
                return Err("[source].args must not be empty when kind = \"soapysdr\"".to_string());
            }
            SourceKind::Tone if self.source.stations.is_empty() => {
                return Err("[source].stations must not be empty when kind = \"tone\"".to_string());
            }
            _ => {}
        }

        if self.scan.auto_tune {
            if self.scan.start_hz >= self.scan.stop_hz {
                return Err("[scan].start_hz must be below [scan].stop_hz".to_string());
            }
            if self.scan.step_hz == 0 {
                return Err("[scan].step_hz must be > 0".to_string());
            }
            if self.scan.capture_len == 0 {
                return Err("[scan].capture_len must be > 0".to_string());
            }
        }

        Ok(())
    }

    /// Load configuration from a specific file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        <Self as ConfigFile>::load_from_file(path)
    }

    /// Load configuration from the default search paths.
    /// Returns default config if no config file is found.
    pub fn load_from_default_paths() -> Result<(Self, Option<PathBuf>), ConfigError> {
        <Self as ConfigFile>::load_from_default_paths()
    }

    /// Generate the full default configuration wrapped under the
    /// `[fmrx-server]` section header.
    pub fn example_combined_toml() -> String {
        #[derive(serde::Serialize)]
        struct Wrapper {
            #[serde(rename = "fmrx-server")]
            inner: ServerConfig,
        }
        let example = ServerConfig {
            general: GeneralConfig {
                log_level: Some("info".to_string()),
                ..GeneralConfig::default()
            },
            ..ServerConfig::default()
        };
        toml::to_string_pretty(&Wrapper { inner: example }).unwrap_or_default()
    }
}

fn validate_log_level(level: Option<&str>) -> Result<(), String> {
    if let Some(level) = level {
        match level {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(format!(
                    "[general].log_level '{}' is invalid (expected one of: trace, debug, info, warn, error)",
                    level
                ))
            }
        }
    }
    Ok(())
}

impl ConfigFile for ServerConfig {
    fn section_key() -> &'static str {
        "fmrx-server"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fmrx_core::{OverflowPolicy, ResamplerStrategy};

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.source.kind, SourceKind::Tone);
        assert_eq!(config.tuning.freq_hz, 107_700_000);
        assert_eq!(config.tuning.gain.gain().unwrap(), Gain::Auto);
        assert_eq!(config.pipeline.sample_rate, 1_024_000);
        assert_eq!(config.pipeline.audio_rate, 48_000);
        assert_eq!(config.audio.kind, OutputKind::Null);
        assert!(!config.scan.auto_tune);
        assert_eq!(config.scan.step_hz, 200_000);
        assert_eq!(config.scan.capture_len, 32 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
[general]
log_level = "debug"
status_interval_secs = 0

[source]
kind = "file"
path = "/tmp/capture.cu8"
format = "cs16"
looping = true

[tuning]
freq_hz = 99500000

[tuning.gain]
mode = "manual"
value = 40.0

[pipeline]
sample_rate = 2400000
channel_bandwidth_hz = 80000
resampler = "cascade"
overflow_policy = "drop-oldest"
deemphasis_us = 50.0

[audio]
kind = "cpal"
device = "pulse"

[scan]
auto_tune = true
start_hz = 88000000
stop_hz = 108000000
step_hz = 100000
"#;

        let config: ServerConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.general.log_level, Some("debug".to_string()));
        assert_eq!(config.source.kind, SourceKind::File);
        assert_eq!(config.source.format, IqFormat::Cs16);
        assert!(config.source.looping);
        assert_eq!(config.tuning.gain.gain().unwrap(), Gain::Manual(40.0));
        assert_eq!(config.pipeline.sample_rate, 2_400_000);
        assert_eq!(config.pipeline.channel_bandwidth_hz, 80_000);
        assert_eq!(config.pipeline.resampler, ResamplerStrategy::Cascade);
        assert_eq!(config.pipeline.overflow_policy, OverflowPolicy::DropOldest);
        // Unspecified pipeline fields keep their defaults.
        assert_eq!(config.pipeline.audio_rate, 48_000);
        assert_eq!(config.audio.device.as_deref(), Some("pulse"));
        assert_eq!(
            config.scan.range(),
            FreqRange::new(88_000_000, 108_000_000)
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_example_combined_toml_parses() {
        let example = ServerConfig::example_combined_toml();
        let config = ServerConfig::load_from_str(&example).unwrap();
        assert_eq!(config.general.log_level, Some("info".to_string()));
        assert_eq!(config.source.stations.len(), 2);
        assert_eq!(config.pipeline.fft_size, 16_384);
    }

    #[test]
    fn test_validate_rejects_bad_log_level() {
        let mut config = ServerConfig::default();
        config.general.log_level = Some("loud".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_file_source_needs_path() {
        let mut config = ServerConfig::default();
        config.source.kind = SourceKind::File;
        assert!(config.validate().unwrap_err().contains("[source].path"));
        config.source.path = Some(PathBuf::from("capture.cu8"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_reports_pipeline_errors() {
        let mut config = ServerConfig::default();
        config.pipeline.audio_rate = 2_000_000;
        let err = config.validate().unwrap_err();
        assert!(err.starts_with("[pipeline]"), "{err}");
    }

    #[test]
    fn test_validate_scan_range_only_when_enabled() {
        let mut config = ServerConfig::default();
        config.scan.start_hz = 108_000_000;
        config.scan.stop_hz = 88_000_000;
        assert!(config.validate().is_ok());
        config.scan.auto_tune = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_gain_mode() {
        let mut config = ServerConfig::default();
        config.tuning.gain.mode = "agc".to_string();
        assert!(config.validate().unwrap_err().contains("[tuning.gain]"));
    }
}
