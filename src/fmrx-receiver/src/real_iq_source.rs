// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Real SoapySDR device IQ source implementation.

use fmrx_core::{Gain, RxError, RxResult};
use num_complex::Complex;
use soapysdr::{Device, Direction, RxStream};

use crate::source::IqSource;

/// Longest a single stream read may block, in microseconds.
const READ_TIMEOUT_US: i64 = 1_000_000;

fn config_err(what: &str, e: soapysdr::Error) -> RxError {
    RxError::Configuration(format!("{}: {}", what, e))
}

/// Real SoapySDR device IQ source.
///
/// Reads IQ samples from an activated RX stream on channel 0.
pub struct RealIqSource {
    args: String,
    device: Device,
    stream: Option<RxStream<Complex<f32>>>,
    sample_rate: u32,
}

impl RealIqSource {
    /// Open and configure a device.
    ///
    /// # Parameters
    /// - `args`: SoapySDR device arguments string (e.g., `"driver=rtlsdr"`)
    /// - `center_freq_hz`: Center frequency in Hz
    /// - `sample_rate_hz`: IQ sample rate in Hz
    /// - `bandwidth_hz`: Hardware filter bandwidth in Hz, 0 keeps the default
    /// - `gain`: hardware AGC or a manual gain in dB
    pub fn open(
        args: &str,
        center_freq_hz: u64,
        sample_rate_hz: u32,
        bandwidth_hz: u32,
        gain: Gain,
    ) -> RxResult<Self> {
        tracing::info!("Initializing SoapySDR device with args: {}", args);

        let device = Device::new(args).map_err(|e| {
            RxError::SourceRead(format!(
                "Failed to open SoapySDR device (args={}): {}",
                args, e
            ))
        })?;

        let mut source = Self {
            args: args.to_string(),
            device,
            stream: None,
            sample_rate: sample_rate_hz,
        };
        source.set_sample_rate(sample_rate_hz)?;
        source.set_frequency(center_freq_hz)?;

        if bandwidth_hz > 0 {
            if let Err(e) = source
                .device
                .set_bandwidth(Direction::Rx, 0, bandwidth_hz as f64)
            {
                tracing::warn!("Failed to set bandwidth: {}; continuing with default", e);
            }
        }
        source.set_gain(gain)?;

        let mut stream = source
            .device
            .rx_stream::<Complex<f32>>(&[0])
            .map_err(|e| config_err("Failed to create RX stream", e))?;
        stream
            .activate(None)
            .map_err(|e| config_err("Failed to activate RX stream", e))?;
        source.stream = Some(stream);

        tracing::info!("RealIqSource initialized successfully");
        Ok(source)
    }
}

impl IqSource for RealIqSource {
    fn read_into(&mut self, buf: &mut [Complex<f32>]) -> RxResult<usize> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| RxError::SourceRead("SoapySDR stream is closed".into()))?;
        stream
            .read(&mut [buf], READ_TIMEOUT_US)
            .map_err(|e| RxError::SourceRead(format!("SoapySDR read failed: {}", e)))
    }

    fn set_frequency(&mut self, hz: u64) -> RxResult<()> {
        self.device
            .set_frequency(Direction::Rx, 0, hz as f64, ())
            .map_err(|e| config_err("Failed to set frequency", e))?;
        let actual = self.device.frequency(Direction::Rx, 0).unwrap_or(hz as f64);
        tracing::info!("Set center frequency to {} Hz (actual: {} Hz)", hz, actual);
        Ok(())
    }

    fn set_sample_rate(&mut self, hz: u32) -> RxResult<()> {
        self.device
            .set_sample_rate(Direction::Rx, 0, hz as f64)
            .map_err(|e| config_err("Failed to set sample rate", e))?;
        let actual = self.device.sample_rate(Direction::Rx, 0).unwrap_or(hz as f64);
        tracing::info!("Set sample rate to {} Hz (actual: {} Hz)", hz, actual);
        self.sample_rate = hz;
        Ok(())
    }

    fn set_gain(&mut self, gain: Gain) -> RxResult<()> {
        match gain {
            Gain::Auto => {
                if let Err(e) = self.device.set_gain_mode(Direction::Rx, 0, true) {
                    tracing::warn!("Hardware AGC unavailable: {}; keeping current gain", e);
                }
            }
            Gain::Manual(db) => {
                if let Err(e) = self.device.set_gain_mode(Direction::Rx, 0, false) {
                    tracing::debug!("Could not disable AGC: {}", e);
                }
                self.device
                    .set_gain(Direction::Rx, 0, db)
                    .map_err(|e| config_err("Failed to set gain", e))?;
                let actual = self.device.gain(Direction::Rx, 0).unwrap_or(db);
                tracing::info!("Set gain to {} dB (actual: {} dB)", db, actual);
            }
        }
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.deactivate(None) {
                tracing::warn!("Failed to deactivate RX stream: {}", e);
            }
        }
    }

    fn describe(&self) -> String {
        format!("soapysdr ({})", self.args)
    }
}

impl Drop for RealIqSource {
    fn drop(&mut self) {
        self.close();
    }
}
