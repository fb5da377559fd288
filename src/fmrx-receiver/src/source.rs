// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! IQ sample source abstraction plus the synthetic sources.

use std::f64::consts::TAU;
use std::time::{Duration, Instant};

use fmrx_core::{Freq, Gain, RxError, RxResult, SampleBlock};
use num_complex::Complex;
use serde::{Deserialize, Serialize};

/// Abstraction over any IQ sample source (SDR hardware, file or synthetic).
///
/// Sources are opened by their constructors and owned by exactly one
/// thread at a time; the engine moves them between its capture thread and
/// its control side.
pub trait IqSource: Send + 'static {
    /// Read the next block of IQ samples into `buf`.
    /// Returns the number of samples written.
    fn read_into(&mut self, buf: &mut [Complex<f32>]) -> RxResult<usize>;

    fn set_frequency(&mut self, hz: u64) -> RxResult<()>;

    fn set_sample_rate(&mut self, hz: u32) -> RxResult<()>;

    fn set_gain(&mut self, gain: Gain) -> RxResult<()>;

    /// Current capture rate, used to tag blocks.
    fn sample_rate(&self) -> u32;

    /// Release the underlying device. Reads after close fail.
    fn close(&mut self) {}

    /// Short human readable description for logs.
    fn describe(&self) -> String;

    /// Read a block of `size` samples tagged with the capture rate.
    ///
    /// Devices may hand back fewer samples per read than asked for, so
    /// reads repeat until the block is full. The block comes back short
    /// only when the stream ends (`Ok(0)`) or fails after samples were
    /// already gathered; the failure then resurfaces on the next call.
    fn read_block(&mut self, size: usize) -> RxResult<SampleBlock> {
        let mut buf = vec![Complex::new(0.0, 0.0); size];
        let mut filled = 0;
        while filled < size {
            match self.read_into(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n.min(size - filled),
                Err(e) if filled == 0 => return Err(e),
                Err(e) => {
                    tracing::debug!("IQ read ended a partial block: {}", e);
                    break;
                }
            }
        }
        buf.truncate(filled);
        Ok(SampleBlock::new(buf, self.sample_rate()))
    }
}

/// Sleeps so that successive blocks are released at the capture rate.
///
/// Used by sources that would otherwise produce samples as fast as the CPU
/// allows. Deadlines are absolute so rounding does not accumulate.
#[derive(Debug)]
pub struct Pacer {
    sample_rate: u32,
    started: Option<Instant>,
    released: u64,
}

impl Pacer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            started: None,
            released: 0,
        }
    }

    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        *self = Self::new(sample_rate);
    }

    /// Account for `samples` and sleep until they are due.
    pub fn pace(&mut self, samples: usize) {
        let started = *self.started.get_or_insert_with(Instant::now);
        self.released += samples as u64;
        let due = Duration::from_secs_f64(self.released as f64 / self.sample_rate as f64);
        if let Some(wait) = due.checked_sub(started.elapsed()) {
            std::thread::sleep(wait);
        }
    }
}

fn closed_error(what: &str) -> RxError {
    RxError::SourceRead(format!("{what} is closed"))
}

/// IQ source that produces silence (all zeros). Used when no SDR hardware is present.
pub struct MockIqSource {
    sample_rate: u32,
    freq: Freq,
    gain: Gain,
    pacer: Option<Pacer>,
    closed: bool,
}

impl MockIqSource {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            freq: Freq::new(0),
            gain: Gain::Auto,
            pacer: None,
            closed: false,
        }
    }

    /// Release blocks at the capture rate instead of instantly.
    pub fn paced(mut self) -> Self {
        self.pacer = Some(Pacer::new(self.sample_rate));
        self
    }

    pub fn frequency(&self) -> Freq {
        self.freq
    }

    pub fn gain(&self) -> Gain {
        self.gain
    }
}

impl IqSource for MockIqSource {
    fn read_into(&mut self, buf: &mut [Complex<f32>]) -> RxResult<usize> {
        if self.closed {
            return Err(closed_error("mock source"));
        }
        buf.fill(Complex::new(0.0, 0.0));
        if let Some(pacer) = self.pacer.as_mut() {
            pacer.pace(buf.len());
        }
        Ok(buf.len())
    }

    fn set_frequency(&mut self, hz: u64) -> RxResult<()> {
        self.freq = Freq::new(hz);
        Ok(())
    }

    fn set_sample_rate(&mut self, hz: u32) -> RxResult<()> {
        self.sample_rate = hz;
        if let Some(pacer) = self.pacer.as_mut() {
            pacer.set_sample_rate(hz);
        }
        Ok(())
    }

    fn set_gain(&mut self, gain: Gain) -> RxResult<()> {
        self.gain = gain;
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn describe(&self) -> String {
        "mock (silence)".to_string()
    }
}

/// One synthetic FM broadcast station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToneStation {
    /// Carrier frequency in Hz.
    pub freq_hz: u64,
    /// Carrier amplitude (power is its square).
    pub amplitude: f32,
    /// Modulating tone in Hz.
    pub audio_hz: f32,
    /// Peak frequency deviation in Hz.
    pub deviation_hz: f32,
}

impl Default for ToneStation {
    fn default() -> Self {
        Self {
            freq_hz: 101_500_000,
            amplitude: 0.5,
            audio_hz: 1_000.0,
            deviation_hz: 75_000.0,
        }
    }
}

/// Synthetic front end that hears FM stations relative to its tuning.
///
/// A station contributes only while its carrier lies inside the captured
/// band, so retuning changes what is received just like real hardware.
pub struct ToneIqSource {
    stations: Vec<ToneStation>,
    /// Carrier phase per station, in radians.
    phases: Vec<f64>,
    sample_rate: u32,
    center_hz: u64,
    gain: Gain,
    /// Samples produced since open, drives the modulating tone.
    n: u64,
    pacer: Option<Pacer>,
    closed: bool,
}

impl ToneIqSource {
    pub fn open(stations: Vec<ToneStation>, sample_rate: u32, center_hz: u64) -> Self {
        let phases = vec![0.0; stations.len()];
        Self {
            stations,
            phases,
            sample_rate,
            center_hz,
            gain: Gain::Auto,
            n: 0,
            pacer: None,
            closed: false,
        }
    }

    pub fn paced(mut self) -> Self {
        self.pacer = Some(Pacer::new(self.sample_rate));
        self
    }

    fn in_band(&self, station: &ToneStation) -> Option<f64> {
        let offset = station.freq_hz as f64 - self.center_hz as f64;
        (offset.abs() < self.sample_rate as f64 / 2.0).then_some(offset)
    }

    /// Linear gain applied on top of each station's amplitude.
    fn gain_factor(&self) -> f32 {
        match self.gain {
            Gain::Auto => 1.0,
            Gain::Manual(db) => 10f32.powf(db as f32 / 20.0),
        }
    }
}

impl IqSource for ToneIqSource {
    fn read_into(&mut self, buf: &mut [Complex<f32>]) -> RxResult<usize> {
        if self.closed {
            return Err(closed_error("tone source"));
        }
        buf.fill(Complex::new(0.0, 0.0));
        let fs = self.sample_rate.max(1) as f64;
        let gain = self.gain_factor();

        for idx in 0..self.stations.len() {
            let station = &self.stations[idx];
            let Some(offset) = self.in_band(station) else {
                continue;
            };
            let amplitude = station.amplitude * gain;
            let audio_step = TAU * station.audio_hz as f64 / fs;
            let deviation = station.deviation_hz as f64;
            let mut phase = self.phases[idx];
            for (k, sample) in buf.iter_mut().enumerate() {
                let t = (self.n + k as u64) as f64;
                let inst = offset + deviation * (audio_step * t).sin();
                phase = (phase + TAU * inst / fs).rem_euclid(TAU);
                *sample += Complex::from_polar(amplitude, phase as f32);
            }
            self.phases[idx] = phase;
        }
        self.n += buf.len() as u64;

        if let Some(pacer) = self.pacer.as_mut() {
            pacer.pace(buf.len());
        }
        Ok(buf.len())
    }

    fn set_frequency(&mut self, hz: u64) -> RxResult<()> {
        if hz == 0 {
            return Err(RxError::Configuration("frequency must be > 0".into()));
        }
        self.center_hz = hz;
        Ok(())
    }

    fn set_sample_rate(&mut self, hz: u32) -> RxResult<()> {
        if hz == 0 {
            return Err(RxError::Configuration("sample rate must be > 0".into()));
        }
        self.sample_rate = hz;
        if let Some(pacer) = self.pacer.as_mut() {
            pacer.set_sample_rate(hz);
        }
        Ok(())
    }

    fn set_gain(&mut self, gain: Gain) -> RxResult<()> {
        self.gain = gain;
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn describe(&self) -> String {
        format!(
            "tone ({} station(s), tuned to {})",
            self.stations.len(),
            Freq::new(self.center_hz)
        )
    }
}
