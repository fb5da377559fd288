// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Audio output backends fed by the output thread.

use std::time::Duration;

use fmrx_core::{AudioFrame, RxResult};

use crate::source::Pacer;

/// Factory for audio sinks.
///
/// The engine calls [`AudioOutput::open`] on its output thread, so the
/// returned sink never has to cross threads (device streams often cannot).
pub trait AudioOutput: Send + Sync + 'static {
    /// Open a mono f32 sink at `sample_rate` taking frames of `frame_len`.
    fn open(&self, sample_rate: u32, frame_len: usize) -> RxResult<Box<dyn AudioSink>>;

    fn describe(&self) -> String;
}

/// An opened audio device.
pub trait AudioSink {
    /// Hand one frame to the device, blocking at the device cadence.
    fn write_frame(&mut self, frame: &AudioFrame) -> RxResult<()>;

    /// Let queued audio play out and release the device.
    fn close(&mut self) {}
}

/// Discards audio, optionally at the rate a real device would consume it.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullOutput {
    paced: bool,
}

impl NullOutput {
    pub fn new(paced: bool) -> Self {
        Self { paced }
    }
}

impl AudioOutput for NullOutput {
    fn open(&self, sample_rate: u32, _frame_len: usize) -> RxResult<Box<dyn AudioSink>> {
        Ok(Box::new(NullSink {
            pacer: self.paced.then(|| Pacer::new(sample_rate)),
        }))
    }

    fn describe(&self) -> String {
        "null".to_string()
    }
}

struct NullSink {
    pacer: Option<Pacer>,
}

impl AudioSink for NullSink {
    fn write_frame(&mut self, frame: &AudioFrame) -> RxResult<()> {
        if let Some(pacer) = self.pacer.as_mut() {
            pacer.pace(frame.len());
        }
        Ok(())
    }
}

/// Duration of `samples` at `sample_rate`.
pub(crate) fn samples_duration(samples: usize, sample_rate: u32) -> Duration {
    Duration::from_secs_f64(samples as f64 / sample_rate.max(1) as f64)
}

#[cfg(feature = "cpal")]
pub use self::device::{list_output_devices, CpalOutput};

#[cfg(feature = "cpal")]
mod device {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex, PoisonError};

    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use fmrx_core::{AudioFrame, RxError, RxResult};

    use super::{samples_duration, AudioOutput, AudioSink};

    /// Frames buffered device-side before `write_frame` blocks.
    const DEVICE_FRAMES: usize = 4;

    fn sink_err<E: std::fmt::Display>(what: &'static str) -> impl FnOnce(E) -> RxError {
        move |e| RxError::Sink(format!("{}: {}", what, e))
    }

    /// Names of every output device on the default host.
    pub fn list_output_devices() -> RxResult<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .output_devices()
            .map_err(sink_err("cannot enumerate output devices"))?;
        Ok(devices.filter_map(|d| d.name().ok()).collect())
    }

    /// Plays through a cpal output device, the default one unless named.
    #[derive(Debug, Clone, Default)]
    pub struct CpalOutput {
        device_name: Option<String>,
    }

    impl CpalOutput {
        pub fn new(device_name: Option<String>) -> Self {
            Self { device_name }
        }
    }

    impl AudioOutput for CpalOutput {
        fn open(&self, sample_rate: u32, frame_len: usize) -> RxResult<Box<dyn AudioSink>> {
            let host = cpal::default_host();
            let device = if let Some(ref name) = self.device_name {
                host.output_devices()
                    .map_err(sink_err("cannot enumerate output devices"))?
                    .find(|d| d.name().map(|n| n == *name).unwrap_or(false))
                    .ok_or_else(|| {
                        RxError::Sink(format!("audio output device '{}' not found", name))
                    })?
            } else {
                host.default_output_device()
                    .ok_or_else(|| RxError::Sink("no default audio output device".into()))?
            };

            tracing::info!(
                "Audio playback: using device '{}'",
                device.name().unwrap_or_else(|_| "unknown".into())
            );

            let config = cpal::StreamConfig {
                channels: 1,
                sample_rate: cpal::SampleRate(sample_rate),
                buffer_size: cpal::BufferSize::Default,
            };

            let ring = Arc::new(Mutex::new(VecDeque::<f32>::with_capacity(
                frame_len * DEVICE_FRAMES * 2,
            )));
            let failure: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));

            let stream = device
                .build_output_stream(
                    &config,
                    {
                        let ring = ring.clone();
                        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                            let mut ring = ring.lock().unwrap_or_else(PoisonError::into_inner);
                            for sample in data.iter_mut() {
                                *sample = ring.pop_front().unwrap_or(0.0);
                            }
                        }
                    },
                    {
                        let failure = failure.clone();
                        move |err| {
                            tracing::warn!("Audio output stream error: {}", err);
                            *failure.lock().unwrap_or_else(PoisonError::into_inner) =
                                Some(err.to_string());
                        }
                    },
                    None,
                )
                .map_err(sink_err("cannot build output stream"))?;
            stream.play().map_err(sink_err("cannot start output stream"))?;
            tracing::info!("Audio playback: ready ({} Hz, mono)", sample_rate);

            Ok(Box::new(CpalSink {
                _stream: stream,
                ring,
                failure,
                sample_rate,
                max_buffered: frame_len.max(1) * DEVICE_FRAMES,
            }))
        }

        fn describe(&self) -> String {
            match &self.device_name {
                Some(name) => format!("cpal ({})", name),
                None => "cpal (default device)".to_string(),
            }
        }
    }

    struct CpalSink {
        _stream: cpal::Stream,
        ring: Arc<Mutex<VecDeque<f32>>>,
        failure: Arc<Mutex<Option<String>>>,
        sample_rate: u32,
        max_buffered: usize,
    }

    impl CpalSink {
        fn buffered(&self) -> usize {
            self.ring.lock().unwrap_or_else(PoisonError::into_inner).len()
        }

        fn check_failure(&self) -> RxResult<()> {
            match self
                .failure
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
            {
                Some(msg) => Err(RxError::Sink(msg)),
                None => Ok(()),
            }
        }
    }

    impl AudioSink for CpalSink {
        fn write_frame(&mut self, frame: &AudioFrame) -> RxResult<()> {
            self.check_failure()?;
            let poll = samples_duration(frame.len() / 4 + 1, self.sample_rate);
            while self.buffered() + frame.len() > self.max_buffered {
                std::thread::sleep(poll);
                self.check_failure()?;
            }
            self.ring
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend(frame.samples());
            Ok(())
        }

        fn close(&mut self) {
            let remaining = self.buffered();
            if remaining > 0 {
                std::thread::sleep(samples_duration(remaining, self.sample_rate));
            }
        }
    }
}
