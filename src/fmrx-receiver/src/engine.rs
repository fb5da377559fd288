// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Receiver state machine and its two threads.
//!
//! A running session owns a capture thread, which reads IQ blocks and runs
//! the DSP chain, and an output thread, which drains the [`SinkBuffer`] into
//! the audio device. The sink buffer is the only thing they share.
//!
//! ```text
//! Idle -> Configuring -> Running -> Reconfiguring -> Running
//!                                -> Stopping -> Idle
//! ```
//!
//! Reconfiguration and scans quiesce the capture thread, taking the source
//! and filter state back, and start a fresh capture thread afterwards. The
//! output thread keeps playing what is already buffered.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use fmrx_core::{
    AudioFrame, EngineState, Freq, FreqRange, Gain, PipelineConfig, ReceiverEvent,
    ReceiverStatus, RxError, RxResult, SampleBlock, ScanEntry, ScanResult, WaterfallImage,
};
use tokio::sync::broadcast;

use crate::audio::AudioOutput;
use crate::dsp::{spectrum_bin_frequencies, DspChain, SpectrumAnalyzer, SpectrumShared};
use crate::scan::{self, ScanSettings};
use crate::sink::{PopOutcome, PushOutcome, SinkBuffer};
use crate::source::IqSource;

/// Event channel capacity; slow subscribers see `Lagged` rather than
/// stalling the DSP thread.
const EVENT_CAPACITY: usize = 256;

/// Back-off between retried source reads.
const READ_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Front-end settings applied on start and by `reconfigure`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tuning {
    pub freq: Freq,
    pub gain: Gain,
}

/// State visible to both the control side and the worker threads.
struct Shared {
    state: Mutex<EngineState>,
    message: Mutex<String>,
    events: broadcast::Sender<ReceiverEvent>,
}

impl Shared {
    fn publish(&self, event: ReceiverEvent) {
        if !matches!(event, ReceiverEvent::StateChanged(_)) {
            *self.message.lock().unwrap_or_else(PoisonError::into_inner) = event.to_string();
        }
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn set_state(&self, state: EngineState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
        tracing::info!("Receiver state: {}", state);
        self.publish(ReceiverEvent::StateChanged(state));
    }

    fn state(&self) -> EngineState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// What the capture thread hands back when it exits.
struct CaptureExit {
    source: Box<dyn IqSource>,
    chain: DspChain,
    result: RxResult<()>,
}

struct Capture {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<CaptureExit>,
}

struct Session {
    config: PipelineConfig,
    tuning: Tuning,
    sink: Arc<SinkBuffer>,
    /// `None` while quiesced, or after the capture thread was lost.
    capture: Option<Capture>,
    output: JoinHandle<RxResult<()>>,
}

/// FM receiver engine.
pub struct Receiver {
    output: Arc<dyn AudioOutput>,
    shared: Arc<Shared>,
    spectrum: SpectrumShared,
    session: Option<Session>,
}

impl Receiver {
    pub fn new(output: Arc<dyn AudioOutput>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            output,
            shared: Arc::new(Shared {
                state: Mutex::new(EngineState::Idle),
                message: Mutex::new(String::new()),
                events,
            }),
            spectrum: SpectrumShared::new(1, 1),
            session: None,
        }
    }

    /// Subscribe to state changes, status text, warnings and errors.
    pub fn subscribe(&self) -> broadcast::Receiver<ReceiverEvent> {
        self.shared.events.subscribe()
    }

    pub fn state(&self) -> EngineState {
        self.shared.state()
    }

    pub fn status(&self) -> ReceiverStatus {
        let message = self
            .shared
            .message
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let mut status = ReceiverStatus {
            state: self.state(),
            message,
            ..ReceiverStatus::default()
        };
        if let Some(session) = &self.session {
            status.freq = Some(session.tuning.freq);
            status.gain = session.tuning.gain;
            status.sample_rate = session.config.sample_rate;
            status.audio_rate = session.config.audio_rate;
            status.stats = session.sink.stats();
            status.queued_frames = session.sink.len();
        }
        status
    }

    /// Latest spectrum row (dB relative to its peak, positive frequencies).
    pub fn spectrum(&self) -> Option<Vec<f32>> {
        self.spectrum.spectrum()
    }

    /// Absolute frequency of every spectrum bin for the current tuning.
    pub fn spectrum_frequencies(&self) -> Option<Vec<f64>> {
        self.session.as_ref().map(|s| {
            spectrum_bin_frequencies(s.tuning.freq.hz, s.config.sample_rate, s.config.fft_size)
        })
    }

    /// Copy of the waterfall, oldest row first.
    pub fn waterfall(&self) -> WaterfallImage {
        self.spectrum.waterfall()
    }

    /// Whether the current run ended on its own (source or sink failure).
    /// Call [`Receiver::stop`] to collect the error and return to idle.
    pub fn is_finished(&self) -> bool {
        self.session
            .as_ref()
            .and_then(|s| s.capture.as_ref())
            .is_some_and(|c| c.thread.is_finished())
    }

    /// Configure `source` and start streaming.
    ///
    /// The receiver takes ownership of the source and closes it when the
    /// session ends, whether by [`Receiver::stop`] or on error.
    pub fn start(
        &mut self,
        mut source: Box<dyn IqSource>,
        config: PipelineConfig,
        tuning: Tuning,
    ) -> RxResult<()> {
        if self.session.is_some() {
            source.close();
            return Err(RxError::InvalidState(self.state()));
        }
        self.shared.set_state(EngineState::Configuring);

        let chain = match prepare(source.as_mut(), &config, tuning) {
            Ok(chain) => chain,
            Err(e) => {
                source.close();
                self.shared.publish(ReceiverEvent::Error(e.clone()));
                self.shared.set_state(EngineState::Idle);
                return Err(e);
            }
        };
        tracing::info!(
            "Starting receiver on {} ({}, gain {})",
            tuning.freq,
            source.describe(),
            tuning.gain
        );

        self.spectrum = SpectrumShared::new(config.waterfall_rows, config.waterfall_cols);
        let sink = Arc::new(SinkBuffer::from_config(&config));

        let output = match spawn_output(
            self.output.clone(),
            sink.clone(),
            &config,
            self.shared.clone(),
        ) {
            Ok(handle) => handle,
            Err(e) => {
                source.close();
                self.shared.set_state(EngineState::Idle);
                return Err(e);
            }
        };

        self.session = Some(Session {
            config,
            tuning,
            sink,
            capture: None,
            output,
        });
        self.shared.set_state(EngineState::Running);
        if let Err(e) = self.resume(source, chain) {
            return self.fail_run(e);
        }
        self.shared.publish(ReceiverEvent::Tuned(tuning.freq));
        Ok(())
    }

    /// Stop the session, draining buffered audio, and release the source
    /// and audio device. Returns the error that ended the run, if any.
    pub fn stop(&mut self) -> RxResult<()> {
        if self.session.is_none() {
            return Err(RxError::InvalidState(self.state()));
        }
        self.shared.set_state(EngineState::Stopping);
        let result = self.teardown();
        self.shared.set_state(EngineState::Idle);
        result
    }

    /// Retune and/or change the capture rate or gain of a running session.
    ///
    /// Every filter is rebuilt from the re-validated configuration. An
    /// invalid request leaves the session running with its old settings.
    pub fn reconfigure(
        &mut self,
        freq: Option<Freq>,
        sample_rate: Option<u32>,
        gain: Option<Gain>,
    ) -> RxResult<()> {
        self.with_quiesced(|source, config, tuning| {
            let mut next = config.clone();
            if let Some(rate) = sample_rate {
                next.sample_rate = rate;
            }
            next.validate()?;
            let next_tuning = Tuning {
                freq: freq.unwrap_or(tuning.freq),
                gain: gain.unwrap_or(tuning.gain),
            };

            if let Err(e) = apply_tuning(source, next.sample_rate, next_tuning) {
                if !e.is_fatal() {
                    apply_tuning(source, config.sample_rate, *tuning).map_err(restore_failed)?;
                }
                return Err(e);
            }
            *config = next;
            *tuning = next_tuning;
            Ok(())
        })?;

        if let Some(session) = &self.session {
            self.shared.publish(ReceiverEvent::Tuned(session.tuning.freq));
        }
        Ok(())
    }

    /// Sweep `range` while running, then return to the current frequency.
    pub fn scan(
        &mut self,
        range: FreqRange,
        step_hz: u64,
        settings: &ScanSettings,
    ) -> RxResult<ScanResult> {
        let result = self.with_quiesced(|source, _config, tuning| {
            let result = scan::scan(source, range, step_hz, settings);
            retune_after_scan(source, tuning.freq, result)
        })?;
        self.shared
            .publish(ReceiverEvent::ScanComplete(result.clone()));
        Ok(result)
    }

    /// Sweep `range` while running and retune to the strongest channel.
    ///
    /// An empty or silent sweep is reported as [`RxError::ScanEmpty`] and
    /// the receiver stays on its current frequency.
    pub fn auto_tune(
        &mut self,
        range: FreqRange,
        step_hz: u64,
        settings: &ScanSettings,
    ) -> RxResult<ScanEntry> {
        let outcome = self.with_quiesced(|source, _config, tuning| {
            let result = match scan::scan(source, range, step_hz, settings) {
                Ok(result) => result,
                Err(e) => return retune_after_scan(source, tuning.freq, Err(e)),
            };
            match scan::tune_to_best(source, &result) {
                Ok(best) => {
                    tuning.freq = best.freq;
                    Ok((result, Ok(best)))
                }
                Err(e) if !e.is_fatal() => {
                    retune_after_scan(source, tuning.freq, Ok(()))?;
                    Ok((result, Err(e)))
                }
                Err(e) => Err(e),
            }
        })?;

        let (result, best) = outcome;
        self.shared.publish(ReceiverEvent::ScanComplete(result));
        match best {
            Ok(best) => {
                self.shared.publish(ReceiverEvent::Tuned(best.freq));
                Ok(best)
            }
            Err(e) => {
                tracing::warn!("Auto-tune refused: {}", e);
                self.shared.publish(ReceiverEvent::Warning(e.clone()));
                Err(e)
            }
        }
    }

    /// Run `op` with the capture thread stopped and its source in hand.
    ///
    /// `op` edits copies of the session configuration and tuning; they are
    /// committed only when it succeeds. A fatal error from `op` ends the
    /// run. Either way the filter chain is rebuilt before capture resumes.
    fn with_quiesced<T, F>(&mut self, op: F) -> RxResult<T>
    where
        F: FnOnce(&mut dyn IqSource, &mut PipelineConfig, &mut Tuning) -> RxResult<T>,
    {
        let state = self.state();
        let running = self
            .session
            .as_ref()
            .is_some_and(|s| s.capture.is_some());
        if state != EngineState::Running || !running {
            return Err(RxError::InvalidState(state));
        }
        self.shared.set_state(EngineState::Reconfiguring);

        let mut source = match self.quiesce() {
            Ok(source) => source,
            // Already announced by the capture thread.
            Err(e) => return self.end_run(e),
        };
        let Some(session) = self.session.as_mut() else {
            source.close();
            return Err(RxError::InvalidState(EngineState::Idle));
        };

        let mut config = session.config.clone();
        let mut tuning = session.tuning;
        let outcome = op(source.as_mut(), &mut config, &mut tuning);
        match &outcome {
            Ok(_) => {
                session.config = config;
                session.tuning = tuning;
            }
            Err(e) if e.is_fatal() => {
                let e = e.clone();
                source.close();
                return self.fail_run(e);
            }
            Err(e) => tracing::warn!("Reconfiguration rejected: {}", e),
        }

        let chain = match DspChain::new(&session.config) {
            Ok(chain) => chain,
            Err(e) => {
                source.close();
                return self.fail_run(e);
            }
        };
        self.shared.set_state(EngineState::Running);
        if let Err(e) = self.resume(source, chain) {
            return self.fail_run(e);
        }
        outcome
    }

    /// Stop the capture thread and take back its source.
    fn quiesce(&mut self) -> RxResult<Box<dyn IqSource>> {
        let capture = self
            .session
            .as_mut()
            .and_then(|s| s.capture.take())
            .ok_or(RxError::InvalidState(EngineState::Idle))?;
        capture.stop.store(true, Ordering::Release);
        let mut exit = join_capture(capture)?;
        match exit.result {
            Ok(()) => Ok(exit.source),
            Err(e) => {
                exit.source.close();
                Err(e)
            }
        }
    }

    /// Start a capture thread for the current session.
    fn resume(&mut self, source: Box<dyn IqSource>, chain: DspChain) -> RxResult<()> {
        let session = self
            .session
            .as_mut()
            .ok_or(RxError::InvalidState(EngineState::Idle))?;
        let stop = Arc::new(AtomicBool::new(false));
        let ctx = CaptureContext {
            config: session.config.clone(),
            sink: session.sink.clone(),
            stop: stop.clone(),
            shared: self.shared.clone(),
            spectrum: self.spectrum.clone(),
        };
        let thread = thread::Builder::new()
            .name("fmrx-capture".to_string())
            .spawn(move || capture_loop(source, chain, ctx))?;
        session.capture = Some(Capture { stop, thread });
        Ok(())
    }

    /// Announce a run-ending error and tear the session down.
    fn fail_run<T>(&mut self, err: RxError) -> RxResult<T> {
        tracing::error!("Receiver run ended: {}", err);
        self.shared.publish(ReceiverEvent::Error(err.clone()));
        self.end_run(err)
    }

    fn end_run<T>(&mut self, err: RxError) -> RxResult<T> {
        self.shared.set_state(EngineState::Stopping);
        if let Err(other) = self.teardown() {
            if other != err {
                tracing::warn!("Additional error during teardown: {}", other);
            }
        }
        self.shared.set_state(EngineState::Idle);
        Err(err)
    }

    /// Join both threads and release every resource of the session.
    ///
    /// Capture stops after its current block, the partial frame is padded
    /// and queued, and the output thread plays out the buffer before it
    /// closes the device.
    fn teardown(&mut self) -> RxResult<()> {
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };

        let mut capture_result = Ok(());
        if let Some(capture) = session.capture.take() {
            capture.stop.store(true, Ordering::Release);
            match join_capture(capture) {
                Ok(mut exit) => {
                    if let Some(tail) = exit.chain.flush() {
                        session.sink.push(tail);
                    }
                    exit.source.close();
                    tracing::info!("Closed IQ source: {}", exit.source.describe());
                    capture_result = exit.result;
                }
                Err(e) => capture_result = Err(e),
            }
        }

        session.sink.close();
        let output_result = session
            .output
            .join()
            .map_err(|_| thread_panicked("fmrx-audio"))
            .and_then(|r| r);
        let stats = session.sink.stats();
        tracing::info!(
            "Session ended: {} block(s), {} frame(s) played, {} overrun(s), {} underrun(s), {} skipped block(s)",
            stats.blocks_processed,
            stats.popped,
            stats.overruns,
            stats.underruns,
            stats.skipped_blocks
        );

        // A dead audio device also stops capture; report the root cause.
        output_result.and(capture_result)
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        if self.session.is_some() {
            if let Err(e) = self.stop() {
                tracing::warn!("Receiver dropped with error: {}", e);
            }
        }
    }
}

fn thread_panicked(name: &str) -> RxError {
    RxError::Io(format!("{} thread panicked", name))
}

fn restore_failed(err: RxError) -> RxError {
    RxError::SourceRead(format!("cannot restore previous tuning: {}", err))
}

/// Put the tuner back on `freq` after a sweep, keeping the sweep's error.
fn retune_after_scan<T>(source: &mut dyn IqSource, freq: Freq, outcome: RxResult<T>) -> RxResult<T> {
    if matches!(&outcome, Err(e) if e.is_fatal()) {
        return outcome;
    }
    source.set_frequency(freq.hz).map_err(restore_failed)?;
    outcome
}

fn join_capture(capture: Capture) -> RxResult<CaptureExit> {
    capture
        .thread
        .join()
        .map_err(|_| thread_panicked("fmrx-capture"))
}

fn apply_tuning(source: &mut dyn IqSource, sample_rate: u32, tuning: Tuning) -> RxResult<()> {
    source.set_sample_rate(sample_rate)?;
    source.set_frequency(tuning.freq.hz)?;
    source.set_gain(tuning.gain)
}

/// Validate `config`, apply it to `source` and build the DSP chain.
fn prepare(source: &mut dyn IqSource, config: &PipelineConfig, tuning: Tuning) -> RxResult<DspChain> {
    let chain = DspChain::new(config)?;
    apply_tuning(source, config.sample_rate, tuning)?;
    Ok(chain)
}

/// Reason to skip `block` instead of feeding it to the chain.
fn block_defect(block: &SampleBlock, config: &PipelineConfig) -> Option<String> {
    if block.sample_rate() != config.sample_rate {
        return Some(format!(
            "block captured at {} Hz, expected {} Hz",
            block.sample_rate(),
            config.sample_rate
        ));
    }
    if block.len() < config.block_size {
        return Some(format!(
            "short block ({} of {} samples)",
            block.len(),
            config.block_size
        ));
    }
    if block
        .samples()
        .iter()
        .any(|s| !s.re.is_finite() || !s.im.is_finite())
    {
        return Some("block contains non-finite samples".to_string());
    }
    None
}

struct CaptureContext {
    config: PipelineConfig,
    sink: Arc<SinkBuffer>,
    stop: Arc<AtomicBool>,
    shared: Arc<Shared>,
    spectrum: SpectrumShared,
}

/// The capture/processing loop. Runs on a dedicated OS thread.
///
/// Checks the stop flag between blocks. On a run-ending error it closes
/// the sink so the output thread drains and exits.
fn capture_loop(
    mut source: Box<dyn IqSource>,
    mut chain: DspChain,
    ctx: CaptureContext,
) -> CaptureExit {
    let config = &ctx.config;
    let mut analyzer = SpectrumAnalyzer::new(config.fft_size, config.spectrum_interval_blocks);
    let mut frames: Vec<AudioFrame> = Vec::new();
    let mut consecutive_errors = 0u32;

    let result = 'capture: loop {
        if ctx.stop.load(Ordering::Acquire) {
            break Ok(());
        }

        let block = match source.read_block(config.block_size) {
            Ok(block) => {
                consecutive_errors = 0;
                block
            }
            Err(e) => {
                consecutive_errors = consecutive_errors.saturating_add(1);
                if consecutive_errors > config.read_error_tolerance {
                    break Err(e);
                }
                tracing::warn!(
                    "IQ source read error ({}/{}): {}; retrying",
                    consecutive_errors,
                    config.read_error_tolerance,
                    e
                );
                ctx.shared.publish(ReceiverEvent::Warning(e));
                thread::sleep(READ_RETRY_DELAY);
                continue;
            }
        };

        if let Some(defect) = block_defect(&block, config) {
            tracing::warn!("Skipping IQ block: {}", defect);
            ctx.sink.record_blocks(0, 1);
            ctx.shared
                .publish(ReceiverEvent::Status(format!("skipped block: {}", defect)));
            continue;
        }

        frames.clear();
        chain.process(block.samples(), &mut frames);
        for frame in frames.drain(..) {
            match ctx.sink.push(frame) {
                PushOutcome::Queued => {}
                PushOutcome::Overrun { dropped } => {
                    let warning = RxError::SinkOverrun { dropped };
                    tracing::warn!("{}", warning);
                    ctx.shared.publish(ReceiverEvent::Warning(warning));
                }
                PushOutcome::Closed => {
                    break 'capture Err(RxError::Sink("audio output closed".into()));
                }
            }
        }
        ctx.sink.record_blocks(1, 0);

        if let Some(row) = analyzer.update(block.samples()) {
            ctx.spectrum.publish(row);
        }
    };

    if let Err(e) = &result {
        tracing::error!("Capture stopped: {}", e);
        source.close();
        ctx.sink.close();
        ctx.shared.publish(ReceiverEvent::Error(e.clone()));
        ctx.shared.set_state(EngineState::Stopping);
    }
    CaptureExit {
        source,
        chain,
        result,
    }
}

fn spawn_output(
    output: Arc<dyn AudioOutput>,
    sink: Arc<SinkBuffer>,
    config: &PipelineConfig,
    shared: Arc<Shared>,
) -> RxResult<JoinHandle<RxResult<()>>> {
    let sample_rate = config.audio_rate;
    let frame_len = config.frame_len;
    let underrun_timeout = config.underrun_timeout();
    let handle = thread::Builder::new()
        .name("fmrx-audio".to_string())
        .spawn(move || {
            output_loop(
                output.as_ref(),
                &sink,
                sample_rate,
                frame_len,
                underrun_timeout,
                &shared,
            )
        })?;
    Ok(handle)
}

/// The audio output loop. Runs on a dedicated OS thread until the sink
/// buffer is closed and drained, or the device fails.
fn output_loop(
    output: &dyn AudioOutput,
    sink: &SinkBuffer,
    sample_rate: u32,
    frame_len: usize,
    underrun_timeout: Duration,
    shared: &Shared,
) -> RxResult<()> {
    let mut device = match output.open(sample_rate, frame_len) {
        Ok(device) => device,
        Err(e) => {
            tracing::error!("Cannot open audio output {}: {}", output.describe(), e);
            sink.close();
            shared.publish(ReceiverEvent::Error(e.clone()));
            return Err(e);
        }
    };
    tracing::info!("Audio output: {} at {} Hz", output.describe(), sample_rate);

    // Startup latency is not an underrun.
    let mut playing = false;
    loop {
        match sink.pop(underrun_timeout) {
            PopOutcome::Frame(frame) => {
                playing = true;
                if let Err(e) = device.write_frame(&frame) {
                    tracing::error!("Audio output failed: {}", e);
                    sink.close();
                    device.close();
                    shared.publish(ReceiverEvent::Error(e.clone()));
                    return Err(e);
                }
            }
            PopOutcome::Underrun { waited } => {
                if playing {
                    let warning = RxError::SinkUnderrun {
                        waited_ms: waited.as_millis() as u64,
                    };
                    tracing::warn!("{}", warning);
                    shared.publish(ReceiverEvent::Warning(warning));
                }
            }
            PopOutcome::Closed => break,
        }
    }
    device.close();
    tracing::debug!("Audio output drained");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioSink;
    use crate::source::{MockIqSource, ToneIqSource, ToneStation};
    use std::time::Instant;

    /// Audio output that records every frame it is handed.
    #[derive(Default)]
    struct CollectingOutput {
        frames: Arc<Mutex<Vec<AudioFrame>>>,
        fail_open: bool,
    }

    struct CollectingSink {
        frames: Arc<Mutex<Vec<AudioFrame>>>,
    }

    impl AudioOutput for CollectingOutput {
        fn open(&self, _sample_rate: u32, _frame_len: usize) -> RxResult<Box<dyn AudioSink>> {
            if self.fail_open {
                return Err(RxError::Sink("no such device".into()));
            }
            Ok(Box::new(CollectingSink {
                frames: self.frames.clone(),
            }))
        }

        fn describe(&self) -> String {
            "collector".into()
        }
    }

    impl AudioSink for CollectingSink {
        fn write_frame(&mut self, frame: &AudioFrame) -> RxResult<()> {
            self.frames.lock().unwrap().push(frame.clone());
            Ok(())
        }
    }

    /// Delivers `good_blocks` blocks of silence, then fails every read.
    struct FlakySource {
        inner: MockIqSource,
        good_blocks: usize,
    }

    impl IqSource for FlakySource {
        fn read_into(&mut self, buf: &mut [num_complex::Complex<f32>]) -> RxResult<usize> {
            if self.good_blocks == 0 {
                return Err(RxError::SourceRead("device unplugged".into()));
            }
            self.good_blocks -= 1;
            self.inner.read_into(buf)
        }

        fn set_frequency(&mut self, hz: u64) -> RxResult<()> {
            self.inner.set_frequency(hz)
        }

        fn set_sample_rate(&mut self, hz: u32) -> RxResult<()> {
            self.inner.set_sample_rate(hz)
        }

        fn set_gain(&mut self, gain: Gain) -> RxResult<()> {
            self.inner.set_gain(gain)
        }

        fn sample_rate(&self) -> u32 {
            self.inner.sample_rate()
        }

        fn describe(&self) -> String {
            "flaky".into()
        }
    }

    /// Hands out at most `chunk` samples per read, like a device limited
    /// by its transfer size. Read number `nan_read` carries a NaN and
    /// read number `gap_read` returns no samples at all.
    struct ChunkedSource {
        inner: ToneIqSource,
        chunk: usize,
        reads: usize,
        nan_read: Option<usize>,
        gap_read: Option<usize>,
    }

    impl ChunkedSource {
        fn new(inner: ToneIqSource, chunk: usize) -> Self {
            Self {
                inner,
                chunk,
                reads: 0,
                nan_read: None,
                gap_read: None,
            }
        }
    }

    impl IqSource for ChunkedSource {
        fn read_into(&mut self, buf: &mut [num_complex::Complex<f32>]) -> RxResult<usize> {
            self.reads += 1;
            if self.gap_read == Some(self.reads) {
                return Ok(0);
            }
            let len = buf.len().min(self.chunk);
            let n = self.inner.read_into(&mut buf[..len])?;
            if self.nan_read == Some(self.reads) {
                buf[0].re = f32::NAN;
            }
            Ok(n)
        }

        fn set_frequency(&mut self, hz: u64) -> RxResult<()> {
            self.inner.set_frequency(hz)
        }

        fn set_sample_rate(&mut self, hz: u32) -> RxResult<()> {
            self.inner.set_sample_rate(hz)
        }

        fn set_gain(&mut self, gain: Gain) -> RxResult<()> {
            self.inner.set_gain(gain)
        }

        fn sample_rate(&self) -> u32 {
            self.inner.sample_rate()
        }

        fn describe(&self) -> String {
            "chunked".into()
        }
    }

    fn test_config() -> PipelineConfig {
        PipelineConfig {
            sample_rate: 240_000,
            audio_rate: 48_000,
            block_size: 4_800,
            channel_bandwidth_hz: 150_000,
            channel_taps: 63,
            audio_taps: 63,
            frame_len: 480,
            fft_size: 1_024,
            waterfall_rows: 8,
            waterfall_cols: 64,
            ..PipelineConfig::default()
        }
    }

    fn stations() -> Vec<ToneStation> {
        [(100_100_000, 0.2), (101_500_000, 0.9), (103_000_000, 0.5)]
            .into_iter()
            .map(|(freq_hz, amplitude)| ToneStation {
                freq_hz,
                amplitude,
                ..ToneStation::default()
            })
            .collect()
    }

    fn tuning(hz: u64) -> Tuning {
        Tuning {
            freq: Freq::new(hz),
            gain: Gain::Auto,
        }
    }

    fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn collector() -> (Arc<CollectingOutput>, Arc<Mutex<Vec<AudioFrame>>>) {
        let output = Arc::new(CollectingOutput::default());
        let frames = output.frames.clone();
        (output, frames)
    }

    #[test]
    fn start_reconfigure_stop() {
        let (output, frames) = collector();
        let mut rx = Receiver::new(output);
        let mut events = rx.subscribe();
        let cfg = test_config();
        let source = ToneIqSource::open(stations(), cfg.sample_rate, 101_500_000);

        rx.start(Box::new(source), cfg.clone(), tuning(101_500_000))
            .unwrap();
        assert_eq!(rx.state(), EngineState::Running);
        wait_until("first frames", || frames.lock().unwrap().len() >= 20);

        rx.reconfigure(Some(Freq::new(103_000_000)), Some(192_000), None)
            .unwrap();
        assert_eq!(rx.state(), EngineState::Running);
        let status = rx.status();
        assert_eq!(status.freq, Some(Freq::new(103_000_000)));
        assert_eq!(status.sample_rate, 192_000);
        assert_eq!(status.audio_rate, 48_000);

        let before = frames.lock().unwrap().len();
        wait_until("frames after retune", || {
            frames.lock().unwrap().len() >= before + 20
        });
        assert!(rx.spectrum().is_some_and(|row| row.len() == cfg.fft_size / 2));
        assert_eq!(
            rx.spectrum_frequencies().map(|f| f.len()),
            Some(cfg.fft_size / 2)
        );

        rx.stop().unwrap();
        assert_eq!(rx.state(), EngineState::Idle);
        assert_eq!(rx.status().freq, None);

        let frames = frames.lock().unwrap();
        assert!(frames.iter().all(|f| f.len() == cfg.frame_len));
        assert!(frames
            .iter()
            .flat_map(|f| f.samples())
            .all(|s| s.is_finite() && s.abs() <= cfg.output_peak + 1e-6));

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert!(seen.contains(&ReceiverEvent::StateChanged(EngineState::Configuring)));
        assert!(seen.contains(&ReceiverEvent::StateChanged(EngineState::Reconfiguring)));
        assert!(seen.contains(&ReceiverEvent::Tuned(Freq::new(103_000_000))));
        assert_eq!(
            seen.last(),
            Some(&ReceiverEvent::StateChanged(EngineState::Idle))
        );
    }

    #[test]
    fn control_calls_check_state() {
        let (output, _frames) = collector();
        let mut rx = Receiver::new(output);
        assert_eq!(rx.stop(), Err(RxError::InvalidState(EngineState::Idle)));
        assert_eq!(
            rx.reconfigure(Some(Freq::new(100_000_000)), None, None),
            Err(RxError::InvalidState(EngineState::Idle))
        );

        let cfg = test_config();
        rx.start(
            Box::new(MockIqSource::new(cfg.sample_rate)),
            cfg.clone(),
            tuning(100_000_000),
        )
        .unwrap();
        let second = rx.start(
            Box::new(MockIqSource::new(cfg.sample_rate)),
            cfg,
            tuning(100_000_000),
        );
        assert_eq!(second, Err(RxError::InvalidState(EngineState::Running)));
        rx.stop().unwrap();
    }

    #[test]
    fn invalid_config_leaves_receiver_idle() {
        let (output, _frames) = collector();
        let mut rx = Receiver::new(output);
        let cfg = PipelineConfig {
            audio_rate: 0,
            ..test_config()
        };
        let result = rx.start(
            Box::new(MockIqSource::new(cfg.sample_rate)),
            cfg,
            tuning(100_000_000),
        );
        assert!(matches!(result, Err(RxError::Configuration(_))));
        assert_eq!(rx.state(), EngineState::Idle);
    }

    #[test]
    fn rejected_reconfigure_keeps_running() {
        let (output, frames) = collector();
        let mut rx = Receiver::new(output);
        let cfg = test_config();
        rx.start(
            Box::new(MockIqSource::new(cfg.sample_rate)),
            cfg,
            tuning(100_000_000),
        )
        .unwrap();

        // 44.1 kHz capture cannot feed 48 kHz audio.
        let result = rx.reconfigure(None, Some(44_100), None);
        assert!(matches!(result, Err(RxError::Configuration(_))));
        assert_eq!(rx.state(), EngineState::Running);
        assert_eq!(rx.status().sample_rate, 240_000);

        let before = frames.lock().unwrap().len();
        wait_until("frames after rejection", || {
            frames.lock().unwrap().len() > before
        });
        rx.stop().unwrap();
    }

    #[test]
    fn source_failure_ends_run() {
        let (output, _frames) = collector();
        let mut rx = Receiver::new(output);
        let mut events = rx.subscribe();
        let cfg = test_config();
        let source = FlakySource {
            inner: MockIqSource::new(cfg.sample_rate),
            good_blocks: 3,
        };
        rx.start(Box::new(source), cfg, tuning(100_000_000)).unwrap();

        wait_until("capture to fail", || rx.is_finished());
        assert_eq!(rx.state(), EngineState::Stopping);
        assert_eq!(
            rx.stop(),
            Err(RxError::SourceRead("device unplugged".into()))
        );
        assert_eq!(rx.state(), EngineState::Idle);

        let mut errors = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let ReceiverEvent::Error(e) = event {
                errors.push(e);
            }
        }
        assert_eq!(
            errors.first(),
            Some(&RxError::SourceRead("device unplugged".into()))
        );
    }

    #[test]
    fn tolerated_read_errors_are_warnings() {
        let (output, frames) = collector();
        let mut rx = Receiver::new(output);
        let mut events = rx.subscribe();
        let cfg = PipelineConfig {
            read_error_tolerance: u32::MAX,
            ..test_config()
        };
        let source = FlakySource {
            inner: MockIqSource::new(cfg.sample_rate),
            good_blocks: 2,
        };
        rx.start(Box::new(source), cfg, tuning(100_000_000)).unwrap();

        wait_until("a read warning", || {
            matches!(
                events.try_recv(),
                Ok(ReceiverEvent::Warning(RxError::SourceRead(_)))
            )
        });
        assert_eq!(rx.state(), EngineState::Running);
        assert!(!rx.is_finished());
        rx.stop().unwrap();
        // Two blocks of 4800 at 1/5 fill exactly four frames.
        assert_eq!(frames.lock().unwrap().len(), 4);
    }

    #[test]
    fn partial_reads_still_produce_audio() {
        let (output, frames) = collector();
        let mut rx = Receiver::new(output);
        let cfg = test_config();
        let tone = ToneIqSource::open(stations(), cfg.sample_rate, 101_500_000);
        // 4096 samples per read against 4800-sample blocks.
        let source = ChunkedSource::new(tone, 4_096);
        rx.start(Box::new(source), cfg.clone(), tuning(101_500_000))
            .unwrap();

        wait_until("frames from partial reads", || {
            frames.lock().unwrap().len() >= 20
        });
        let stats = rx.status().stats;
        assert!(stats.blocks_processed > 0);
        assert_eq!(stats.skipped_blocks, 0);
        assert!(stats.pushed > 0);
        rx.stop().unwrap();
        assert!(frames
            .lock()
            .unwrap()
            .iter()
            .all(|f| f.len() == cfg.frame_len));
    }

    #[test]
    fn defective_blocks_are_skipped_without_ending_the_run() {
        let (output, frames) = collector();
        let mut rx = Receiver::new(output);
        let mut events = rx.subscribe();
        let cfg = test_config();
        let tone = ToneIqSource::open(stations(), cfg.sample_rate, 101_500_000);
        let mut source = ChunkedSource::new(tone, 4_096);
        // Reads 1-2 fill block one, 3-4 block two (poisoned), read 5
        // yields an empty block three.
        source.nan_read = Some(3);
        source.gap_read = Some(5);
        rx.start(Box::new(source), cfg, tuning(101_500_000)).unwrap();

        wait_until("audio after the bad blocks", || {
            rx.status().stats.blocks_processed >= 10
        });
        assert_eq!(rx.state(), EngineState::Running);
        assert_eq!(rx.status().stats.skipped_blocks, 2);
        rx.stop().unwrap();

        assert!(frames
            .lock()
            .unwrap()
            .iter()
            .flat_map(|f| f.samples())
            .all(|s| s.is_finite()));
        let mut skipped = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let ReceiverEvent::Status(message) = event {
                if message.starts_with("skipped block") {
                    skipped.push(message);
                }
            }
        }
        assert_eq!(skipped.len(), 2);
        assert!(skipped[0].contains("non-finite"));
        assert!(skipped[1].contains("short block (0 of 4800"));
    }

    #[test]
    fn audio_open_failure_is_reported_by_stop() {
        let output = Arc::new(CollectingOutput {
            fail_open: true,
            ..CollectingOutput::default()
        });
        let mut rx = Receiver::new(output);
        let cfg = test_config();
        rx.start(
            Box::new(MockIqSource::new(cfg.sample_rate)),
            cfg,
            tuning(100_000_000),
        )
        .unwrap();
        wait_until("capture to notice", || rx.is_finished());
        assert_eq!(rx.stop(), Err(RxError::Sink("no such device".into())));
    }

    #[test]
    fn scan_and_auto_tune_while_running() {
        let (output, _frames) = collector();
        let mut rx = Receiver::new(output);
        let cfg = PipelineConfig {
            sample_rate: 192_000,
            ..test_config()
        };
        let source = ToneIqSource::open(stations(), cfg.sample_rate, 100_100_000);
        rx.start(Box::new(source), cfg, tuning(100_100_000)).unwrap();

        let range = FreqRange::new(100_000_000, 103_200_000);
        let settings = ScanSettings {
            capture_len: 4_096,
            settle_samples: 0,
        };
        let result = rx.scan(range, 100_000, &settings).unwrap();
        let order: Vec<u64> = result.entries().iter().take(3).map(|e| e.freq.hz).collect();
        assert_eq!(order, vec![101_500_000, 103_000_000, 100_100_000]);
        // A plain scan keeps the current tuning.
        assert_eq!(rx.status().freq, Some(Freq::new(100_100_000)));

        let best = rx.auto_tune(range, 100_000, &settings).unwrap();
        assert_eq!(best.freq, Freq::new(101_500_000));
        assert_eq!(rx.status().freq, Some(Freq::new(101_500_000)));
        assert_eq!(rx.state(), EngineState::Running);
        rx.stop().unwrap();
    }

    #[test]
    fn auto_tune_over_silence_keeps_frequency() {
        let (output, _frames) = collector();
        let mut rx = Receiver::new(output);
        let cfg = test_config();
        rx.start(
            Box::new(MockIqSource::new(cfg.sample_rate)),
            cfg,
            tuning(99_000_000),
        )
        .unwrap();
        let range = FreqRange::new(101_000_000, 102_000_000);
        let result = rx.auto_tune(range, 200_000, &ScanSettings::default());
        assert!(matches!(result, Err(RxError::ScanEmpty(_))));
        assert_eq!(rx.state(), EngineState::Running);
        assert_eq!(rx.status().freq, Some(Freq::new(99_000_000)));
        rx.stop().unwrap();
    }
}
