// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::fmt;

use serde::Serialize;

use crate::error::RxError;
use crate::radio::freq::Freq;
use crate::radio::gain::Gain;
use crate::radio::scan::ScanResult;

/// Lifecycle of a receiver session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    #[default]
    Idle,
    Configuring,
    Running,
    Reconfiguring,
    Stopping,
}

impl EngineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineState::Idle => "idle",
            EngineState::Configuring => "configuring",
            EngineState::Running => "running",
            EngineState::Reconfiguring => "reconfiguring",
            EngineState::Stopping => "stopping",
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, EngineState::Idle)
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters kept by the sink buffer and the capture loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SinkStats {
    /// Frames accepted into the buffer.
    pub pushed: u64,
    /// Frames handed to the audio device.
    pub popped: u64,
    /// Frames dropped because the buffer was full.
    pub overruns: u64,
    /// Times the consumer waited longer than the underrun timeout.
    pub underruns: u64,
    /// IQ blocks discarded as short or non-finite.
    pub skipped_blocks: u64,
    /// IQ blocks run through the pipeline.
    pub blocks_processed: u64,
}

/// Snapshot of the receiver for status displays.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReceiverStatus {
    pub state: EngineState,
    pub freq: Option<Freq>,
    pub sample_rate: u32,
    pub audio_rate: u32,
    pub gain: Gain,
    pub stats: SinkStats,
    /// Buffered frames at the time of the snapshot.
    pub queued_frames: usize,
    /// Last human readable status line.
    pub message: String,
}

/// Scrolling spectrogram, oldest row first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WaterfallImage {
    pub rows: usize,
    pub cols: usize,
    /// Row-major `rows * cols` dB values relative to each row's peak.
    pub data: Vec<f32>,
}

impl WaterfallImage {
    pub fn new(rows: usize, cols: usize, fill: f32) -> Self {
        Self {
            rows,
            cols,
            data: vec![fill; rows * cols],
        }
    }

    pub fn row(&self, index: usize) -> Option<&[f32]> {
        if index >= self.rows {
            return None;
        }
        let start = index * self.cols;
        self.data.get(start..start + self.cols)
    }

    /// Most recent row.
    pub fn newest(&self) -> Option<&[f32]> {
        self.rows.checked_sub(1).and_then(|idx| self.row(idx))
    }
}

/// Notifications published by the receiver to any number of observers.
#[derive(Debug, Clone, PartialEq)]
pub enum ReceiverEvent {
    StateChanged(EngineState),
    Status(String),
    Tuned(Freq),
    ScanComplete(ScanResult),
    /// Recoverable condition; the pipeline keeps running.
    Warning(RxError),
    /// The run ended because of this error.
    Error(RxError),
}

impl fmt::Display for ReceiverEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReceiverEvent::StateChanged(state) => write!(f, "state: {}", state),
            ReceiverEvent::Status(msg) => f.write_str(msg),
            ReceiverEvent::Tuned(freq) => write!(f, "tuned to {}", freq),
            ReceiverEvent::ScanComplete(result) => match result.entries().first() {
                Some(best) => write!(
                    f,
                    "scan complete: {} channel(s), strongest {} ({:.3e})",
                    result.len(),
                    best.freq,
                    best.power
                ),
                None => f.write_str("scan complete: no channels"),
            },
            ReceiverEvent::Warning(err) => write!(f, "warning: {}", err),
            ReceiverEvent::Error(err) => write!(f, "error: {}", err),
        }
    }
}
