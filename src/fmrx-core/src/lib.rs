// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

pub mod block;
pub mod config;
pub mod error;
pub mod math;
pub mod radio;
pub mod state;

pub type DynResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

pub use block::{AudioFrame, SampleBlock};
pub use config::{
    DeemphasisForm, OverflowPolicy, PipelineConfig, ResamplePlan, ResamplerStrategy,
};
pub use error::{RxError, RxResult};
pub use radio::freq::{Freq, FreqRange};
pub use radio::gain::Gain;
pub use radio::scan::{ScanEntry, ScanResult};
pub use state::{EngineState, ReceiverEvent, ReceiverStatus, SinkStats, WaterfallImage};
