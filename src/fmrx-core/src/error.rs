// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use thiserror::Error;

use crate::state::EngineState;

/// Errors surfaced by the receiver engine.
///
/// `SinkOverrun` and `SinkUnderrun` are warnings: the pipeline keeps running
/// after reporting them. `SourceRead` and `Sink` end the current run.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RxError {
    #[error("IQ source read failed: {0}")]
    SourceRead(String),

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("audio sink overrun: {dropped} frame(s) dropped")]
    SinkOverrun { dropped: usize },

    #[error("audio sink underrun: no frame for {waited_ms} ms")]
    SinkUnderrun { waited_ms: u64 },

    #[error("scan found no viable channel: {0}")]
    ScanEmpty(String),

    #[error("audio sink failed: {0}")]
    Sink(String),

    #[error("operation not allowed while {0}")]
    InvalidState(EngineState),

    #[error("I/O error: {0}")]
    Io(String),
}

pub type RxResult<T> = Result<T, RxError>;

impl RxError {
    /// Whether this error ends the current run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RxError::SourceRead(_) | RxError::Sink(_) | RxError::Io(_)
        )
    }
}

impl From<std::io::Error> for RxError {
    fn from(value: std::io::Error) -> Self {
        RxError::Io(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warnings_are_not_fatal() {
        assert!(!RxError::SinkOverrun { dropped: 1 }.is_fatal());
        assert!(!RxError::SinkUnderrun { waited_ms: 250 }.is_fatal());
        assert!(!RxError::ScanEmpty("all zero".into()).is_fatal());
        assert!(RxError::SourceRead("usb gone".into()).is_fatal());
    }

    #[test]
    fn display_includes_detail() {
        let err = RxError::Configuration("sample_rate must be > 0".into());
        assert_eq!(
            err.to_string(),
            "invalid configuration: sample_rate must be > 0"
        );
        let err = RxError::InvalidState(EngineState::Idle);
        assert_eq!(err.to_string(), "operation not allowed while idle");
    }
}
