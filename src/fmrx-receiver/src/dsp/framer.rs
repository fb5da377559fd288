// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use fmrx_core::AudioFrame;

/// Cuts a continuous audio stream into fixed-length frames.
pub struct Framer {
    frame_len: usize,
    frame_buf: Vec<f32>,
}

impl Framer {
    pub fn new(frame_len: usize) -> Self {
        let frame_len = frame_len.max(1);
        Self {
            frame_len,
            frame_buf: Vec::with_capacity(frame_len * 2),
        }
    }

    /// Samples waiting for the next frame.
    pub fn pending(&self) -> usize {
        self.frame_buf.len()
    }

    /// Append `samples`, moving every completed frame into `frames`.
    pub fn push(&mut self, samples: &[f32], frames: &mut Vec<AudioFrame>) {
        self.frame_buf.extend_from_slice(samples);
        let complete = self.frame_buf.len() / self.frame_len;
        if complete == 0 {
            return;
        }
        let mut chunks = self.frame_buf.chunks_exact(self.frame_len);
        frames.extend(chunks.by_ref().map(|c| AudioFrame::new(c.to_vec())));
        let rest = chunks.remainder().len();
        let consumed = self.frame_buf.len() - rest;
        self.frame_buf.drain(..consumed);
    }

    /// Emit the partial frame, padded with silence, if any samples are held.
    pub fn flush(&mut self) -> Option<AudioFrame> {
        if self.frame_buf.is_empty() {
            return None;
        }
        let mut samples = std::mem::take(&mut self.frame_buf);
        samples.resize(self.frame_len, 0.0);
        Some(AudioFrame::new(samples))
    }

    pub fn reset(&mut self) {
        self.frame_buf.clear();
    }
}
