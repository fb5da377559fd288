// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Bounded FIFO between the processing thread and the audio output thread.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use fmrx_core::{AudioFrame, OverflowPolicy, PipelineConfig, SinkStats};

/// Result of offering a frame to the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// The frame was queued after evicting this many of the oldest frames.
    Overrun { dropped: usize },
    /// The buffer is closed; the frame was discarded.
    Closed,
}

/// Result of waiting for a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum PopOutcome {
    Frame(AudioFrame),
    /// Nothing arrived within the underrun timeout. Callers should report
    /// it and wait again rather than play anything.
    Underrun { waited: Duration },
    /// Closed and fully drained.
    Closed,
}

struct Inner {
    queue: VecDeque<AudioFrame>,
    closed: bool,
    stats: SinkStats,
}

/// Fixed-capacity frame queue with blocking push and pop.
///
/// Frames leave in the order they entered and are never duplicated. When
/// full, [`OverflowPolicy::Block`] waits up to `push_timeout` for room and
/// then evicts the oldest frame; [`OverflowPolicy::DropOldest`] evicts at
/// once. Closing wakes every waiter; consumers still receive the frames
/// queued before the close.
pub struct SinkBuffer {
    inner: Mutex<Inner>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
    policy: OverflowPolicy,
    push_timeout: Duration,
}

impl SinkBuffer {
    pub fn new(capacity: usize, policy: OverflowPolicy, push_timeout: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::with_capacity(capacity),
                closed: false,
                stats: SinkStats::default(),
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
            policy,
            push_timeout,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            config.sink_capacity,
            config.overflow_policy,
            config.push_timeout(),
        )
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, frame: AudioFrame) -> PushOutcome {
        let mut inner = self.lock();
        if inner.closed {
            return PushOutcome::Closed;
        }

        if inner.queue.len() >= self.capacity && self.policy == OverflowPolicy::Block {
            let capacity = self.capacity;
            inner = self
                .not_full
                .wait_timeout_while(inner, self.push_timeout, |i| {
                    !i.closed && i.queue.len() >= capacity
                })
                .unwrap_or_else(PoisonError::into_inner)
                .0;
            if inner.closed {
                return PushOutcome::Closed;
            }
        }

        let mut dropped = 0;
        while inner.queue.len() >= self.capacity {
            inner.queue.pop_front();
            dropped += 1;
        }
        inner.queue.push_back(frame);
        inner.stats.pushed += 1;
        inner.stats.overruns += dropped as u64;
        drop(inner);
        self.not_empty.notify_one();

        if dropped == 0 {
            PushOutcome::Queued
        } else {
            PushOutcome::Overrun { dropped }
        }
    }

    /// Wait up to `timeout` for the next frame.
    pub fn pop(&self, timeout: Duration) -> PopOutcome {
        let started = Instant::now();
        let (mut inner, _) = self
            .not_empty
            .wait_timeout_while(self.lock(), timeout, |i| i.queue.is_empty() && !i.closed)
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(frame) = inner.queue.pop_front() {
            inner.stats.popped += 1;
            drop(inner);
            self.not_full.notify_one();
            return PopOutcome::Frame(frame);
        }
        if inner.closed {
            return PopOutcome::Closed;
        }
        inner.stats.underruns += 1;
        PopOutcome::Underrun {
            waited: started.elapsed(),
        }
    }

    /// Stop accepting frames and wake every waiter.
    pub fn close(&self) {
        self.lock().closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    pub fn stats(&self) -> SinkStats {
        self.lock().stats
    }

    /// Fold capture-side counters into the shared statistics.
    pub fn record_blocks(&self, processed: u64, skipped: u64) {
        let mut inner = self.lock();
        inner.stats.blocks_processed += processed;
        inner.stats.skipped_blocks += skipped;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn frame(tag: f32) -> AudioFrame {
        AudioFrame::new(vec![tag; 4])
    }

    fn tag(outcome: PopOutcome) -> f32 {
        match outcome {
            PopOutcome::Frame(f) => f.samples()[0],
            other => panic!("expected frame, got {other:?}"),
        }
    }

    #[test]
    fn drop_oldest_triggers_on_capacity_plus_one() {
        let sink = SinkBuffer::new(3, OverflowPolicy::DropOldest, Duration::ZERO);
        for i in 0..3 {
            assert_eq!(sink.push(frame(i as f32)), PushOutcome::Queued);
        }
        assert_eq!(sink.push(frame(3.0)), PushOutcome::Overrun { dropped: 1 });
        assert_eq!(sink.len(), 3);

        let wait = Duration::from_millis(1);
        assert_eq!(tag(sink.pop(wait)), 1.0);
        assert_eq!(sink.push(frame(4.0)), PushOutcome::Queued);
        assert_eq!(tag(sink.pop(wait)), 2.0);
        assert_eq!(tag(sink.pop(wait)), 3.0);
        assert_eq!(tag(sink.pop(wait)), 4.0);

        let stats = sink.stats();
        assert_eq!(stats.pushed, 5);
        assert_eq!(stats.popped, 4);
        assert_eq!(stats.overruns, 1);
    }

    #[test]
    fn block_policy_times_out_then_evicts() {
        let sink = SinkBuffer::new(2, OverflowPolicy::Block, Duration::from_millis(20));
        assert_eq!(sink.push(frame(0.0)), PushOutcome::Queued);
        assert_eq!(sink.push(frame(1.0)), PushOutcome::Queued);

        let started = Instant::now();
        assert_eq!(sink.push(frame(2.0)), PushOutcome::Overrun { dropped: 1 });
        assert!(started.elapsed() >= Duration::from_millis(20));
        assert_eq!(tag(sink.pop(Duration::ZERO)), 1.0);
    }

    #[test]
    fn blocked_push_resumes_when_consumer_drains() {
        let sink = Arc::new(SinkBuffer::new(1, OverflowPolicy::Block, Duration::from_secs(5)));
        sink.push(frame(0.0));

        let consumer = {
            let sink = sink.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                tag(sink.pop(Duration::from_secs(1)))
            })
        };
        assert_eq!(sink.push(frame(1.0)), PushOutcome::Queued);
        assert_eq!(consumer.join().unwrap(), 0.0);
        assert_eq!(tag(sink.pop(Duration::ZERO)), 1.0);
        assert_eq!(sink.stats().overruns, 0);
    }

    #[test]
    fn empty_pop_reports_underrun() {
        let sink = SinkBuffer::new(2, OverflowPolicy::Block, Duration::ZERO);
        match sink.pop(Duration::from_millis(5)) {
            PopOutcome::Underrun { waited } => assert!(waited >= Duration::from_millis(5)),
            other => panic!("expected underrun, got {other:?}"),
        }
        assert_eq!(sink.stats().underruns, 1);
    }

    #[test]
    fn close_drains_then_reports_closed() {
        let sink = Arc::new(SinkBuffer::new(4, OverflowPolicy::Block, Duration::ZERO));
        sink.push(frame(7.0));

        let waiter = {
            let sink = sink.clone();
            thread::spawn(move || {
                let first = tag(sink.pop(Duration::from_secs(5)));
                (first, sink.pop(Duration::from_secs(5)))
            })
        };
        thread::sleep(Duration::from_millis(10));
        sink.close();
        let (first, second) = waiter.join().unwrap();
        assert_eq!(first, 7.0);
        assert_eq!(second, PopOutcome::Closed);
        assert_eq!(sink.push(frame(8.0)), PushOutcome::Closed);
        assert!(sink.is_closed());
    }
}
