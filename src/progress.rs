// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};

/// Display boundary for transfer progress.
/// Receives only deltas, so any sink can be a dumb accumulator.
pub trait ProgressSink: Send + Sync {
    fn set_total(&self, total: u64);
    fn advance(&self, delta: u64);
    fn finish(&self);
}

pub struct BarSink {
    bar: ProgressBar,
}

impl BarSink {
    pub fn new(total: u64) -> Self {
        let bar = ProgressBar::new(total);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({eta})",
            )
            .expect("static template")
            .progress_chars("=> "),
        );
        Self { bar }
    }
}

impl ProgressSink for BarSink {
    fn set_total(&self, total: u64) {
        self.bar.set_length(total);
    }

    fn advance(&self, delta: u64) {
        self.bar.inc(delta);
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

pub(crate) fn bar_sink(total: u64) -> Arc<dyn ProgressSink> {
    Arc::new(BarSink::new(total))
}

/// Tracks cumulative bytes transferred and forwards only the growth since
/// the last report. Engine callbacks hand us running totals, so repeated
/// calls with the same value are no-ops.
pub(crate) struct TransferTracker {
    sink: Arc<dyn ProgressSink>,
    last: u64,
}

impl TransferTracker {
    pub(crate) fn new(sink: Arc<dyn ProgressSink>, total: u64) -> Self {
        sink.set_total(total);
        Self { sink, last: 0 }
    }

    pub(crate) fn update(&mut self, transferred: u64) {
        let delta = transferred.saturating_sub(self.last);
        if delta > 0 {
            self.sink.advance(delta);
            self.last = transferred;
        }
    }

    pub(crate) fn finish(&self) {
        self.sink.finish();
    }
}
