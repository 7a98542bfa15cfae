//! Signal write trace
//!
//! Keeps a bounded history of every write that went through a
//! [`SignalChannel`](streamrtc_signaling::SignalChannel), successful or not,
//! and renders it as JSON for inspection.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use streamrtc_core::StreamRtcError;
use streamrtc_signaling::{SignalObserver, WriteOutcome};
use tracing::trace;

/// Entries kept when no capacity is given
pub const DEFAULT_TRACE_CAPACITY: usize = 256;

#[derive(Debug, Default)]
struct TraceInner {
    entries: VecDeque<WriteOutcome>,
    recorded: u64,
    failed: u64,
}

/// Bounded ring of signal write outcomes
#[derive(Debug)]
pub struct SignalTrace {
    capacity: usize,
    inner: Mutex<TraceInner>,
}

/// Aggregate view of a trace
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceSummary {
    /// Writes observed since creation or the last clear
    pub recorded: u64,
    /// Of those, how many failed
    pub failed: u64,
    /// Entries currently retained, per label
    pub by_label: BTreeMap<String, usize>,
}

#[derive(Serialize)]
struct TraceDump<'a> {
    summary: TraceSummary,
    entries: &'a VecDeque<WriteOutcome>,
}

impl SignalTrace {
    /// Trace retaining at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(TraceInner::default()),
        }
    }

    /// Retained entries, oldest first
    pub fn entries(&self) -> Vec<WriteOutcome> {
        self.inner.lock().entries.iter().cloned().collect()
    }

    /// Retained failed entries
    pub fn failures(&self) -> Vec<WriteOutcome> {
        self.inner
            .lock()
            .entries
            .iter()
            .filter(|e| !e.is_success())
            .cloned()
            .collect()
    }

    /// Retained entries with the given label
    pub fn with_label(&self, label: &str) -> Vec<WriteOutcome> {
        self.inner
            .lock()
            .entries
            .iter()
            .filter(|e| e.label == label)
            .cloned()
            .collect()
    }

    /// Number of retained entries
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether nothing is retained
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget everything
    pub fn clear(&self) {
        *self.inner.lock() = TraceInner::default();
    }

    fn summarize(inner: &TraceInner) -> TraceSummary {
        let mut by_label = BTreeMap::new();
        for entry in &inner.entries {
            *by_label.entry(entry.label.clone()).or_insert(0) += 1;
        }
        TraceSummary {
            recorded: inner.recorded,
            failed: inner.failed,
            by_label,
        }
    }

    /// Counts over the trace
    pub fn summary(&self) -> TraceSummary {
        Self::summarize(&self.inner.lock())
    }

    /// Pretty-printed JSON of the summary and retained entries
    pub fn to_json(&self) -> Result<String, StreamRtcError> {
        let inner = self.inner.lock();
        let dump = TraceDump {
            summary: Self::summarize(&inner),
            entries: &inner.entries,
        };
        Ok(serde_json::to_string_pretty(&dump)?)
    }
}

impl Default for SignalTrace {
    fn default() -> Self {
        Self::new(DEFAULT_TRACE_CAPACITY)
    }
}

impl SignalObserver for SignalTrace {
    fn on_write(&self, outcome: &WriteOutcome) {
        trace!(label = %outcome.label, path = %outcome.path, ok = outcome.is_success(), "trace entry");
        let mut inner = self.inner.lock();
        inner.recorded += 1;
        if !outcome.is_success() {
            inner.failed += 1;
        }
        if inner.entries.len() == self.capacity {
            inner.entries.pop_front();
        }
        inner.entries.push_back(outcome.clone());
    }
}
