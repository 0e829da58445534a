use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Where a request ended up. Each outcome has its own counter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    AdmissionDenied,
    LocalHit,
    CacheHit,
    Completed,
    Errored,
    Cancelled,
}

/// Recoverable degradations inside a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Degradation {
    PartialContext,
    FallbackContext,
    HistorySummarized,
    HistoryTruncated,
    CacheWriteFailed,
    LedgerWriteFailed,
}

/// Monotonic counter.
#[derive(Default)]
struct Counter {
    value: AtomicU64,
}

impl Counter {
    fn increment(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }
    fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Keeps the most recent observations for percentile computation.
struct Histogram {
    observations: Mutex<Vec<f64>>,
    capacity: usize,
}

impl Histogram {
    fn new(capacity: usize) -> Self {
        Self {
            observations: Mutex::new(Vec::new()),
            capacity,
        }
    }

    fn observe(&self, value: f64) {
        let mut obs = self.observations.lock();
        if obs.len() == self.capacity {
            obs.remove(0);
        }
        obs.push(value);
    }

    fn summary(&self) -> HistogramSummary {
        let mut obs = self.observations.lock().clone();
        if obs.is_empty() {
            return HistogramSummary::default();
        }
        obs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let count = obs.len();
        HistogramSummary {
            count: count as u64,
            p50: obs[count / 2],
            p95: obs[((count as f64 * 0.95) as usize).min(count - 1)],
            max: obs[count - 1],
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct HistogramSummary {
    pub count: u64,
    pub p50: f64,
    pub p95: f64,
    pub max: f64,
}

/// In-process counters for the chat pipeline. Cheap to update from any
/// task; read through [`PipelineMetrics::snapshot`].
pub struct PipelineMetrics {
    requests: Counter,
    admission_denied: Counter,
    local_hits: Counter,
    cache_hits: Counter,
    model_calls: Counter,
    completed: Counter,
    errored: Counter,
    cancelled: Counter,
    partial_contexts: Counter,
    fallback_contexts: Counter,
    history_summaries: Counter,
    history_truncations: Counter,
    cache_writes: Counter,
    cache_write_failures: Counter,
    ledger_write_failures: Counter,
    stream_seconds: Histogram,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            requests: Counter::default(),
            admission_denied: Counter::default(),
            local_hits: Counter::default(),
            cache_hits: Counter::default(),
            model_calls: Counter::default(),
            completed: Counter::default(),
            errored: Counter::default(),
            cancelled: Counter::default(),
            partial_contexts: Counter::default(),
            fallback_contexts: Counter::default(),
            history_summaries: Counter::default(),
            history_truncations: Counter::default(),
            cache_writes: Counter::default(),
            cache_write_failures: Counter::default(),
            ledger_write_failures: Counter::default(),
            stream_seconds: Histogram::new(1024),
        }
    }

    pub fn request_received(&self) {
        self.requests.increment();
    }

    pub fn model_call_opened(&self) {
        self.model_calls.increment();
    }

    pub fn cache_written(&self) {
        self.cache_writes.increment();
    }

    pub fn outcome(&self, outcome: Outcome) {
        match outcome {
            Outcome::AdmissionDenied => self.admission_denied.increment(),
            Outcome::LocalHit => self.local_hits.increment(),
            Outcome::CacheHit => self.cache_hits.increment(),
            Outcome::Completed => self.completed.increment(),
            Outcome::Errored => self.errored.increment(),
            Outcome::Cancelled => self.cancelled.increment(),
        }
    }

    pub fn degraded(&self, degradation: Degradation) {
        match degradation {
            Degradation::PartialContext => self.partial_contexts.increment(),
            Degradation::FallbackContext => self.fallback_contexts.increment(),
            Degradation::HistorySummarized => self.history_summaries.increment(),
            Degradation::HistoryTruncated => self.history_truncations.increment(),
            Degradation::CacheWriteFailed => self.cache_write_failures.increment(),
            Degradation::LedgerWriteFailed => self.ledger_write_failures.increment(),
        }
    }

    /// Wall time of one provider stream, open to terminal event.
    pub fn observe_stream_seconds(&self, seconds: f64) {
        self.stream_seconds.observe(seconds);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests: self.requests.get(),
            admission_denied: self.admission_denied.get(),
            local_hits: self.local_hits.get(),
            cache_hits: self.cache_hits.get(),
            model_calls: self.model_calls.get(),
            completed: self.completed.get(),
            errored: self.errored.get(),
            cancelled: self.cancelled.get(),
            partial_contexts: self.partial_contexts.get(),
            fallback_contexts: self.fallback_contexts.get(),
            history_summaries: self.history_summaries.get(),
            history_truncations: self.history_truncations.get(),
            cache_writes: self.cache_writes.get(),
            cache_write_failures: self.cache_write_failures.get(),
            ledger_write_failures: self.ledger_write_failures.get(),
            stream_seconds: self.stream_seconds.summary(),
        }
    }
}

/// Point-in-time copy of every counter.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub admission_denied: u64,
    pub local_hits: u64,
    pub cache_hits: u64,
    pub model_calls: u64,
    pub completed: u64,
    pub errored: u64,
    pub cancelled: u64,
    pub partial_contexts: u64,
    pub fallback_contexts: u64,
    pub history_summaries: u64,
    pub history_truncations: u64,
    pub cache_writes: u64,
    pub cache_write_failures: u64,
    pub ledger_write_failures: u64,
    pub stream_seconds: HistogramSummary,
}
