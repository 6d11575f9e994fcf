use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use index::IndexingReport;

pub struct Metrics {
    // Counters
    total_requests: AtomicUsize,
    successful_requests: AtomicUsize,
    failed_requests: AtomicUsize,

    index_runs: AtomicUsize,
    queries: AtomicUsize,
    empty_selections: AtomicUsize,

    // Timing (in microseconds)
    total_index_time_us: AtomicU64,
    total_query_time_us: AtomicU64,

    // Counts
    total_text_units_indexed: AtomicUsize,
    total_entities_indexed: AtomicUsize,
    total_unit_failures: AtomicUsize,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            total_requests: AtomicUsize::new(0),
            successful_requests: AtomicUsize::new(0),
            failed_requests: AtomicUsize::new(0),
            index_runs: AtomicUsize::new(0),
            queries: AtomicUsize::new(0),
            empty_selections: AtomicUsize::new(0),
            total_index_time_us: AtomicU64::new(0),
            total_query_time_us: AtomicU64::new(0),
            total_text_units_indexed: AtomicUsize::new(0),
            total_entities_indexed: AtomicUsize::new(0),
            total_unit_failures: AtomicUsize::new(0),
        })
    }

    pub fn record_request(&self, success: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_index(&self, duration: Duration, report: &IndexingReport) {
        self.index_runs.fetch_add(1, Ordering::Relaxed);
        self.total_index_time_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        self.total_text_units_indexed.fetch_add(report.text_units, Ordering::Relaxed);
        self.total_entities_indexed.fetch_add(report.entities, Ordering::Relaxed);
        self.total_unit_failures.fetch_add(
            report.extraction_failures.len() + report.summarization.failures.len(),
            Ordering::Relaxed,
        );
    }

    pub fn record_query(&self, duration: Duration) {
        self.queries.fetch_add(1, Ordering::Relaxed);
        self.total_query_time_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_empty_selection(&self) {
        self.empty_selections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            index_runs: self.index_runs.load(Ordering::Relaxed),
            queries: self.queries.load(Ordering::Relaxed),
            empty_selections: self.empty_selections.load(Ordering::Relaxed),
            avg_index_time_ms: avg_time_ms(&self.total_index_time_us, &self.index_runs),
            avg_query_time_ms: avg_time_ms(&self.total_query_time_us, &self.queries),
            total_text_units_indexed: self.total_text_units_indexed.load(Ordering::Relaxed),
            total_entities_indexed: self.total_entities_indexed.load(Ordering::Relaxed),
            total_unit_failures: self.total_unit_failures.load(Ordering::Relaxed),
        }
    }
}

fn avg_time_ms(total_us: &AtomicU64, count: &AtomicUsize) -> f64 {
    let total = total_us.load(Ordering::Relaxed) as f64;
    let cnt = count.load(Ordering::Relaxed) as f64;
    if cnt > 0.0 {
        total / cnt / 1000.0 // Convert to ms
    } else {
        0.0
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: usize,
    pub successful_requests: usize,
    pub failed_requests: usize,
    pub index_runs: usize,
    pub queries: usize,
    pub empty_selections: usize,
    pub avg_index_time_ms: f64,
    pub avg_query_time_ms: f64,
    pub total_text_units_indexed: usize,
    pub total_entities_indexed: usize,
    pub total_unit_failures: usize,
}

pub struct TimedOperation {
    start: Instant,
}

impl TimedOperation {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
