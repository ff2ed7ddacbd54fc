use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use report::Report;

/// Counters for everything processed since start-up.
#[derive(Default)]
pub struct RunStats {
    directories_processed: AtomicUsize,
    directories_skipped: AtomicUsize,
    directories_failed: AtomicUsize,

    questions_asked: AtomicUsize,
    values_found: AtomicUsize,
    service_failures: AtomicUsize,
    total_chunks: AtomicUsize,

    // Timing (in microseconds)
    total_ingest_time_us: AtomicU64,
    total_index_time_us: AtomicU64,
    total_query_time_us: AtomicU64,
}

impl RunStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_ingest(&self, duration: Duration, chunks: usize) {
        self.total_ingest_time_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        self.total_chunks.fetch_add(chunks, Ordering::Relaxed);
    }

    pub fn record_index(&self, duration: Duration) {
        self.total_index_time_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_report(&self, duration: Duration, report: &Report) {
        self.total_query_time_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        self.directories_processed.fetch_add(1, Ordering::Relaxed);
        self.questions_asked.fetch_add(report.answers.len(), Ordering::Relaxed);
        self.values_found.fetch_add(report.values_found(), Ordering::Relaxed);
        self.service_failures.fetch_add(report.service_failures(), Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.directories_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.directories_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RunStatsSnapshot {
        let processed = self.directories_processed.load(Ordering::Relaxed);
        let asked = self.questions_asked.load(Ordering::Relaxed);
        let found = self.values_found.load(Ordering::Relaxed);

        RunStatsSnapshot {
            directories_processed: processed,
            directories_skipped: self.directories_skipped.load(Ordering::Relaxed),
            directories_failed: self.directories_failed.load(Ordering::Relaxed),
            questions_asked: asked,
            values_found: found,
            values_not_found: asked.saturating_sub(found),
            service_failures: self.service_failures.load(Ordering::Relaxed),
            total_chunks: self.total_chunks.load(Ordering::Relaxed),
            avg_ingest_time_ms: avg_time_ms(&self.total_ingest_time_us, processed),
            avg_index_time_ms: avg_time_ms(&self.total_index_time_us, processed),
            avg_question_time_ms: avg_time_ms(&self.total_query_time_us, asked),
        }
    }
}

fn avg_time_ms(total_us: &AtomicU64, count: usize) -> f64 {
    let total = total_us.load(Ordering::Relaxed) as f64;
    if count > 0 {
        total / count as f64 / 1000.0 // Convert to ms
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunStatsSnapshot {
    pub directories_processed: usize,
    pub directories_skipped: usize,
    pub directories_failed: usize,
    pub questions_asked: usize,
    pub values_found: usize,
    pub values_not_found: usize,
    pub service_failures: usize,
    pub total_chunks: usize,
    pub avg_ingest_time_ms: f64,
    pub avg_index_time_ms: f64,
    pub avg_question_time_ms: f64,
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
