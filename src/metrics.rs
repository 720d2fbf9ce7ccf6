use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Ingest and saved-query counters exposed on `/metrics`
#[derive(Clone)]
pub struct Metrics {
    pub jobs_started: Arc<AtomicUsize>,
    pub jobs_ended: Arc<AtomicUsize>,
    pub jobs_timed_out: Arc<AtomicUsize>,
    pub files_accepted: Arc<AtomicU64>,
    pub files_rejected: Arc<AtomicU64>,
    pub bytes_uploaded: Arc<AtomicU64>,
    pub saved_queries_imported: Arc<AtomicU64>,
    pub saved_queries_exported: Arc<AtomicU64>,
    pub analysis_runs: Arc<AtomicUsize>,
    pub start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            jobs_started: Arc::new(AtomicUsize::new(0)),
            jobs_ended: Arc::new(AtomicUsize::new(0)),
            jobs_timed_out: Arc::new(AtomicUsize::new(0)),
            files_accepted: Arc::new(AtomicU64::new(0)),
            files_rejected: Arc::new(AtomicU64::new(0)),
            bytes_uploaded: Arc::new(AtomicU64::new(0)),
            saved_queries_imported: Arc::new(AtomicU64::new(0)),
            saved_queries_exported: Arc::new(AtomicU64::new(0)),
            analysis_runs: Arc::new(AtomicUsize::new(0)),
            start_time: Instant::now(),
        }
    }

    pub fn inc_jobs_started(&self) {
        self.jobs_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_jobs_ended(&self) {
        self.jobs_ended.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_jobs_timed_out(&self, count: usize) {
        self.jobs_timed_out.fetch_add(count, Ordering::Relaxed);
    }

    /// Records an accepted upload of `bytes` bytes.
    pub fn add_accepted_file(&self, bytes: u64) {
        self.files_accepted.fetch_add(1, Ordering::Relaxed);
        self.bytes_uploaded.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn inc_files_rejected(&self) {
        self.files_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_saved_queries_imported(&self, count: u64) {
        self.saved_queries_imported.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_saved_queries_exported(&self, count: u64) {
        self.saved_queries_exported.fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_analysis_runs(&self) {
        self.analysis_runs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_started: self.jobs_started.load(Ordering::Relaxed),
            jobs_ended: self.jobs_ended.load(Ordering::Relaxed),
            jobs_timed_out: self.jobs_timed_out.load(Ordering::Relaxed),
            files_accepted: self.files_accepted.load(Ordering::Relaxed),
            files_rejected: self.files_rejected.load(Ordering::Relaxed),
            bytes_uploaded: self.bytes_uploaded.load(Ordering::Relaxed),
            saved_queries_imported: self.saved_queries_imported.load(Ordering::Relaxed),
            saved_queries_exported: self.saved_queries_exported.load(Ordering::Relaxed),
            analysis_runs: self.analysis_runs.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
pub struct MetricsSnapshot {
    pub jobs_started: usize,
    pub jobs_ended: usize,
    pub jobs_timed_out: usize,
    pub files_accepted: u64,
    pub files_rejected: u64,
    pub bytes_uploaded: u64,
    pub saved_queries_imported: u64,
    pub saved_queries_exported: u64,
    pub analysis_runs: usize,
    pub uptime_seconds: u64,
}
