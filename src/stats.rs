//! Shared statistics aggregator.
//!
//! A single mutex over a plain counters struct. `snapshot` copies the
//! struct under the lock so formatting and printing happen lock-free.

use std::time::Instant;

use parking_lot::Mutex;

#[derive(Debug, Default, Clone, Copy)]
pub struct Stats {
    pub total_requests: u64,
    pub bytes_transferred: u64,
    pub timed_requests: u64,
    pub total_response_time_sec: f64,
    pub active_connections: i64,
    pub status_200: u64,
    pub status_206: u64,
    pub status_400: u64,
    pub status_404: u64,
    pub status_405: u64,
    pub status_416: u64,
    pub status_500: u64,
    pub status_503: u64,
    pub status_other: u64,
    pub cache_hits: u64,
    pub cache_lookups: u64,
}

impl Stats {
    fn record_status(&mut self, status: u16) {
        match status {
            200 => self.status_200 += 1,
            206 => self.status_206 += 1,
            400 => self.status_400 += 1,
            404 => self.status_404 += 1,
            405 => self.status_405 += 1,
            416 => self.status_416 += 1,
            500 => self.status_500 += 1,
            503 => self.status_503 += 1,
            _ => self.status_other += 1,
        }
    }

    pub fn cache_hit_rate(&self) -> f64 {
        //  open question: the original prints a hardcoded 0%; this
        // computes the real ratio.
        self.cache_hits as f64 / self.cache_lookups.max(1) as f64
    }

    pub fn avg_response_time_ms(&self) -> f64 {
        if self.timed_requests == 0 {
            return 0.0;
        }
        (self.total_response_time_sec / self.timed_requests as f64) * 1000.0
    }
}

pub struct StatsAggregator {
    inner: Mutex<Stats>,
    started_at: Instant,
}

impl StatsAggregator {
    pub fn new() -> Self {
        StatsAggregator {
            inner: Mutex::new(Stats::default()),
            started_at: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }

    pub fn request_start(&self) {
        self.inner.lock().active_connections += 1;
    }

    pub fn request_end(&self, status: u16, bytes: u64, elapsed: std::time::Duration) {
        let mut stats = self.inner.lock();
        stats.total_requests += 1;
        stats.bytes_transferred += bytes;
        stats.record_status(status);
        stats.active_connections -= 1;
        if stats.active_connections < 0 {
            stats.active_connections = 0;
        }
        let elapsed_secs = elapsed.as_secs_f64();
        if elapsed_secs > 0.0 {
            stats.timed_requests += 1;
            stats.total_response_time_sec += elapsed_secs;
        }
    }

    /// For master-side 503s that never called `request_start`:
    /// `active_connections` must not be touched.
    pub fn record_503(&self, bytes: u64) {
        let mut stats = self.inner.lock();
        stats.total_requests += 1;
        stats.bytes_transferred += bytes;
        stats.status_503 += 1;
    }

    pub fn cache_access(&self, hit: bool) {
        let mut stats = self.inner.lock();
        stats.cache_lookups += 1;
        if hit {
            stats.cache_hits += 1;
        }
    }

    pub fn snapshot(&self) -> Stats {
        *self.inner.lock()
    }

    /// Renders the operational report as one line per figure: uptime,
    /// total requests, 2xx, 4xx, 5xx, bytes transferred, average
    /// response time, and active connections with the cache hit rate.
    pub fn report(&self) -> String {
        let s = self.snapshot();
        format!(
            "uptime: {:.0}s\n\
             total requests: {}\n\
             2xx: {}\n\
             4xx: {}\n\
             5xx: {}\n\
             bytes transferred: {}\n\
             avg response time: {:.1}ms\n\
             active connections: {}, cache hit rate: {:.1}%",
            self.uptime_seconds(),
            s.total_requests,
            s.status_200 + s.status_206,
            s.status_400 + s.status_404 + s.status_405 + s.status_416,
            s.status_500 + s.status_503,
            s.bytes_transferred,
            s.avg_response_time_ms(),
            s.active_connections,
            s.cache_hit_rate() * 100.0,
        )
    }
}

impl Default for StatsAggregator {
    fn default() -> Self {
        Self::new()
    }
}
