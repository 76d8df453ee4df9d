use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::info;

/// Aggregate timings for one synthesis request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceStats {
    pub total_time_ms: f64,
    pub first_chunk_latency_ms: f64,
    pub total_bytes: u64,
    pub chunk_count: u64,
}

/// Per-request timer. Owned by a single request, never shared.
#[derive(Debug)]
pub struct PerformanceMonitor {
    label: String,
    started_at: Option<Instant>,
    first_chunk: Option<Duration>,
    total_bytes: u64,
    chunk_count: u64,
}

impl PerformanceMonitor {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            started_at: None,
            first_chunk: None,
            total_bytes: 0,
            chunk_count: 0,
        }
    }

    pub fn start(&mut self) {
        self.started_at = Some(Instant::now());
        self.first_chunk = None;
        self.total_bytes = 0;
        self.chunk_count = 0;
    }

    pub fn is_running(&self) -> bool {
        self.started_at.is_some()
    }

    /// Only the first call after `start` is recorded.
    pub fn record_first_chunk(&mut self) {
        if self.first_chunk.is_some() {
            return;
        }
        if let Some(started_at) = self.started_at {
            self.first_chunk = Some(started_at.elapsed());
        }
    }

    pub fn record_chunk(&mut self, byte_size: usize) {
        self.total_bytes += byte_size as u64;
        self.chunk_count += 1;
    }

    pub fn finish(&self) -> PerformanceStats {
        let Some(started_at) = self.started_at else {
            return PerformanceStats::default();
        };

        let stats = PerformanceStats {
            total_time_ms: as_millis(started_at.elapsed()),
            first_chunk_latency_ms: self.first_chunk.map(as_millis).unwrap_or(0.0),
            total_bytes: self.total_bytes,
            chunk_count: self.chunk_count,
        };

        info!(
            label = %self.label,
            total_ms = stats.total_time_ms,
            first_chunk_ms = stats.first_chunk_latency_ms,
            bytes = stats.total_bytes,
            chunks = stats.chunk_count,
            "synthesis finished"
        );
        stats
    }
}

fn as_millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_finish_before_start_is_zeroed() {
        let monitor = PerformanceMonitor::new("idle");
        assert_eq!(monitor.finish(), PerformanceStats::default());
    }

    #[test]
    fn test_first_chunk_only_recorded_once() {
        let mut monitor = PerformanceMonitor::new("first-chunk");
        monitor.start();
        monitor.record_first_chunk();
        let first = monitor.first_chunk;
        sleep(Duration::from_millis(5));
        monitor.record_first_chunk();
        assert_eq!(monitor.first_chunk, first);

        let stats = monitor.finish();
        assert!(stats.total_time_ms >= stats.first_chunk_latency_ms);
        assert!(stats.total_time_ms >= 5.0);
    }

    #[test]
    fn test_record_chunk_accumulates() {
        let mut monitor = PerformanceMonitor::new("bytes");
        monitor.start();
        monitor.record_chunk(100);
        monitor.record_chunk(28);
        let stats = monitor.finish();
        assert_eq!(stats.total_bytes, 128);
        assert_eq!(stats.chunk_count, 2);
    }

    #[test]
    fn test_start_resets_counters() {
        let mut monitor = PerformanceMonitor::new("reset");
        monitor.start();
        monitor.record_first_chunk();
        monitor.record_chunk(64);
        monitor.start();
        let stats = monitor.finish();
        assert_eq!(stats.chunk_count, 0);
        assert_eq!(stats.total_bytes, 0);
        assert_eq!(stats.first_chunk_latency_ms, 0.0);
    }

    #[test]
    fn test_stats_serialize_camel_case() {
        let json = serde_json::to_value(PerformanceStats::default()).unwrap();
        assert!(json.get("firstChunkLatencyMs").is_some());
        assert!(json.get("chunkCount").is_some());
    }
}
