// Request and synthesis metrics exposed on /metrics

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use synth_core::PerformanceStats;

/// Latency samples kept for percentiles
const MAX_LATENCY_SAMPLES: usize = 1000;

/// Per-endpoint metrics
#[derive(Debug, Clone)]
pub struct EndpointMetrics {
    request_count: Arc<AtomicU64>,
    error_count: Arc<AtomicU64>,
    total_latency_ms: Arc<AtomicU64>,
    min_latency_ms: Arc<AtomicU64>,
    max_latency_ms: Arc<AtomicU64>,
    latency_samples: Arc<Mutex<VecDeque<u64>>>,
}

impl EndpointMetrics {
    pub fn new() -> Self {
        Self {
            request_count: Arc::new(AtomicU64::new(0)),
            error_count: Arc::new(AtomicU64::new(0)),
            total_latency_ms: Arc::new(AtomicU64::new(0)),
            min_latency_ms: Arc::new(AtomicU64::new(u64::MAX)),
            max_latency_ms: Arc::new(AtomicU64::new(0)),
            latency_samples: Arc::new(Mutex::new(VecDeque::with_capacity(MAX_LATENCY_SAMPLES))),
        }
    }

    pub fn record_request(&self, latency_ms: u64) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.min_latency_ms.fetch_min(latency_ms, Ordering::Relaxed);
        self.max_latency_ms.fetch_max(latency_ms, Ordering::Relaxed);

        if let Ok(mut samples) = self.latency_samples.lock() {
            if samples.len() == MAX_LATENCY_SAMPLES {
                samples.pop_front();
            }
            samples.push_back(latency_ms);
        }
    }

    pub fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    pub fn avg_latency_ms(&self) -> f64 {
        let count = self.request_count();
        if count == 0 {
            return 0.0;
        }
        self.total_latency_ms.load(Ordering::Relaxed) as f64 / count as f64
    }

    fn percentile(&self, p: u8) -> u64 {
        let Ok(samples) = self.latency_samples.lock() else {
            return 0;
        };
        if samples.is_empty() {
            return 0;
        }
        let mut sorted: Vec<u64> = samples.iter().copied().collect();
        sorted.sort_unstable();
        let index = (sorted.len() * p as usize / 100).min(sorted.len() - 1);
        sorted[index]
    }

    pub fn snapshot(&self) -> EndpointStats {
        let min = self.min_latency_ms.load(Ordering::Relaxed);
        EndpointStats {
            request_count: self.request_count(),
            error_count: self.error_count(),
            avg_latency_ms: self.avg_latency_ms(),
            min_latency_ms: if min == u64::MAX { 0 } else { min },
            max_latency_ms: self.max_latency_ms.load(Ordering::Relaxed),
            p50_latency_ms: self.percentile(50),
            p95_latency_ms: self.percentile(95),
            p99_latency_ms: self.percentile(99),
        }
    }
}

impl Default for EndpointMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Totals over every finished synthesis, fed from the per-request monitor.
#[derive(Debug, Clone, Default)]
pub struct SynthesisMetrics {
    synthesis_count: Arc<AtomicU64>,
    total_time_ms: Arc<AtomicU64>,
    total_first_chunk_ms: Arc<AtomicU64>,
    total_bytes: Arc<AtomicU64>,
    total_chunks: Arc<AtomicU64>,
}

impl SynthesisMetrics {
    pub fn record(&self, stats: &PerformanceStats) {
        self.synthesis_count.fetch_add(1, Ordering::Relaxed);
        self.total_time_ms.fetch_add(stats.total_time_ms as u64, Ordering::Relaxed);
        self.total_first_chunk_ms
            .fetch_add(stats.first_chunk_latency_ms as u64, Ordering::Relaxed);
        self.total_bytes.fetch_add(stats.total_bytes, Ordering::Relaxed);
        self.total_chunks.fetch_add(stats.chunk_count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SynthesisMetricsResponse {
        let count = self.synthesis_count.load(Ordering::Relaxed);
        let avg = |total: &AtomicU64| {
            if count == 0 {
                0.0
            } else {
                total.load(Ordering::Relaxed) as f64 / count as f64
            }
        };
        SynthesisMetricsResponse {
            synthesis_count: count,
            avg_synthesis_time_ms: avg(&self.total_time_ms),
            avg_first_chunk_latency_ms: avg(&self.total_first_chunk_ms),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            total_chunks: self.total_chunks.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AppMetrics {
    pub tts: EndpointMetrics,
    pub tts_stream: EndpointMetrics,
    pub websocket: EndpointMetrics,
    pub synthesis: SynthesisMetrics,
}

impl AppMetrics {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedMetricsResponse {
    pub timestamp: DateTime<Utc>,
    pub system: SystemMetrics,
    pub endpoints: EndpointMetricsResponse,
    pub synthesis: SynthesisMetricsResponse,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemMetrics {
    pub cpu_usage_percent: f32,
    pub memory_used_mb: u64,
    pub memory_total_mb: u64,
    pub memory_usage_percent: f32,
    pub request_count: u64,
    pub uptime_seconds: u64,
    pub system_load: Option<f64>,
    pub engine_busy: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointMetricsResponse {
    pub tts: EndpointStats,
    pub tts_stream: EndpointStats,
    pub websocket: EndpointStats,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointStats {
    pub request_count: u64,
    pub error_count: u64,
    pub avg_latency_ms: f64,
    pub min_latency_ms: u64,
    pub max_latency_ms: u64,
    pub p50_latency_ms: u64,
    pub p95_latency_ms: u64,
    pub p99_latency_ms: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesisMetricsResponse {
    pub synthesis_count: u64,
    pub avg_synthesis_time_ms: f64,
    pub avg_first_chunk_latency_ms: f64,
    pub total_bytes: u64,
    pub total_chunks: u64,
}
