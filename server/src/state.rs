use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use synth_core::{EngineLifecycle, StreamingPipeline, VoiceCacheManager};

use crate::config::ServerConfig;
use crate::metrics::AppMetrics;

/// Shared by every handler. Cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: StreamingPipeline,
    pub config: Arc<ServerConfig>,
    pub metrics: AppMetrics,
    pub request_count: Arc<AtomicU64>,
    /// Whether the loader could use an accelerator on this host.
    pub acceleration_available: bool,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        config: ServerConfig,
        lifecycle: Arc<EngineLifecycle>,
        voices: Arc<VoiceCacheManager>,
        acceleration_available: bool,
    ) -> Self {
        let pipeline = StreamingPipeline::new(lifecycle, voices, config.pipeline_settings());
        Self {
            pipeline,
            config: Arc::new(config),
            metrics: AppMetrics::new(),
            request_count: Arc::new(AtomicU64::new(0)),
            acceleration_available,
            started_at: Instant::now(),
        }
    }

    pub fn lifecycle(&self) -> &EngineLifecycle {
        self.pipeline.lifecycle()
    }

    pub fn voices(&self) -> &VoiceCacheManager {
        self.pipeline.voices()
    }

    pub fn count_request(&self) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
    }
}
