// Server configuration, read once from the environment at startup.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use synth_core::{LoadOptions, PipelineSettings};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub model_dir: PathBuf,
    pub asset_dir: PathBuf,
    pub voices_config: PathBuf,
    pub default_voice_id: String,
    pub output_sample_rate: u32,
    pub use_acceleration: bool,
    pub fp16: bool,
    pub enable_warmup: bool,
    pub enable_performance_monitor: bool,
    pub stream_buffer_chunks: usize,
    pub rate_limit_per_minute: u32,
    pub request_timeout_secs: u64,
    pub max_text_length: usize,
    pub cors_allowed_origins: Option<Vec<String>>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            model_dir: PathBuf::from("models/piper"),
            asset_dir: PathBuf::from("asset"),
            voices_config: PathBuf::from("asset/voices.json"),
            default_voice_id: "default".to_string(),
            output_sample_rate: 24_000,
            use_acceleration: false,
            fp16: false,
            enable_warmup: true,
            enable_performance_monitor: true,
            stream_buffer_chunks: 8,
            rate_limit_per_minute: 120,
            request_timeout_secs: 60,
            max_text_length: 5000,
            cors_allowed_origins: None,
        }
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let cors_allowed_origins = std::env::var("CORS_ALLOWED_ORIGINS")
            .ok()
            .map(|origins| {
                origins
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            });

        Self {
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port: env_parse("PORT", defaults.port),
            model_dir: std::env::var("MODEL_DIR").map(PathBuf::from).unwrap_or(defaults.model_dir),
            asset_dir: std::env::var("ASSET_DIR").map(PathBuf::from).unwrap_or(defaults.asset_dir),
            voices_config: std::env::var("VOICES_CONFIG")
                .map(PathBuf::from)
                .unwrap_or(defaults.voices_config),
            default_voice_id: std::env::var("DEFAULT_VOICE_ID").unwrap_or(defaults.default_voice_id),
            output_sample_rate: env_parse("OUTPUT_SAMPLE_RATE", defaults.output_sample_rate),
            use_acceleration: env_bool("USE_ACCELERATION", defaults.use_acceleration),
            fp16: env_bool("FP16", defaults.fp16),
            enable_warmup: env_bool("ENABLE_WARMUP", defaults.enable_warmup),
            enable_performance_monitor: env_bool("ENABLE_PERFORMANCE_MONITOR", defaults.enable_performance_monitor),
            stream_buffer_chunks: env_parse("STREAM_BUFFER_CHUNKS", defaults.stream_buffer_chunks),
            rate_limit_per_minute: env_parse("RATE_LIMIT_PER_MINUTE", defaults.rate_limit_per_minute),
            request_timeout_secs: env_parse("REQUEST_TIMEOUT_SECS", defaults.request_timeout_secs),
            max_text_length: env_parse("MAX_TEXT_LENGTH", defaults.max_text_length),
            cors_allowed_origins,
        }
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }

    /// Applies to metadata routes only; synthesis is never cut off.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            model_dir: self.model_dir.clone(),
            use_acceleration: self.use_acceleration,
            use_precision_reduction: self.fp16,
            warmup: self.enable_warmup,
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            output_sample_rate: self.output_sample_rate,
            monitor: self.enable_performance_monitor,
            buffer_chunks: self.stream_buffer_chunks.max(1),
        }
    }
}
