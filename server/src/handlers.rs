use std::time::Instant;

use axum::{
    body::Body,
    extract::{FromRequest, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use synth_core::wav::encode_wav_base64;
use synth_core::{PerformanceStats, SynthesisRequest, SynthesisStream};
use tracing::debug;

use crate::error::ApiError;
use crate::metrics::{
    DetailedMetricsResponse, EndpointMetrics, EndpointMetricsResponse, SynthesisMetrics, SystemMetrics,
};
use crate::state::AppState;
use crate::validation::validate_tts_request;

pub const PCM_CONTENT_TYPE: &str = "audio/pcm";

/// `Json` whose rejections use the same `{detail, code}` body as every other error.
#[derive(FromRequest)]
#[from_request(via(Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub gpu: bool,
    pub model: String,
    pub sample_rate: Option<u32>,
    pub output_sample_rate: u32,
    pub voice_count: usize,
    pub acceleration_enabled: bool,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let handle = state.lifecycle().handle();
    Json(HealthResponse {
        status: if handle.is_some() { "ok" } else { "error" },
        gpu: state.acceleration_available,
        model: handle
            .as_ref()
            .map(|h| h.info().model.clone())
            .unwrap_or_else(|| "Not Loaded".to_string()),
        sample_rate: handle.as_ref().map(|h| h.info().sample_rate),
        output_sample_rate: state.config.output_sample_rate,
        voice_count: state.voices().voice_count(),
        acceleration_enabled: state.config.use_acceleration,
    })
}

#[derive(Serialize)]
pub struct SpeakersResponse {
    pub speakers: Vec<String>,
}

pub async fn speakers(State(state): State<AppState>) -> Json<SpeakersResponse> {
    let speakers = state
        .lifecycle()
        .handle()
        .map(|h| h.info().speakers.clone())
        .unwrap_or_default();
    Json(SpeakersResponse { speakers })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceInfo {
    pub id: String,
    pub file: String,
    pub reference_text: String,
    pub description: String,
    pub is_loaded: bool,
    pub engine_registered: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceListResponse {
    pub voices: Vec<VoiceInfo>,
    pub total: usize,
    pub default_voice_id: String,
}

pub async fn voices(State(state): State<AppState>) -> Json<VoiceListResponse> {
    let voices: Vec<VoiceInfo> = state
        .voices()
        .list_voices()
        .iter()
        .map(|v| VoiceInfo {
            id: v.id.clone(),
            file: v.reference_audio_path.display().to_string(),
            reference_text: v.reference_text.clone(),
            description: v.description.clone(),
            is_loaded: true,
            engine_registered: v.engine_registered,
        })
        .collect();

    Json(VoiceListResponse {
        total: voices.len(),
        voices,
        default_voice_id: state.voices().default_voice_id().to_string(),
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TtsResponse {
    pub audio: String,
    pub sample_rate: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub performance: Option<PerformanceStats>,
}

/// `POST /v1/tts`: buffered WAV unless the request asks for a stream.
pub async fn tts(State(state): State<AppState>, ApiJson(req): ApiJson<SynthesisRequest>) -> Result<Response, ApiError> {
    state.count_request();
    validate_tts_request(&req, state.config.max_text_length)?;

    if req.stream {
        return stream_response(&state, &req, &state.metrics.tts_stream);
    }

    let started = Instant::now();
    let audio = match state.pipeline.synthesize(&req).await {
        Ok(audio) => audio,
        Err(e) => {
            state.metrics.tts.record_error();
            return Err(e.into());
        }
    };

    let encoded = encode_wav_base64(&audio.pcm, audio.sample_rate)
        .map_err(|e| ApiError::Internal(format!("WAV encoding error: {e}")))?;

    state.metrics.tts.record_request(started.elapsed().as_millis() as u64);
    let monitored = state.config.enable_performance_monitor;
    if monitored {
        state.metrics.synthesis.record(&audio.stats);
    }

    Ok(Json(TtsResponse {
        audio: encoded,
        sample_rate: audio.sample_rate,
        performance: monitored.then_some(audio.stats),
    })
    .into_response())
}

/// `POST /v1/tts/stream`: same as `/v1/tts` with streaming forced on.
pub async fn tts_stream(
    State(state): State<AppState>,
    ApiJson(mut req): ApiJson<SynthesisRequest>,
) -> Result<Response, ApiError> {
    state.count_request();
    validate_tts_request(&req, state.config.max_text_length)?;
    req.stream = true;
    stream_response(&state, &req, &state.metrics.tts_stream)
}

fn stream_response(state: &AppState, req: &SynthesisRequest, endpoint: &EndpointMetrics) -> Result<Response, ApiError> {
    let started = Instant::now();
    let stream = state.pipeline.open(req).map_err(|e| {
        endpoint.record_error();
        ApiError::from(e)
    })?;
    let sample_rate = stream.sample_rate();
    debug!(sample_rate, "streaming response opened");

    let body = pcm_body(
        stream,
        state.config.enable_performance_monitor.then(|| state.metrics.synthesis.clone()),
        endpoint.clone(),
        started,
    );

    let mut response = Response::new(Body::from_stream(body));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(PCM_CONTENT_TYPE));
    headers.insert("x-sample-rate", HeaderValue::from(sample_rate));
    headers.insert("x-channels", HeaderValue::from_static("1"));
    headers.insert("x-bits", HeaderValue::from_static("16"));
    Ok(response)
}

/// Body stream that records metrics once the synthesis stream is exhausted.
fn pcm_body(
    stream: SynthesisStream,
    synthesis: Option<SynthesisMetrics>,
    endpoint: EndpointMetrics,
    started: Instant,
) -> impl futures_util::Stream<Item = synth_core::pipeline::ChunkResult> + Send + 'static {
    futures_util::stream::unfold(Some(stream), move |stream| {
        let synthesis = synthesis.clone();
        let endpoint = endpoint.clone();
        async move {
            let mut stream = stream?;
            match stream.next_chunk().await {
                Some(Err(e)) => {
                    endpoint.record_error();
                    Some((Err(e), Some(stream)))
                }
                Some(chunk) => Some((chunk, Some(stream))),
                None => {
                    let stats = stream.finish().await;
                    endpoint.record_request(started.elapsed().as_millis() as u64);
                    if let Some(synthesis) = synthesis {
                        synthesis.record(&stats);
                    }
                    None
                }
            }
        }
    })
}

pub async fn metrics(State(state): State<AppState>) -> Json<DetailedMetricsResponse> {
    let mut system = sysinfo::System::new();
    system.refresh_cpu();
    system.refresh_memory();

    let cpu_usage = system.global_cpu_info().cpu_usage();
    let memory_used = system.used_memory();
    let memory_total = system.total_memory();
    let memory_usage_percent = if memory_total > 0 {
        (memory_used as f64 / memory_total as f64 * 100.0) as f32
    } else {
        0.0
    };

    let system_load = {
        #[cfg(unix)]
        {
            std::fs::read_to_string("/proc/loadavg")
                .ok()
                .and_then(|s| s.split_whitespace().next().and_then(|v| v.parse::<f64>().ok()))
        }
        #[cfg(not(unix))]
        None
    };

    Json(DetailedMetricsResponse {
        timestamp: chrono::Utc::now(),
        system: SystemMetrics {
            cpu_usage_percent: cpu_usage,
            memory_used_mb: memory_used / 1024 / 1024,
            memory_total_mb: memory_total / 1024 / 1024,
            memory_usage_percent,
            request_count: state.request_count.load(std::sync::atomic::Ordering::Relaxed),
            uptime_seconds: state.started_at.elapsed().as_secs(),
            system_load,
            engine_busy: state.lifecycle().handle().is_some_and(|h| h.is_busy()),
        },
        endpoints: EndpointMetricsResponse {
            tts: state.metrics.tts.snapshot(),
            tts_stream: state.metrics.tts_stream.snapshot(),
            websocket: state.metrics.websocket.snapshot(),
        },
        synthesis: state.metrics.synthesis.snapshot(),
    })
}
