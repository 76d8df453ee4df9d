use std::sync::Arc;

use axum::{
    extract::Request,
    http::{HeaderValue, Method},
    middleware::Next,
    response::Response,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tower_governor::{governor::GovernorConfigBuilder, key_extractor::GlobalKeyExtractor, GovernorLayer};
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::handlers;
use crate::state::AppState;
use crate::ws;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Assemble every route and the shared middleware stack.
pub fn build_router(state: AppState) -> anyhow::Result<Router> {
    let config = state.config.clone();

    // Global limit: every client shares one bucket.
    let rate = config.rate_limit_per_minute.max(1);
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_millisecond((60_000 / rate as u64).max(1))
            .burst_size(rate)
            .key_extractor(GlobalKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("invalid rate limit: {rate}/min"))?,
    );
    info!("Rate limiting: {rate} requests per minute");

    // Synthesis can legitimately run for minutes, so only metadata routes time out.
    let metadata = Router::new()
        .route("/v1/health", get(handlers::health))
        .route("/v1/speakers", get(handlers::speakers))
        .route("/v1/voices", get(handlers::voices))
        .route("/metrics", get(handlers::metrics))
        .layer(TimeoutLayer::new(config.request_timeout()));

    let synthesis = Router::new()
        .route("/v1/tts", post(handlers::tts))
        .route("/v1/tts/stream", post(handlers::tts_stream))
        .route("/ws/v1/tts", get(ws::tts_ws));

    let middleware_stack = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(GovernorLayer::new(governor_conf))
        .layer(cors_layer(&config))
        .into_inner();

    Ok(Router::new()
        .merge(metadata)
        .merge(synthesis)
        .layer(axum::middleware::from_fn(add_request_id))
        .layer(middleware_stack)
        .with_state(state))
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .allow_credentials(false);

    let Some(allowed) = &config.cors_allowed_origins else {
        warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins");
        return base.allow_origin(Any);
    };

    let origins: Vec<HeaderValue> = allowed.iter().filter_map(|o| o.parse().ok()).collect();
    if origins.is_empty() {
        warn!("CORS_ALLOWED_ORIGINS is empty, falling back to permissive CORS");
        base.allow_origin(Any)
    } else {
        info!("CORS configured for {} origin(s)", origins.len());
        base.allow_origin(AllowOrigin::list(origins))
    }
}

async fn add_request_id(mut request: Request, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let Ok(value) = HeaderValue::from_str(&request_id) else {
        return next.run(request).await;
    };
    request.headers_mut().insert(REQUEST_ID_HEADER, value.clone());
    let mut response = next.run(request).await;
    response.headers_mut().insert(REQUEST_ID_HEADER, value);
    response
}
