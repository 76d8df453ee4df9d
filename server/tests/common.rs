//! Common utilities for integration tests

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    body::{to_bytes, Body, Bytes},
    http::{HeaderMap, Request, StatusCode},
    Router,
};
use synth_core::testing::{EngineLog, ScriptedEngine, ScriptedLoader};
use synth_core::{EngineLifecycle, LoadOptions, VoiceCacheManager, VoiceConfig};
use synth_server::{build_router, AppState, ServerConfig};
use tempfile::TempDir;
use tower::ServiceExt;

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub log: EngineLog,
    _assets: TempDir,
}

pub fn test_config(asset_dir: PathBuf) -> ServerConfig {
    ServerConfig {
        asset_dir,
        output_sample_rate: 24_000,
        enable_warmup: false,
        rate_limit_per_minute: 60_000,
        ..ServerConfig::default()
    }
}

fn build(engine: ScriptedEngine, load: bool) -> TestApp {
    let assets = tempfile::tempdir().unwrap();
    std::fs::write(assets.path().join("default.wav"), b"RIFF").unwrap();
    let config = test_config(assets.path().to_path_buf());

    let log = engine.log();
    let lifecycle = Arc::new(EngineLifecycle::new());
    let voices = Arc::new(VoiceCacheManager::new(
        config.asset_dir.clone(),
        config.default_voice_id.clone(),
    ));

    if load {
        let configs = vec![VoiceConfig {
            id: "default".into(),
            file: "default.wav".into(),
            reference_text: "a short reference clip".into(),
            description: "house voice".into(),
        }];
        let options = LoadOptions {
            model_dir: PathBuf::from("models"),
            use_acceleration: false,
            use_precision_reduction: false,
            warmup: false,
        };
        lifecycle
            .load(&ScriptedLoader::new(engine), &options, &voices, &configs)
            .unwrap();
    }

    let state = AppState::new(config, lifecycle, voices, false);
    let router = build_router(state.clone()).unwrap();
    TestApp {
        router,
        state,
        log,
        _assets: assets,
    }
}

/// App with a loaded scripted engine and one cached voice, `default`.
pub fn ready_app(engine: ScriptedEngine) -> TestApp {
    build(engine, true)
}

/// App whose engine has not finished loading.
pub fn loading_app() -> TestApp {
    build(ScriptedEngine::new(24_000), false)
}

pub async fn get(router: &Router, uri: &str) -> (StatusCode, HeaderMap, Bytes) {
    let response = router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, body)
}

pub async fn get_json(router: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let (status, _, body) = get(router, uri).await;
    (status, serde_json::from_slice(&body).unwrap())
}

pub async fn post_json(
    router: &Router,
    uri: &str,
    body: serde_json::Value,
) -> (StatusCode, HeaderMap, Result<Bytes, axum::Error>) {
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_string(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX).await;
    (status, headers, body)
}

pub async fn post_raw(router: &Router, uri: &str, body: &'static str) -> (StatusCode, Bytes) {
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body)
}
