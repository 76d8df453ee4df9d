//! Integration tests for the HTTP surface

mod common;

use axum::http::StatusCode;
use base64::{engine::general_purpose, Engine as _};
use serde_json::json;
use synth_core::testing::{EngineCall, ScriptedEngine};
use synth_core::REFERENCE_TEXT_PREFIX;

use common::*;

#[tokio::test]
async fn test_health_before_load() {
    let app = loading_app();
    let (status, body) = get_json(&app.router, "/v1/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "error");
    assert!(body["sampleRate"].is_null());
    assert_eq!(body["outputSampleRate"], 24_000);
    assert_eq!(body["voiceCount"], 0);
}

#[tokio::test]
async fn test_health_when_ready() {
    let app = ready_app(ScriptedEngine::new(22_050));
    let (status, body) = get_json(&app.router, "/v1/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["model"], "scripted");
    assert_eq!(body["sampleRate"], 22_050);
    assert_eq!(body["voiceCount"], 1);
    assert_eq!(body["gpu"], false);
    assert_eq!(body["accelerationEnabled"], false);
}

#[tokio::test]
async fn test_speakers() {
    let app = ready_app(ScriptedEngine::new(22_050));
    let (_, body) = get_json(&app.router, "/v1/speakers").await;
    assert_eq!(body["speakers"], json!(["s1", "s2"]));

    let app = loading_app();
    let (status, body) = get_json(&app.router, "/v1/speakers").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["speakers"], json!([]));
}

#[tokio::test]
async fn test_list_voices() {
    let app = ready_app(ScriptedEngine::new(22_050));
    let (status, body) = get_json(&app.router, "/v1/voices").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert_eq!(body["defaultVoiceId"], "default");
    let voice = &body["voices"][0];
    assert_eq!(voice["id"], "default");
    assert_eq!(voice["referenceText"], "a short reference clip");
    assert_eq!(voice["isLoaded"], true);
    assert!(voice["file"].as_str().unwrap().ends_with("default.wav"));
}

#[tokio::test]
async fn test_tts_sft_buffered() {
    let app = ready_app(ScriptedEngine::new(22_050));
    let (status, _, body) = post_json(
        &app.router,
        "/v1/tts",
        json!({"text": "hello", "mode": "sft", "speaker": "s1", "stream": false}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let body: serde_json::Value = serde_json::from_slice(&body.unwrap()).unwrap();
    assert_eq!(body["sampleRate"], 24_000);
    assert!(body["performance"]["chunkCount"].as_u64().unwrap() > 0);

    let wav = general_purpose::STANDARD
        .decode(body["audio"].as_str().unwrap())
        .unwrap();
    assert!(wav.len() > 44);
    assert_eq!(&wav[0..4], b"RIFF");

    assert_eq!(
        app.log.calls(),
        vec![EngineCall::Sft {
            text: "hello".into(),
            speaker: "s1".into()
        }]
    );
}

#[tokio::test]
async fn test_tts_voice_id_uses_cached_voice() {
    let app = ready_app(ScriptedEngine::new(24_000));
    let (status, _, _) = post_json(
        &app.router,
        "/v1/tts",
        json!({"text": "hello", "mode": "zero_shot", "voiceId": "default"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let calls = app.log.calls();
    let EngineCall::ZeroShot {
        reference_text,
        reference_audio,
        speaker_key,
        ..
    } = &calls[0]
    else {
        panic!("expected zero-shot call, got {calls:?}");
    };
    assert_eq!(speaker_key.as_deref(), Some("default"));
    assert!(reference_audio.ends_with("default.wav"));
    assert_eq!(reference_text.matches(REFERENCE_TEXT_PREFIX).count(), 1);
}

#[tokio::test]
async fn test_tts_not_ready() {
    let app = loading_app();
    let (status, _, body) = post_json(&app.router, "/v1/tts", json!({"text": "hello", "speaker": "s1"})).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let body: serde_json::Value = serde_json::from_slice(&body.unwrap()).unwrap();
    assert!(body["detail"].is_string());
    assert!(app.state.pipeline.lifecycle().handle().is_none());
    assert!(app.log.calls().is_empty());
}

#[tokio::test]
async fn test_tts_bogus_mode() {
    let app = ready_app(ScriptedEngine::new(24_000));
    let (status, _, body) = post_json(&app.router, "/v1/tts", json!({"text": "hello", "mode": "bogus"})).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let body: serde_json::Value = serde_json::from_slice(&body.unwrap()).unwrap();
    assert!(body["detail"].as_str().unwrap().contains("bogus"));
    assert!(app.log.calls().is_empty());
    assert!(app.log.seeds().is_empty());
}

#[tokio::test]
async fn test_malformed_body_gets_json_error() {
    let app = ready_app(ScriptedEngine::new(24_000));

    for (uri, body) in [
        ("/v1/tts", "{\"text\": \"hello\""),
        ("/v1/tts/stream", "{\"text\": 42}"),
    ] {
        let (status, body) = post_raw(&app.router, uri, body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["code"], 400);
        assert!(body["detail"].as_str().unwrap().starts_with("Invalid input"));
    }
    assert!(app.log.calls().is_empty());
}

#[tokio::test]
async fn test_tts_validation_long_text() {
    let app = ready_app(ScriptedEngine::new(24_000));
    let long_text = "a".repeat(6000);
    let (status, _, _) = post_json(&app.router, "/v1/tts", json!({"text": long_text, "speaker": "s1"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_tts_speed_out_of_range() {
    let app = ready_app(ScriptedEngine::new(24_000));
    let (status, _, _) = post_json(
        &app.router,
        "/v1/tts",
        json!({"text": "hello", "speaker": "s1", "speed": 3.0}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_tts_generation_failure() {
    let app = ready_app(ScriptedEngine::new(24_000).failing());
    let (status, _, body) = post_json(&app.router, "/v1/tts", json!({"text": "hello", "speaker": "s1"})).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let body: serde_json::Value = serde_json::from_slice(&body.unwrap()).unwrap();
    assert!(body["detail"].as_str().unwrap().contains("scripted failure"));

    let handle = app.state.pipeline.lifecycle().handle().unwrap();
    assert!(!handle.is_busy());
}

#[tokio::test]
async fn test_tts_streaming_headers_and_body() {
    let app = ready_app(ScriptedEngine::new(24_000));
    let (status, headers, body) = post_json(
        &app.router,
        "/v1/tts",
        json!({"text": "hello", "speaker": "s1", "stream": true}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["content-type"], "audio/pcm");
    assert_eq!(headers["x-sample-rate"], "24000");
    assert_eq!(headers["x-channels"], "1");
    assert_eq!(headers["x-bits"], "16");
    // two chunks of 480 samples, 16-bit
    assert_eq!(body.unwrap().len(), 1920);
    assert!(app.log.options()[0].stream);
}

#[tokio::test]
async fn test_stream_endpoint_forces_streaming() {
    let app = ready_app(ScriptedEngine::new(24_000));
    let (status, _, body) = post_json(
        &app.router,
        "/v1/tts/stream",
        json!({"text": "hello", "speaker": "s1", "stream": false}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.unwrap().len(), 1920);
    assert!(app.log.options()[0].stream);
}

#[tokio::test]
async fn test_stream_error_after_first_chunk() {
    let app = ready_app(ScriptedEngine::new(24_000).failing_after(1));
    let (status, _, body) = post_json(
        &app.router,
        "/v1/tts/stream",
        json!({"text": "hello", "speaker": "s1"}),
    )
    .await;

    // headers were already sent; the body ends with an error
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_err());
}

#[tokio::test]
async fn test_request_id_header() {
    let app = ready_app(ScriptedEngine::new(24_000));
    let (_, headers, _) = get(&app.router, "/v1/health").await;
    let id = headers["x-request-id"].to_str().unwrap();
    assert!(uuid::Uuid::parse_str(id).is_ok());
}

#[tokio::test]
async fn test_metrics_counts_requests() {
    let app = ready_app(ScriptedEngine::new(24_000));
    post_json(&app.router, "/v1/tts", json!({"text": "hello", "speaker": "s1"})).await;
    post_json(&app.router, "/v1/tts", json!({"text": "hello", "mode": "bogus"})).await;

    let (status, body) = get_json(&app.router, "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["system"]["requestCount"], 2);
    assert_eq!(body["endpoints"]["tts"]["requestCount"], 1);
    assert_eq!(body["synthesis"]["synthesisCount"], 1);
    assert_eq!(body["system"]["engineBusy"], false);
}

#[tokio::test]
async fn test_not_found_endpoint() {
    let app = ready_app(ScriptedEngine::new(24_000));
    let (status, _, _) = get(&app.router, "/nonexistent").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
