//! `WS /ws/v1/tts`
//!
//! The client sends one JSON request per message. Each request is answered
//! with binary PCM frames followed by `{"done": true}`. Any failure sends
//! `{"error": ...}` and closes the socket.

use std::time::Instant;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use synth_core::SynthesisRequest;
use tracing::{debug, error, info, warn};

use crate::error::ApiError;
use crate::state::AppState;
use crate::validation::validate_tts_request;

enum Outcome {
    Completed,
    Disconnected,
}

pub async fn tts_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    if state.lifecycle().handle().is_none() {
        let _ = send_json(&mut socket, serde_json::json!({ "error": ApiError::EngineNotReady.to_string() })).await;
        let _ = socket.close().await;
        return;
    }

    while let Some(message) = socket.recv().await {
        let payload = match message {
            Ok(Message::Text(text)) => text.as_str().to_owned(),
            Ok(Message::Binary(bytes)) => match std::str::from_utf8(&bytes) {
                Ok(text) => text.to_owned(),
                Err(_) => {
                    fail(&mut socket, &state, ApiError::InvalidInput("request must be UTF-8 JSON".into())).await;
                    return;
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!("WebSocket receive error: {e}");
                break;
            }
        };

        state.count_request();
        let started = Instant::now();
        match synthesize(&mut socket, &state, &payload).await {
            Ok(Outcome::Completed) => {
                state
                    .metrics
                    .websocket
                    .record_request(started.elapsed().as_millis() as u64);
                if send_json(&mut socket, serde_json::json!({ "done": true })).await.is_err() {
                    break;
                }
            }
            Ok(Outcome::Disconnected) => {
                info!("WebSocket client disconnected mid-stream");
                return;
            }
            Err(e) => {
                fail(&mut socket, &state, e).await;
                return;
            }
        }
    }
    debug!("WebSocket session closed");
}

async fn synthesize(socket: &mut WebSocket, state: &AppState, payload: &str) -> Result<Outcome, ApiError> {
    let req: SynthesisRequest =
        serde_json::from_str(payload).map_err(|e| ApiError::InvalidInput(format!("invalid request: {e}")))?;
    validate_tts_request(&req, state.config.max_text_length)?;

    let mut stream = state.pipeline.open(&req)?;
    while let Some(chunk) = stream.next_chunk().await {
        let bytes = chunk?;
        if socket.send(Message::Binary(bytes.into())).await.is_err() {
            // dropping the stream stops generation at the next chunk
            return Ok(Outcome::Disconnected);
        }
    }

    let stats = stream.finish().await;
    if state.config.enable_performance_monitor {
        state.metrics.synthesis.record(&stats);
    }
    Ok(Outcome::Completed)
}

async fn fail(socket: &mut WebSocket, state: &AppState, e: ApiError) {
    state.metrics.websocket.record_error();
    error!("WebSocket error: {e}");
    let _ = send_json(socket, serde_json::json!({ "error": e.to_string() })).await;
    let _ = socket.send(Message::Close(None)).await;
}

async fn send_json(socket: &mut WebSocket, value: serde_json::Value) -> Result<(), axum::Error> {
    socket.send(Message::Text(value.to_string().into())).await
}
