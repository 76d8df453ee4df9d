use std::sync::Arc;

use synth_core::piper::PiperLoader;
use synth_core::{EngineLifecycle, EngineLoader, VoiceCacheManager, VoiceConfig};
use synth_server::{build_router, AppState, ServerConfig};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::from_env();
    info!(
        "Server configuration loaded: port={}, model_dir={}, output_sample_rate={}, acceleration={}",
        config.port,
        config.model_dir.display(),
        config.output_sample_rate,
        config.use_acceleration
    );

    let voice_configs = VoiceConfig::load_list(&config.voices_config).unwrap_or_else(|e| {
        warn!("{e:#}, starting without preloaded voices");
        Vec::new()
    });

    let loader = PiperLoader;
    let lifecycle = Arc::new(EngineLifecycle::new());
    let voices = Arc::new(VoiceCacheManager::new(
        config.asset_dir.clone(),
        config.default_voice_id.clone(),
    ));
    let state = AppState::new(
        config.clone(),
        lifecycle.clone(),
        voices.clone(),
        loader.acceleration_available(),
    );
    let app = build_router(state)?;

    // Bind first so health checks answer while the model loads.
    let addr = config.addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind {addr}: {e}. Try a different PORT."))?;
    info!("Server listening on http://{addr}");
    let server = tokio::spawn(async move { axum::serve(listener, app).await });

    let options = config.load_options();
    let loaded =
        tokio::task::spawn_blocking(move || lifecycle.load(&loader, &options, &voices, &voice_configs)).await?;
    match loaded {
        Ok(handle) => info!(model = %handle.info().model, "Engine ready"),
        Err(e) => {
            error!("Engine startup failed: {e}");
            server.abort();
            return Err(e.into());
        }
    }

    server.await??;
    Ok(())
}
