//! Voiceline server entry point

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use voiceline_config::{load_settings, Settings};
use voiceline_pipeline::Providers;
use voiceline_providers::{ChunkedHttpStt, HttpTts, SseLlm};
use voiceline_server::{create_router, AppState, ServerError};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Priority: env vars > config/{env}.yaml > config/default.yaml > defaults.
    let env = std::env::var("VOICELINE_ENV").ok();
    let settings = match load_settings(env.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            // Tracing is not up yet.
            eprintln!("warning: failed to load config: {e}. Using defaults.");
            Settings::default()
        }
    };

    init_tracing(&settings);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        env = env.as_deref().unwrap_or("default"),
        "starting voiceline server"
    );

    let providers = build_providers(&settings)?;
    let state = AppState::new(settings.clone(), providers);

    let _reaper_shutdown = state
        .cache
        .spawn_reaper(Duration::from_secs(settings.cache.reap_interval_secs));

    let app = create_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], settings.server.port));
    tracing::info!(%addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("server shutdown complete");
    Ok(())
}

fn build_providers(settings: &Settings) -> Result<Providers, ServerError> {
    let stt = ChunkedHttpStt::new(settings.providers.stt.clone())
        .map_err(|e| ServerError::Provider(e.to_string()))?;
    let llm = SseLlm::new(settings.providers.llm.clone())
        .map_err(|e| ServerError::Provider(e.to_string()))?;
    let tts = HttpTts::new(settings.providers.tts.clone())
        .map_err(|e| ServerError::Provider(e.to_string()))?;

    Ok(Providers {
        stt: Arc::new(stt),
        llm: Arc::new(llm),
        tts: Arc::new(tts),
    })
}

fn init_tracing(settings: &Settings) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("voiceline={}", settings.server.log_level).into());

    let fmt_layer = if settings.server.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

/// Wait for ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
