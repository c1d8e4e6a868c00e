//! HTTP endpoints and router

use axum::{
    extract::{Path, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::ws::ws_handler;

/// Build the application router.
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer(
        &state.settings.server.cors_origins,
        state.settings.server.cors_enabled,
    );

    Router::new()
        .route("/health", get(health_check))
        .route("/api/agents", get(list_agents))
        .route("/api/agents/:id", get(get_agent))
        .route("/audio/:id", get(get_audio))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// CORS from configured origins; permissive only when disabled (dev).
fn build_cors_layer(origins: &[String], enabled: bool) -> CorsLayer {
    if !enabled {
        tracing::warn!("CORS disabled - allowing all origins (development only)");
        return CorsLayer::permissive();
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin, "invalid CORS origin");
                None
            }
        })
        .collect();

    if parsed.is_empty() {
        tracing::info!("no valid CORS origins configured, defaulting to localhost:5173");
        return CorsLayer::new()
            .allow_origin("http://localhost:5173".parse::<HeaderValue>().expect("static origin"))
            .allow_methods([Method::GET])
            .allow_headers(Any);
    }

    CorsLayer::new()
        .allow_origin(parsed)
        .allow_methods([Method::GET])
        .allow_headers(Any)
}

async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    let providers = &state.settings.providers;
    Json(serde_json::json!({
        "status": "healthy",
        "active_sessions": state.sessions.count(),
        "cached_artifacts": state.cache.len(),
        "has_stt_key": !providers.stt.api_key.is_empty(),
        "has_llm_key": !providers.llm.api_key.is_empty(),
        "has_tts_key": !providers.tts.api_key.is_empty(),
    }))
}

async fn list_agents(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "agents": state.agents.list() }))
}

async fn get_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<voiceline_core::AgentProfile>, StatusCode> {
    use voiceline_pipeline::AgentLookup;
    state.agents.get(&id).map(Json).ok_or(StatusCode::NOT_FOUND)
}

/// Serve a synthesized audio artifact. 404 when absent or expired.
async fn get_audio(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.cache.get(&id) {
        Some((bytes, content_type)) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, content_type)],
            bytes,
        )
            .into_response(),
        None => {
            tracing::debug!(artifact = %id, "audio artifact miss");
            (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({ "error": "audio not found" })),
            )
                .into_response()
        }
    }
}
