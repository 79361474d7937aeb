use axum::Json;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use flowgate_core::GatewayStats;
use serde::Serialize;
use serde_json::json;

use crate::proxy::ProxyState;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    logged_in: bool,
    version: &'static str,
    os: &'static str,
    arch: &'static str,
}

/// Never touches the upstream. `degraded` means no usable credential.
pub(crate) async fn health(State(state): State<ProxyState>) -> Response {
    let logged_in = state.service.is_logged_in();
    Json(Health {
        status: if logged_in { "healthy" } else { "degraded" },
        logged_in,
        version: VERSION,
        os: std::env::consts::OS,
        arch: std::env::consts::ARCH,
    })
    .into_response()
}

pub(crate) async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "name": "flowgate",
        "version": VERSION,
        "endpoints": {
            "health": "/health",
            "models": "/v1/models",
            "vision_models": "/v1/vision-models",
            "chat_completions": "/v1/chat/completions",
            "messages": "/v1/messages",
            "count_tokens": "/v1/messages/count_tokens",
            "stats": "/admin/stats",
        }
    }))
}

pub(crate) async fn models(State(state): State<ProxyState>) -> Response {
    Json(state.service.models()).into_response()
}

pub(crate) async fn vision_models(State(state): State<ProxyState>) -> Response {
    Json(state.service.vision_models()).into_response()
}

pub(crate) async fn stats(State(state): State<ProxyState>) -> Json<GatewayStats> {
    Json(state.service.stats())
}
