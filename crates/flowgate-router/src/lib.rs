//! HTTP surface of the gateway: both caller dialects, the catalogue, health
//! and stats, behind the optional caller key.

mod admin;
mod error;
mod proxy;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use flowgate_core::{CustomKeyAuth, GatewayService};
use tower_http::cors::CorsLayer;

pub use error::Dialect;
pub use proxy::ProxyState;

/// Largest accepted request body.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

const MODELS_PATHS: &[&str] = &["/v1/models", "/models", "/api/v1/models"];

const CHAT_COMPLETIONS_PATHS: &[&str] = &[
    "/v1/chat/completions",
    "/chat/completions",
    "/api/v1/chat/completions",
];

const MESSAGES_PATHS: &[&str] = &["/v1/messages", "/messages", "/api/v1/messages"];

pub fn gateway_router(service: Arc<GatewayService>) -> Router {
    let auth = CustomKeyAuth::from_config(service.config()).map(Arc::new);
    let state = ProxyState { service };

    let mut router = Router::new()
        .route("/", get(admin::root).post(proxy::chat_completions))
        .route("/v1/", post(proxy::chat_completions))
        .route("/health", get(admin::health))
        .route("/admin/stats", get(admin::stats))
        .route("/v1/vision-models", get(admin::vision_models))
        .route("/v1/messages/count_tokens", post(proxy::count_tokens))
        .route("/api/event_logging/batch", post(proxy::event_logging));
    for path in MODELS_PATHS {
        router = router.route(path, get(admin::models));
    }
    // Trailing slashes are tolerated on both chat dialects.
    for path in CHAT_COMPLETIONS_PATHS {
        router = router
            .route(path, post(proxy::chat_completions))
            .route(&format!("{path}/"), post(proxy::chat_completions));
    }
    for path in MESSAGES_PATHS {
        router = router
            .route(path, post(proxy::messages))
            .route(&format!("{path}/"), post(proxy::messages));
    }

    router
        .layer(middleware::from_fn_with_state(auth, proxy::custom_key_auth))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
