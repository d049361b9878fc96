use std::sync::Arc;

use axum::{http::HeaderValue, routing::get, Json, Router};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

pub mod api;
pub mod config;
pub mod error;
pub mod humanize;
pub mod models;
pub mod realtime;
pub mod services;
pub mod storage;

use config::Config;
use realtime::RoomHub;

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: Arc<Config>,
    pub hub: Arc<RoomHub>,
}

impl AppState {
    /// The hub starts stopped; call [`RoomHub::start`] before serving.
    pub fn new(db: SqlitePool, config: Config) -> Self {
        let hub = Arc::new(RoomHub::new(config.realtime.client_buffer));
        Self {
            db,
            config: Arc::new(config),
            hub,
        }
    }
}

/// Full HTTP surface: health check plus the chat API under `/api/chat`.
pub fn build_app(state: AppState) -> Router {
    let cors = cors_layer(&state.config.server.allowed_origins);

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/chat", api::router::create_router(state.clone()))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return base.allow_origin(Any);
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();

    base.allow_origin(AllowOrigin::list(parsed))
}

async fn health_check() -> Json<Value> {
    Json(json!({ "ok": true, "status": "OK" }))
}
