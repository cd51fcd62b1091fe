//! Route wiring for the core's HTTP surface, following the
//! `api::routes::routes` + `api::create_app` split: a plain router
//! over typed state, then a thin wrapper adding cross-cutting middleware.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::wiring::Wiring;

use super::sse;

/// Builds the full application: routes plus tracing/CORS middleware,
/// mirroring `api::create_app`.
pub fn create_app(wiring: Wiring) -> Router {
    Router::new()
        .route("/events", get(events))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(tower_http::cors::Any))
        .with_state(wiring)
}

async fn events(State(wiring): State<Wiring>) -> impl IntoResponse {
    sse::live_updates(&wiring.bus)
}

async fn healthz(State(wiring): State<Wiring>) -> impl IntoResponse {
    let snapshot = wiring.health().await;
    let status = if snapshot.is_healthy() {
        axum::http::StatusCode::OK
    } else {
        axum::http::StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(snapshot))
}
