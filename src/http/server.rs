//! Router construction and the HTTP listener loop.
//!
//! Mirrors `hut8-soar`'s `start_web_server`: build an `AppState`, wire a
//! permissive CORS layer plus request tracing, bind a `TcpListener`, serve.
//! The teacher nests a single `/data` API router; here every mode gets the
//! same four routes plus a couple of global ones, so the router is built
//! from the catalog instead of being hand-enumerated per endpoint.

use std::sync::Arc;

use anyhow::Result;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::decoder::DecoderRegistry;

use super::handlers::{get_health, get_status, get_tools, post_killall, post_start, post_stop};
use super::sse::get_stream;
use super::state::AppState;

pub async fn serve(registry: Arc<DecoderRegistry>) -> Result<()> {
    let bind_addr = registry.config.http_bind.clone();
    let app_state = AppState { registry };

    let mode_router = Router::new()
        .route("/{mode}/status", get(get_status))
        .route("/{mode}/start", post(post_start))
        .route("/{mode}/stop", post(post_stop))
        .route("/{mode}/tools", get(get_tools))
        .route("/{mode}/stream", get(get_stream));

    let app = Router::new()
        .merge(mode_router)
        .route("/health", get(get_health))
        .route("/killall", post(post_killall))
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("valentine-rf listening on http://{}", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
