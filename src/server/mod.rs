//! HTTP ingress for transcript fragments, engine loading and voice selection.

mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::routing::{get, post};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::pipeline::Pipeline;
use crate::tts::EngineFactory;

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub factory: Arc<dyn EngineFactory>,
    /// Model loaded by `/load_model` when the request names none.
    pub default_model: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/load_model", post(routes::load_model))
        .route("/transcript", post(routes::transcript))
        .route("/voice", post(routes::voice))
        .route("/health", get(routes::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown` is cancelled, then finish in-flight requests.
pub async fn serve(addr: SocketAddr, state: AppState, shutdown: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await.with_context(|| format!("Failed to bind {}", addr))?;
    info!("🌐 Listening for transcripts on http://{}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("HTTP server error")
}
