use std::{sync::Arc, time::Instant};

use anyhow::{Error, Result};
use axum::{
    Router,
    extract::State,
    response::{IntoResponse, Json},
    routing::get,
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{config::Config, models::health::LivenessResponse};

pub struct AppState {
    started_at: Instant,
}

pub fn router() -> Router {
    let state = Arc::new(AppState {
        started_at: Instant::now(),
    });

    Router::new()
        .route("/health", get(liveness))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_api_server(config: Config) -> Result<(), Error> {
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;

    info!(address = %addr, "Liveness server started");

    axum::serve(listener, router()).await?;

    Ok(())
}

async fn liveness(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(LivenessResponse::healthy(state.started_at.elapsed().as_secs()))
}
