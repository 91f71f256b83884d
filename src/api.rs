//! HTTP control API
//!
//! Runs on its own task and never waits on workers, except `POST /stop`
//! which answers once the run has drained.

use std::{future::Future, net::SocketAddr};

use anyhow::Context;
use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tracing::info;

use crate::crawling::CrawlingEngine;

pub mod error;
pub mod handlers;

/// Shared handler state
#[derive(Clone)]
pub struct Ctx {
    pub engine: CrawlingEngine,
}

pub fn router(engine: CrawlingEngine) -> Router {
    Router::new()
        .route("/start", post(handlers::start))
        .route("/pause", post(handlers::pause))
        .route("/resume", post(handlers::resume))
        .route("/stop", post(handlers::stop))
        .route("/status", get(handlers::status))
        .route("/health", get(handlers::health))
        .with_state(Ctx { engine })
}

/// Serves the control API until `shutdown` resolves
pub async fn serve(
    at: SocketAddr,
    engine: CrawlingEngine,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(at)
        .await
        .with_context(|| format!("Failed to bind control API on {at}"))?;
    let local = listener.local_addr().context("Failed to read bound address")?;
    info!("🌐 Control API listening on http://{}", local);

    axum::serve(listener, router(engine))
        .with_graceful_shutdown(shutdown)
        .await
        .context("Control API server failed")
}
