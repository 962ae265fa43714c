//! HTTP endpoint
//!
//! One POST route accepting a chat-completions request. The handler always
//! answers 200 with a JSON body; translation failures are reported inside the
//! body as sentinel objects.
//!
//! ```text
//!   client ──POST {route}──> translate() ──> Gateway::handle ──> pools
//!          <──200 JSON──────
//! ```

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use gateway_core::Gateway;

/// Build the router serving `route`
pub fn router(gateway: Arc<Gateway>, route: &str) -> Router {
    Router::new()
        .route(route, post(translate))
        .layer(TraceLayer::new_for_http())
        .with_state(gateway)
}

async fn translate(State(gateway): State<Arc<Gateway>>, body: Bytes) -> impl IntoResponse {
    let response = gateway.handle(&body).await;
    ([(CONTENT_TYPE, "application/json")], response)
}

/// Bind `address` and serve until `shutdown` resolves
pub async fn serve(
    address: &str,
    route: &str,
    gateway: Arc<Gateway>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = TcpListener::bind(address)
        .await
        .with_context(|| format!("Failed to bind to {address}"))?;
    info!(address = %address, route = %route, "Listening for requests");

    axum::serve(listener, router(gateway, route))
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server failed")
}
