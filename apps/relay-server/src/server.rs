//! Admin/health HTTP surface.
//!
//! All routes are read-only or idempotent triggers; there is no state here
//! beyond the subscriber cache and queue introspection.

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::net::{IpAddr, SocketAddr};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::app::AppState;
use crate::cli::Args;

pub struct Server {
    args: Args,
    state: AppState,
}

impl Server {
    pub fn new(args: Args, state: AppState) -> Result<Self> {
        Ok(Self { args, state })
    }

    pub async fn run(self) -> Result<()> {
        let host: IpAddr = self
            .state
            .config
            .server
            .host
            .parse()
            .context("Invalid server host")?;
        let port = self.args.port.unwrap_or(self.state.config.server.port);
        let addr = SocketAddr::new(host, port);

        let app = build_http_router(self.state);

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .context("Failed to bind HTTP server")?;

        info!("HTTP server listening on {}", addr);

        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("HTTP server error")?;

        Ok(())
    }
}

fn build_http_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/health/ready", get(ready))
        .route("/health/subscribers", get(list_subscribers))
        .route("/health/subscribers/refresh", post(refresh_subscribers))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

// Route handlers

async fn root() -> Json<Value> {
    Json(json!({
        "service": "webhook-relay",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let stats = state.registry.stats();
    let counts = state.queue.counts();

    Json(json!({
        "status": "ok",
        "service": "webhook-relay",
        "timestamp": Utc::now().to_rfc3339(),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "subscribers": {
            "count": stats.subscriber_count,
            "cache_valid": stats.is_valid,
            "using_fallback": stats.using_fallback,
            "age_ms": stats.age_ms,
        },
        "queue": counts,
    }))
}

async fn ready(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let stats = state.registry.stats();
    let redis_connected = state.idempotency.health_check().await.is_ok();
    let subscribers_loaded = stats.subscriber_count > 0;

    let status = if redis_connected && subscribers_loaded {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if status == StatusCode::OK { "ready" } else { "not_ready" },
            "redis": if redis_connected { "connected" } else { "unavailable" },
            "subscribers": {
                "loaded": subscribers_loaded,
                "count": stats.subscriber_count,
                "using_fallback": stats.using_fallback,
            },
        })),
    )
}

async fn list_subscribers(State(state): State<AppState>) -> Json<Value> {
    let subscribers = state.registry.all_active().await;
    let stats = state.registry.stats();

    Json(json!({
        "total": subscribers.len(),
        "cache": stats,
        "subscribers": subscribers,
    }))
}

async fn refresh_subscribers(State(state): State<AppState>) -> Json<Value> {
    let subscribers = state.registry.force_refresh().await;

    Json(json!({
        "message": "Subscribers cache refreshed",
        "count": subscribers.len(),
        "subscribers": subscribers
            .iter()
            .map(|s| json!({"name": s.name, "event_patterns": s.event_patterns}))
            .collect::<Vec<_>>(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_root_handler() {
        let response = root().await;
        assert_eq!(response.0["service"], "webhook-relay");
        assert_eq!(response.0["status"], "running");
    }
}
