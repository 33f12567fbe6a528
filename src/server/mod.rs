//! HTTP surface: route table, shared state, health and shutdown.

mod git;
mod repos;

use crate::config::Config;
use crate::meta_store::MetaStore;
use crate::object_store::ObjectStore;
use anyhow::{Context, Result};
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;
use std::time::Duration;
use tokio::net::TcpListener;

/// In-flight requests get this long to drain after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Upper bound on request bodies; a push larger than this is a 413.
const MAX_BODY_BYTES: usize = 256 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub meta: MetaStore,
    pub objects: ObjectStore,
}

pub struct Server {
    config: Config,
    state: AppState,
}

impl Server {
    pub fn new(config: Config, meta: MetaStore, objects: ObjectStore) -> Self {
        Self {
            config,
            state: AppState { meta, objects },
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health))
            .route("/repositories", get(repos::list).post(repos::create))
            .route(
                "/repositories/:repo",
                get(repos::get_one).put(repos::rename).delete(repos::remove),
            )
            .route("/repositories/:repo/info/refs", get(git::info_refs))
            .route("/repositories/:repo/git-upload-pack", post(git::upload_pack))
            .route(
                "/repositories/:repo/git-receive-pack",
                post(git::receive_pack),
            )
            .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
            .with_state(self.state.clone())
    }

    /// Serve until SIGINT/SIGTERM, then drain within the grace window.
    pub async fn run(self) -> Result<()> {
        let addr = self.config.server.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        tracing::info!(%addr, "gitvault listening");

        let (tx, rx) = tokio::sync::watch::channel(false);
        tokio::spawn(async move {
            shutdown_signal().await;
            let _ = tx.send(true);
        });

        let mut graceful_rx = rx.clone();
        let serve = axum::serve(listener, self.router()).with_graceful_shutdown(async move {
            let _ = graceful_rx.changed().await;
        });

        let mut grace_rx = rx;
        tokio::select! {
            result = serve => result.context("server error")?,
            _ = async {
                let _ = grace_rx.changed().await;
                tokio::time::sleep(SHUTDOWN_GRACE).await;
            } => {
                tracing::warn!("shutdown grace period expired with requests in flight");
            }
        }
        Ok(())
    }
}

async fn shutdown_signal() {
    let interrupt = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };
    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received");
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    meta_store: &'static str,
    object_store: &'static str,
}

/// 200 when both backends answer a ping, 503 otherwise. Never cached.
async fn health(State(state): State<AppState>) -> Response {
    let mut body = HealthResponse {
        status: "ok",
        meta_store: "up",
        object_store: "up",
    };

    if let Err(err) = state.meta.ping().await {
        tracing::error!(%err, "metadata store health check failed");
        body.meta_store = "down";
    }
    if let Err(err) = state.objects.ping().await {
        tracing::error!(%err, "object store health check failed");
        body.object_store = "down";
    }

    let status = if body.meta_store == "up" && body.object_store == "up" {
        StatusCode::OK
    } else {
        body.status = "error";
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        [
            (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
            (header::PRAGMA, "no-cache"),
            (header::EXPIRES, "0"),
        ],
        Json(body),
    )
        .into_response()
}
