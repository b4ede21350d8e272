#![cfg(feature = "web-api")]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::info;

use cronwatch_core::runtime::{Module, ModuleCtx};
use cronwatch_core::store::{CounterStore, Summary};

#[derive(Clone)]
struct AppState {
    store: Arc<dyn CounterStore>,
    started: Instant,
}

/// Read-only stats endpoint over the counter store.
pub struct Dashboard {
    addr: SocketAddr,
    store: Arc<dyn CounterStore>,
}

impl Dashboard {
    pub fn new(addr: SocketAddr, store: Arc<dyn CounterStore>) -> Self {
        Self { addr, store }
    }
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/stats", get(stats))
        .route("/stats/summary", get(summary))
        .with_state(state)
}

impl Module for Dashboard {
    fn name(&self) -> &'static str { "dashboard" }

    fn spawn(self: Box<Self>, ctx: ModuleCtx) -> JoinHandle<anyhow::Result<()>> {
        tokio::spawn(async move {
            let app = router(AppState { store: self.store, started: Instant::now() });
            let listener = tokio::net::TcpListener::bind(self.addr).await?;
            info!("dashboard listening on http://{}", self.addr);

            let mut shutdown = ctx.shutdown.clone();
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    while !*shutdown.borrow() {
                        if shutdown.changed().await.is_err() {
                            break;
                        }
                    }
                })
                .await?;
            Ok(())
        })
    }
}

async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.snapshot() {
        Ok(snap) => Json(json!(snap)).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn summary(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.snapshot() {
        Ok(snap) => {
            let uptime_ms = state.started.elapsed().as_millis() as u64;
            Json(json!({ "uptime_ms": uptime_ms, "summary": Summary::from_stats(&snap) })).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}
