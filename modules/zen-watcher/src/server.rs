//! The shared HTTP server: one `axum` listener serving every
//! webhook source's route plus `/healthz` (always 200 once the process is
//! up) and `/readyz` (200 iff every adapter reports non-degraded health).
//!
//! Grounded on `rootsignal-api::rest`'s axum server-bootstrap shape
//! (router assembly, bind, graceful shutdown on a cancellation signal).

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::wiring::ReadinessCheck;
use zen_adapters::HealthState;

#[derive(Clone)]
struct HealthAppState {
    readiness: Arc<Vec<ReadinessCheck>>,
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn readyz(State(state): State<HealthAppState>) -> impl IntoResponse {
    let degraded: Vec<String> = state
        .readiness
        .iter()
        .filter_map(|check| match check() {
            HealthState::Ok => None,
            HealthState::Degraded(reason) => Some(reason),
        })
        .collect();

    if degraded.is_empty() {
        StatusCode::OK.into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"degraded": degraded})),
        )
            .into_response()
    }
}

pub async fn serve(
    webhook_router: Router,
    readiness: Vec<ReadinessCheck>,
    host: String,
    port: u16,
    cancel: CancellationToken,
) {
    let health_state = HealthAppState {
        readiness: Arc::new(readiness),
    };
    let health_router = Router::new()
        .route("/healthz", axum::routing::get(healthz))
        .route("/readyz", axum::routing::get(readyz))
        .with_state(health_state);

    let app = webhook_router.merge(health_router);
    let addr = format!("{host}:{port}");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(addr, error = %e, "failed to bind webhook/health server");
            return;
        }
    };
    info!(addr, "webhook/health server listening");

    let shutdown = async move { cancel.cancelled().await };
    if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown).await {
        error!(error = %e, "webhook/health server exited with error");
    }
}
