use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use axum_extra::extract::CookieJar;
use serde::Serialize;
use serde_json::json;

use crate::server::AppState;

#[derive(Serialize)]
pub struct HealthResponse<'a> {
    status: &'a str,
}

pub async fn root(State(state): State<AppState>) -> impl IntoResponse {
    let body = json!({
        "service": "OAuth Bridge",
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "providers": state.coordinator.registry().sign_in_controls(),
    });
    (StatusCode::OK, Json(body))
}

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

/// Ready once the host backend has been injected.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    if state.coordinator.host().is_ready() {
        (StatusCode::OK, Json(HealthResponse { status: "ready" }))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse { status: "starting" }),
        )
    }
}

/// Sign-in controls for the enabled strategies.
pub async fn providers(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.coordinator.registry().sign_in_controls())
}

/// Claims of the current session, read from the session cookie.
pub async fn session(State(state): State<AppState>, jar: CookieJar) -> impl IntoResponse {
    let backend = match state.coordinator.host().get() {
        Ok(backend) => backend,
        Err(_) => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": "not_initialized" })),
            );
        }
    };

    let Some(cookie) = jar.get(&backend.minter.cookie_name()) else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "unauthenticated" })),
        );
    };

    match backend.minter.verify(cookie.value()) {
        Ok(claims) => (StatusCode::OK, Json(json!(claims))),
        Err(e) => {
            tracing::debug!(error = %e, "Rejected session cookie");
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "invalid_session" })),
            )
        }
    }
}
