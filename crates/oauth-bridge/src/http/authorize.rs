//! Authorize leg handler.

use axum::{
    extract::State,
    http::{
        HeaderMap, StatusCode,
        header::{HOST, LOCATION},
    },
    response::{IntoResponse, Response},
};
use axum_extra::extract::CookieJar;

use super::{StrategyRoute, found};

/// GET {authorize_path} handler.
///
/// Stores a handshake session, sets its cookie, and redirects to the
/// provider. Failures redirect to the strategy's failure target.
pub async fn authorize_handler(
    State(route): State<StrategyRoute>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Response {
    let host = headers.get(HOST).and_then(|h| h.to_str().ok());

    match route.coordinator.authorize(&route.strategy, host).await {
        Ok(redirect) => (
            StatusCode::FOUND,
            jar.add(redirect.handshake_cookie),
            [(LOCATION, redirect.location)],
        )
            .into_response(),
        Err(e) => {
            tracing::error!(
                strategy = %route.strategy.id,
                category = %e.category(),
                error = %e,
                "Failed to start authorization"
            );
            found(&route.strategy.settings.failure_redirect)
        }
    }
}
