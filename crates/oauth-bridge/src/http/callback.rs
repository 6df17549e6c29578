//! Callback leg handler.

use axum::{
    extract::{Query, State, rejection::QueryRejection},
    http::{HeaderMap, StatusCode, Uri, header::LOCATION},
    response::{IntoResponse, Response},
};
use axum_extra::extract::CookieJar;
use cookie::Cookie;
use serde::Deserialize;

use super::{StrategyRoute, found, not_initialized};
use crate::error::BridgeError;
use crate::flow::{CallbackOutcome, CallbackRequest};
use crate::resolver::RequestContext;

/// Query parameters of the provider redirect.
#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    /// Authorization code.
    pub code: Option<String>,
    /// Handshake state.
    pub state: Option<String>,
    /// Provider error code.
    pub error: Option<String>,
}

/// GET {callback_path} handler.
///
/// Responds `302` to the success redirect with the session cookie, or `302`
/// to the failure redirect without it, including when the query string does
/// not parse. Before the host backend is injected it responds `503`.
pub async fn callback_handler(
    State(route): State<StrategyRoute>,
    query: Result<Query<CallbackParams>, QueryRejection>,
    uri: Uri,
    headers: HeaderMap,
    jar: CookieJar,
) -> Response {
    let backend = match route.coordinator.host().get() {
        Ok(backend) => backend,
        Err(_) => return not_initialized(),
    };

    let handshake_cookie = route.coordinator.settings().session.cookie_name.clone();
    let params = match query {
        Ok(Query(params)) => params,
        Err(rejection) => {
            tracing::warn!(
                strategy = %route.strategy.id,
                error = %rejection,
                "Malformed callback query"
            );
            let jar = jar.remove(Cookie::build(handshake_cookie).path("/"));
            let location = route.strategy.settings.failure_redirect.clone();
            return (StatusCode::FOUND, jar, [(LOCATION, location)]).into_response();
        }
    };

    let request = CallbackRequest {
        code: params.code,
        state: params.state,
        error: params.error,
        handshake_id: jar.get(&handshake_cookie).map(|c| c.value().to_string()),
        session_token: jar
            .get(&backend.minter.cookie_name())
            .map(|c| c.value().to_string()),
        context: RequestContext { uri, headers },
    };

    let jar = jar.remove(Cookie::build(handshake_cookie).path("/"));

    match route.coordinator.callback(&route.strategy, request).await {
        Ok(CallbackOutcome::Success(login)) => (
            StatusCode::FOUND,
            jar.add(login.session_cookie),
            [(LOCATION, login.location)],
        )
            .into_response(),
        Ok(CallbackOutcome::Failure { location, .. }) => {
            (StatusCode::FOUND, jar, [(LOCATION, location)]).into_response()
        }
        Err(BridgeError::NotInitialized) => not_initialized(),
        Err(e) => {
            tracing::error!(strategy = %route.strategy.id, error = %e, "Callback failed");
            found(&route.strategy.settings.failure_redirect)
        }
    }
}
