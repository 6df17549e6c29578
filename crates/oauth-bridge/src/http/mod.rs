//! HTTP endpoints for the authorization handshake.
//!
//! [`bridge_router`] mounts one authorize and one callback route per enabled
//! strategy. Disabled strategies keep their paths claimed but get no route.
//!
//! # Usage
//!
//! ```ignore
//! use axum::Router;
//! use oauth_bridge::http::bridge_router;
//!
//! let app = Router::new().merge(bridge_router(coordinator.clone()));
//! ```

pub mod authorize;
pub mod callback;

use std::sync::Arc;

use axum::{
    Json, Router,
    http::{StatusCode, header::LOCATION},
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::json;

use crate::flow::FlowCoordinator;
use crate::registry::RegisteredStrategy;

pub use authorize::authorize_handler;
pub use callback::{CallbackParams, callback_handler};

/// State of the routes of one strategy.
#[derive(Clone)]
pub struct StrategyRoute {
    /// Shared coordinator.
    pub coordinator: Arc<FlowCoordinator>,
    /// Strategy served by the route.
    pub strategy: Arc<RegisteredStrategy>,
}

/// Builds the router with the endpoints of every enabled strategy.
pub fn bridge_router(coordinator: Arc<FlowCoordinator>) -> Router {
    let mut router = Router::new();
    for strategy in coordinator.registry().enabled() {
        let route = StrategyRoute {
            coordinator: coordinator.clone(),
            strategy: strategy.clone(),
        };
        router = router.merge(
            Router::new()
                .route(strategy.authorize_path(), get(authorize_handler))
                .route(&strategy.callback_path, get(callback_handler))
                .with_state(route),
        );
    }
    router
}

/// `302 Found` to `location`.
pub(crate) fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(LOCATION, location.to_string())]).into_response()
}

/// Initialization barrier response.
pub(crate) fn not_initialized() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({
            "error": "not_initialized",
            "error_description": "The authentication backend is starting up, retry shortly"
        })),
    )
        .into_response()
}
