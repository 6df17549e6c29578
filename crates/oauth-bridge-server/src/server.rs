use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{Router, routing::get};
use oauth_bridge::resolver::{RequestContext, ResolverError, UserinfoResolver};
use oauth_bridge::{
    FlowCoordinator, HostHandle, HttpCodeExchanger, HttpUserinfoResolver, InMemoryHandshakeStore,
    StrategyConfig, StrategyRegistry, bridge_router,
};
use serde_json::Value;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::{bootstrap, config::AppConfig, handlers};

/// Paths served by the host routes of [`build_router`].
pub const HOST_ROUTES: [&str; 5] = ["/", "/healthz", "/readyz", "/auth/providers", "/admin"];

/// Shared state of the host routes.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<FlowCoordinator>,
}

pub struct OAuthBridgeServer {
    addr: SocketAddr,
    app: Router,
}

/// Resolver of strategies registered without a userinfo endpoint.
struct UnconfiguredResolver;

#[async_trait]
impl UserinfoResolver for UnconfiguredResolver {
    async fn userinfo(
        &self,
        _access_token: &str,
        _refresh_token: Option<&str>,
        _request: Option<&RequestContext>,
    ) -> Result<Value, ResolverError> {
        Err(ResolverError::failed("no userinfo_url configured"))
    }
}

/// Registers every configured strategy and builds the coordinator around
/// `host`. The backend is not injected.
pub fn build_coordinator(cfg: &AppConfig, host: HostHandle) -> anyhow::Result<FlowCoordinator> {
    let http_client = reqwest::Client::builder()
        .timeout(cfg.host.exchange_timeout)
        .build()?;

    let mut registry = StrategyRegistry::new();
    for path in HOST_ROUTES {
        registry.reserve_path(path)?;
    }
    for settings in &cfg.strategies {
        let resolver: Arc<dyn UserinfoResolver> = match &settings.userinfo_url {
            Some(url) => Arc::new(HttpUserinfoResolver::new(http_client.clone(), url.clone())),
            None => Arc::new(UnconfiguredResolver),
        };
        registry.register(StrategyConfig::new(settings.clone(), resolver))?;
    }

    let coordinator = FlowCoordinator::new(
        cfg.bridge.clone(),
        registry,
        host,
        Arc::new(InMemoryHandshakeStore::new()),
        Arc::new(HttpCodeExchanger::with_client(http_client)),
    )?;
    Ok(coordinator)
}

/// Host routes, the bridge endpoints and the middleware stack.
pub fn build_router(coordinator: Arc<FlowCoordinator>) -> Router {
    let state = AppState {
        coordinator: coordinator.clone(),
    };

    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .route("/readyz", get(handlers::readyz))
        .route("/auth/providers", get(handlers::providers))
        .route("/admin", get(handlers::session))
        .with_state(state)
        .merge(bridge_router(coordinator))
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    use tracing::field::Empty;
                    // Only the path: query strings carry authorization codes.
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri().path(),
                        http.status_code = Empty,
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        span.record(
                            "http.status_code",
                            tracing::field::display(res.status().as_u16()),
                        );
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
}

/// Builds the complete application with the host backend injected.
pub async fn build_app(cfg: &AppConfig) -> anyhow::Result<Router> {
    let coordinator = Arc::new(build_coordinator(cfg, HostHandle::new())?);
    let backend = bootstrap::build_backend(cfg, &coordinator).await?;
    coordinator.host().inject(backend)?;
    Ok(build_router(coordinator))
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        let cfg = AppConfig::default();
        Self {
            addr: cfg.addr(),
            config: cfg,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.addr = cfg.addr();
        self.config = cfg;
        self
    }

    pub async fn build(self) -> anyhow::Result<OAuthBridgeServer> {
        let app = build_app(&self.config).await?;

        Ok(OAuthBridgeServer {
            addr: self.addr,
            app,
        })
    }
}

impl OAuthBridgeServer {
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }
}

async fn shutdown_signal() {
    // Wait for Ctrl+C
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
