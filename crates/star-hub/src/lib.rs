//! Star Protocol Hub: session registry, router, heartbeater, and connection
//! acceptor wired into one Axum service (spec.md §4).

pub mod acceptor;
pub mod auth;
pub mod config;
pub mod error;
pub mod heartbeat;
pub mod registry;
pub mod router;

use std::sync::Arc;

use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::Router;
use tracing::info;

pub use acceptor::HubContext;
pub use config::HubConfig;
pub use error::HubError;

use auth::{Authenticator, DefaultAuthenticator};
use registry::{CloseReason, Registry};
use star_metrics::MetricsSink;

/// Build the Axum router for the three connection shapes spec.md §4.2
/// describes, plus the teacher's `/healthz`/`/readyz` probes.
#[must_use]
pub fn build_router(ctx: HubContext) -> Router {
    Router::new()
        .route("/env/{env_id}/agent/{agent_id}", get(acceptor::agent_handler))
        .route("/env/{env_id}", get(acceptor::environment_handler))
        .route("/human/{human_id}", get(acceptor::human_handler))
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .fallback(fallback_404)
        .with_state(ctx)
}

/// Assemble a [`HubContext`] with the default (accept-everything)
/// authenticator and a no-op metrics sink, spawn the heartbeater, bind, and
/// serve until the given shutdown future resolves.
pub async fn run_hub(
    config: HubConfig,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), HubError> {
    run_hub_with(
        config,
        Arc::new(DefaultAuthenticator),
        Arc::new(star_metrics::NoopMetricsSink),
        shutdown,
    )
    .await
}

/// Same as [`run_hub`] but with a caller-supplied [`Authenticator`] and
/// [`MetricsSink`], for deployments that gate connections (spec.md §4.2,
/// §4.4) and want counters/gauges routed to a real backend (spec.md §4.7).
pub async fn run_hub_with(
    config: HubConfig,
    authenticator: Arc<dyn Authenticator>,
    metrics: Arc<dyn MetricsSink>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), HubError> {
    let bound = bind(config, authenticator, metrics).await?;
    serve_bound(bound, shutdown).await
}

/// A Hub that has bound its listening socket and started its heartbeater
/// but is not yet serving connections. Split out from [`run_hub_with`] so
/// test harnesses can bind to an ephemeral port (`port = 0`) and read back
/// the address actually assigned before any client tries to connect —
/// mirroring the teacher's `MockWsServer::start`, which binds first and
/// exposes `local_addr()` before accepting.
pub struct BoundHub {
    listener: tokio::net::TcpListener,
    ctx: HubContext,
    heartbeater: tokio::task::JoinHandle<()>,
}

impl BoundHub {
    /// The address the listener actually bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    #[must_use]
    pub fn registry(&self) -> Arc<Registry> {
        self.ctx.registry.clone()
    }
}

/// Bind the listening socket and spawn the heartbeater without serving yet.
pub async fn bind(
    config: HubConfig,
    authenticator: Arc<dyn Authenticator>,
    metrics: Arc<dyn MetricsSink>,
) -> Result<BoundHub, HubError> {
    let config = Arc::new(config);
    let registry = Arc::new(Registry::new());
    let ctx = HubContext {
        registry: registry.clone(),
        config: config.clone(),
        authenticator,
        metrics,
    };

    let heartbeater = tokio::spawn(heartbeat::run(
        registry.clone(),
        config.heartbeat_interval(),
        config.session_timeout(),
    ));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|source| HubError::Bind { addr: addr.clone(), source })?;
    info!(addr = %listener.local_addr().unwrap_or_else(|_| "?".parse().unwrap()), "hub listening");

    Ok(BoundHub { listener, ctx, heartbeater })
}

/// Serve an already-[`bind`]-ed Hub until `shutdown` resolves.
pub async fn serve_bound(
    bound: BoundHub,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), HubError> {
    let BoundHub { listener, ctx, heartbeater } = bound;
    let addr = listener
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_default();
    let registry = ctx.registry.clone();
    let router = build_router(ctx);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|source| HubError::Bind { addr, source })?;

    heartbeater.abort();

    // `axum::serve`'s graceful shutdown only tracks hyper's own connections;
    // each upgraded WebSocket detaches into its own `tokio::spawn`ed
    // reader/writer pair (acceptor.rs) that hyper never waits on. Sweep the
    // registry ourselves so no session outlives the Hub (spec.md §9).
    for session in registry.snapshot().await {
        registry.evict(&session.identity, CloseReason::Shutdown).await;
    }

    info!("hub shut down gracefully");
    Ok(())
}

async fn fallback_404() -> impl IntoResponse {
    (axum::http::StatusCode::NOT_FOUND, Html("<h1>404 Not Found</h1>"))
}

mod health {
    use axum::response::IntoResponse;

    pub async fn healthz() -> impl IntoResponse {
        "ok"
    }

    pub async fn readyz() -> impl IntoResponse {
        "ok"
    }
}
