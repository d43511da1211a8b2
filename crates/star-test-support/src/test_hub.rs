//! An in-process, real-socket Hub for integration tests.
//!
//! Grounded on the teacher's `rt-test-utils::MockWsServer` (binds to a
//! random port, exposes `local_addr()`, runs the accept loop in a
//! background task) but wraps the real `star-hub` instead of a hand-rolled
//! protocol stub — tests exercise the actual router/registry/heartbeater,
//! not a re-implementation of them.

use std::sync::Arc;

use star_hub::auth::{Authenticator, DefaultAuthenticator};
use star_hub::registry::Registry;
use star_hub::{bind, serve_bound, HubConfig, HubError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// A running Hub bound to `127.0.0.1:<random>`, shut down when dropped.
pub struct TestHub {
    addr: std::net::SocketAddr,
    registry: Arc<Registry>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    serve_task: Option<JoinHandle<Result<(), HubError>>>,
}

impl TestHub {
    /// Start a Hub with the default (accept-everything) authenticator and
    /// the given config, except `host`/`port`, which are forced to an
    /// ephemeral local port.
    pub async fn start(config: HubConfig) -> Self {
        Self::start_with(config, Arc::new(DefaultAuthenticator)).await
    }

    /// Same as [`Self::start`] with a caller-supplied authenticator, for
    /// tests exercising `enable_auth`.
    pub async fn start_with(mut config: HubConfig, authenticator: Arc<dyn Authenticator>) -> Self {
        config.host = "127.0.0.1".to_owned();
        config.port = 0;

        Self::bind_and_serve(config, authenticator).await
    }

    /// Start a Hub bound to a specific local port, for tests simulating a
    /// server restart (stop one `TestHub`, start another on the same
    /// address the client was already trying to reach).
    pub async fn start_on_port(port: u16, mut config: HubConfig) -> Self {
        config.host = "127.0.0.1".to_owned();
        config.port = port;

        Self::bind_and_serve(config, Arc::new(DefaultAuthenticator)).await
    }

    async fn bind_and_serve(config: HubConfig, authenticator: Arc<dyn Authenticator>) -> Self {
        let metrics = Arc::new(star_metrics::NoopMetricsSink);
        let bound = bind(config, authenticator, metrics).await.expect("bind to the requested port");
        let addr = bound.local_addr().expect("bound listener has a local address");
        let registry = bound.registry();

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let serve_task = tokio::spawn(async move {
            serve_bound(bound, async {
                let _ = shutdown_rx.await;
            })
            .await
        });

        Self { addr, registry, shutdown_tx: Some(shutdown_tx), serve_task: Some(serve_task) }
    }

    /// The base `ws://` URL agents/environments/humans should connect to,
    /// e.g. `ws://127.0.0.1:54213`.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    #[must_use]
    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.addr
    }

    #[must_use]
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Request graceful shutdown and wait for the serve task to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.serve_task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for TestHub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.serve_task.take() {
            task.abort();
        }
    }
}
