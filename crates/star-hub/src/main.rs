use std::env;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use star_hub::HubConfig;

#[tokio::main]
async fn main() {
    let mut config = match env::var("STAR_HUB_CONFIG") {
        Ok(path) => {
            let text = std::fs::read_to_string(&path)
                .unwrap_or_else(|e| panic!("failed to read config file {path}: {e}"));
            HubConfig::from_toml_str(&text).unwrap_or_else(|e| panic!("invalid config {path}: {e}"))
        }
        Err(_) => HubConfig::default(),
    };
    config
        .apply_env_overrides()
        .unwrap_or_else(|e| panic!("invalid environment override: {e}"));

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .init();

    if let Err(e) = star_hub::run_hub(config, shutdown_signal()).await {
        error!(error = %e, "hub exited with an error");
        std::process::exit(1);
    }
}

/// Waits for SIGTERM or Ctrl-C (SIGINT) and returns to trigger graceful shutdown.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received SIGTERM, shutting down"); },
    }
}
