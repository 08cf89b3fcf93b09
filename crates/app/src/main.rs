use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use voxbridge_app::ingress::{self, AppState};
use voxbridge_app::{Runtime, SessionRegistry};
use voxbridge_foundation::BridgeConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,voxbridge=debug".parse().expect("valid filter")),
        )
        .init();

    let config = BridgeConfig::from_env()?;
    let bind_addr = config.bind_addr.clone();

    let runtime = Runtime::new(config);
    let registry = SessionRegistry::new(runtime);

    let app = ingress::router(AppState {
        registry: registry.clone(),
    });

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(%bind_addr, "voxbridge server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(registry))
        .await?;

    Ok(())
}

async fn shutdown_signal(registry: Arc<SessionRegistry>) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(%err, "failed to listen for shutdown signal");
        return;
    }
    info!("shutdown signal received, closing active sessions");
    registry.shutdown().await;
}
