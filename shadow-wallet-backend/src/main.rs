//! ShadowWallet API server

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shadow_wallet_backend::{serve, BackendConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,shadow_wallet_state=debug,shadow_wallet_backend=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = BackendConfig::from_env();

    info!("Starting ShadowWallet API server...");
    info!("  Listen address: {}", config.listen_addr);
    info!("  Database: {:?}", config.db_location);
    info!("  Confirmation delay: {:?}", config.confirmation_delay);
    info!("  Balance adjustment: {}", config.adjust_mode);
    info!("  CORS enabled: {}", config.enable_cors);

    serve(config).await
}
