//! ShadowWallet HTTP API
//!
//! Wires the state layer into an axum router:
//! - `/api/users`: account lookup, registration and partial updates
//! - `/api/transactions`: raw ledger access plus cancellation
//! - `/api/wallets/:address/*`: shield, transfer, unshield, balance, reconcile
//! - `/api/health`, `/api/client-config`

pub mod config;
pub mod error;
mod transactions;
mod users;
mod wallets;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use shadow_wallet_state::{
    BalanceProjector, ConfirmationScheduler, Database, LedgerStore, MockProvingBackend,
    Orchestrator, Preferences, ProvingBackend, DEFAULT_TOKEN,
};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

pub use config::{BackendConfig, DbLocation};
pub use error::ApiError;

/// Settings echoed to browser clients.
#[derive(Clone, Debug)]
pub struct ClientSettings {
    pub app_name: String,
    pub walletconnect_project_id: Option<String>,
    pub enable_testnets: bool,
}

impl ClientSettings {
    pub fn from_config(config: &BackendConfig) -> Self {
        Self {
            app_name: config.app_name.clone(),
            walletconnect_project_id: config.walletconnect_project_id.clone(),
            enable_testnets: config.enable_testnets,
        }
    }

    pub(crate) fn default_preferences(&self) -> Preferences {
        Preferences {
            enable_testnets: self.enable_testnets,
            default_token: DEFAULT_TOKEN.to_string(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    db: Database,
    orchestrator: Orchestrator,
    client: Arc<ClientSettings>,
}

impl AppState {
    /// Builds the full component graph from `config` with the mock prover.
    pub fn new(config: &BackendConfig) -> Self {
        Self::with_prover(config, Arc::new(MockProvingBackend))
    }

    pub fn with_prover(config: &BackendConfig, prover: Arc<dyn ProvingBackend>) -> Self {
        let client = ClientSettings::from_config(config);
        let db = config.db_location.database();
        let ledger = LedgerStore::new(db.clone());
        let projector = BalanceProjector::new(db.clone(), ledger.clone())
            .with_mode(config.adjust_mode)
            .with_default_preferences(client.default_preferences());
        let confirmations = ConfirmationScheduler::new(ledger.clone(), config.confirmation_delay);
        let orchestrator = Orchestrator::new(ledger, projector, prover, confirmations);
        Self::with_components(db, orchestrator, client)
    }

    pub fn with_components(db: Database, orchestrator: Orchestrator, client: ClientSettings) -> Self {
        Self {
            db,
            orchestrator,
            client: Arc::new(client),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn ledger(&self) -> &LedgerStore {
        self.orchestrator.ledger()
    }

    pub fn projector(&self) -> &BalanceProjector {
        self.orchestrator.projector()
    }

    pub fn client_settings(&self) -> &ClientSettings {
        &self.client
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/users",
            get(users::get_user)
                .post(users::create_user)
                .put(users::update_user)
                .fallback(error::method_not_allowed),
        )
        .route(
            "/api/transactions",
            get(transactions::list_transactions)
                .post(transactions::create_transaction)
                .put(transactions::update_transaction)
                .fallback(error::method_not_allowed),
        )
        .route(
            "/api/transactions/:id/cancel",
            post(transactions::cancel_transaction),
        )
        .route("/api/wallets/connect", post(wallets::connect))
        .route("/api/wallets/:address/balance", get(wallets::balance))
        .route("/api/wallets/:address/shield", post(wallets::shield))
        .route("/api/wallets/:address/transfer", post(wallets::transfer))
        .route("/api/wallets/:address/unshield", post(wallets::unshield))
        .route("/api/wallets/:address/reconcile", post(wallets::reconcile))
        .route("/api/health", get(wallets::health))
        .route("/api/client-config", get(wallets::client_config))
        .with_state(state)
}

/// Runs the server until ctrl-c, then flushes the database.
pub async fn serve(config: BackendConfig) -> anyhow::Result<()> {
    let state = AppState::new(&config);
    state.database().open()?;

    let app = app_router(state.clone());
    let app = if config.enable_cors {
        app.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        app
    };

    let listener = TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "ShadowWallet API listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.database().flush()?;
    info!("database flushed, shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
