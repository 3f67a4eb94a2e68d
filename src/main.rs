//! FiberWatch - operator-gated customer notifications for optical-line faults.
//!
//! # API Endpoints
//!
//! - `GET /incidents` - Open incidents awaiting a decision
//! - `GET /detalhes/:id` - Incident snapshot and affected subscribers
//! - `GET /historico` - Past decisions with current fault status
//! - `POST /acao` - Approve or deny notification for an incident
//! - `GET /health` - Health check

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use fiberwatch::api::{AppState, router};
use fiberwatch::config::Config;
use fiberwatch::storage::Storage;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Subscriber phone numbers are only ever logged masked.
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("fiberwatch=info".parse()?))
        .init();

    let config = Config::from_env()?;

    info!(
        port = config.port,
        db_url = %config.database_url,
        api = %config.api_base_url,
        "Starting FiberWatch server"
    );

    // Initialize storage
    let storage = Storage::new(&config.database_url).await?;
    info!("Database initialized");

    let state = AppState::new(&config, storage);

    let app = router(state).layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;

    info!(%addr, "FiberWatch is listening");

    axum::serve(listener, app).await?;

    Ok(())
}
