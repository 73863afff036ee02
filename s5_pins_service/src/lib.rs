//! Remote pinning service for S5 nodes.
//!
//! The [`PinStore`] owns the durable queue of pin requests. [`http::router`]
//! exposes it over the remote pinning HTTP API, and [`run_server`] wires
//! both to the backends named in a [`PinsNodeConfig`].

use crate::auth::StaticTokens;
use crate::config::{LedgerConfig, PinsNodeConfig};
use crate::gateway::GatewayPins;
use crate::http::AppState;
use crate::network::TcpNetwork;
use anyhow::Context;
use s5_pins_core::Datastore;
use s5_pins_store_memory::MemoryDatastore;
use s5_pins_store_redb::RedbDatastore;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;

pub mod auth;
pub mod config;
pub mod gateway;
pub mod http;
mod locks;
pub mod network;
pub mod pin_store;

pub use pin_store::PinStore;

pub fn create_datastore(config: &LedgerConfig) -> anyhow::Result<Arc<dyn Datastore>> {
    let store: Arc<dyn Datastore> = match config {
        LedgerConfig::Redb { path } => Arc::new(
            RedbDatastore::open(path)
                .with_context(|| format!("could not open ledger at {path:?}"))?,
        ),
        LedgerConfig::Memory => Arc::new(MemoryDatastore::new()),
    };
    Ok(store)
}

/// Serves the HTTP API on `listener` until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    info!("pinning service listening on {}", listener.local_addr()?);
    axum::serve(listener, http::router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

pub async fn run_server(config: PinsNodeConfig) -> anyhow::Result<()> {
    config.validate()?;
    let datastore = create_datastore(&config.ledger)?;
    let content = GatewayPins::create(
        config.content.gateway,
        config.content.blob_dir,
        datastore.clone(),
        config.content.index_prefix,
        Duration::from_secs(config.content.fetch_timeout_secs),
    )?;
    let network = TcpNetwork::new(
        config.network.announce,
        Duration::from_secs(config.network.dial_timeout_secs),
    );

    let pins = PinStore::new(
        datastore,
        Arc::new(content),
        Arc::new(network),
        config.pin_store,
    );
    pins.start().await?;

    let state = AppState {
        pins: pins.clone(),
        auth: Arc::new(StaticTokens::new(config.users)),
    };
    let listener = TcpListener::bind(config.server.listen)
        .await
        .with_context(|| format!("could not bind {}", config.server.listen))?;

    serve(listener, state, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await?;

    info!("Shutting down.");
    pins.stop().await;
    Ok(())
}
