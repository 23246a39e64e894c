//! flotilla engine
//!
//! The engine is the cluster's single scheduler: it holds the leadership
//! lease, runs the reconciler against the key-value registry, and drives
//! every declared unit toward its target state.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use flotilla_engine::api;
use flotilla_engine::config::Config;
use flotilla_engine::engine::{Engine, EngineWorker, LeaseKeeper};
use flotilla_engine::kv::EtcdClient;
use flotilla_engine::registry::Registry;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting flotilla engine");

    let config = Config::from_env()?;
    info!(
        etcd_endpoint = %config.etcd_endpoint,
        key_prefix = %config.key_prefix,
        reconcile_interval_secs = config.reconcile_interval.as_secs(),
        "configuration loaded"
    );

    let kv = match EtcdClient::new(&config.etcd_endpoint, config.request_timeout) {
        Ok(kv) => Arc::new(kv),
        Err(e) => {
            error!(error = %e, "failed to build store client");
            return Err(e.into());
        }
    };
    let registry = Arc::new(Registry::new(kv, &config.key_prefix));

    let engine_id = ulid::Ulid::new().to_string();
    let lease = registry.engine_lease(engine_id.clone(), config.lease_ttl);
    info!(engine_id = %engine_id, "engine identity minted");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    // Status API.
    let app = api::create_router();
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "status API listening");
    tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, app).await {
            error!(%error, "status API failed");
        }
    });

    // Leadership and the reconcile worker.
    let (keeper, leader_rx) = LeaseKeeper::new(lease, config.lease_ttl);
    let keeper_handle = tokio::spawn(keeper.run(shutdown_rx.clone()));

    let engine = Arc::new(Engine::new(registry));
    let worker = EngineWorker::new(engine, config.reconcile_interval);
    worker.run(shutdown_rx, leader_rx).await;

    keeper_handle.await?;
    info!("flotilla engine stopped");
    Ok(())
}
