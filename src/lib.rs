//! Engine Watch: keeps an always-fresh, deduplicated view of the containers
//! managed by a container engine and pushes updates to subscribers.
//!
//! Two sources are reconciled into one snapshot: periodic authoritative
//! listings from the engine's `ps` primitive and the low-latency `events`
//! feed in between. Redundant updates are suppressed by fingerprinting the
//! ordered snapshot, and resyncs are debounced so event storms never hammer
//! the engine.

pub mod api;
pub mod config;
pub mod container;
pub mod engine;
pub mod fingerprint;
pub mod service;
pub mod tunnel;

use tokio_util::sync::CancellationToken;

use crate::service::ReconciliationService;
use crate::tunnel::NoTunnelDiscovery;

/// Runs the service and its HTTP read route until Ctrl-C.
///
/// # Errors
///
/// Possible errors include:
/// - Invalid configuration in the environment.
/// - Failure to bind the API address.
pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = config::Config::from_env()?;
    log::debug!("Engine: {:?}", config.engine);

    let shutdown = CancellationToken::new();
    let service = ReconciliationService::new(config.engine, NoTunnelDiscovery, config.settings);

    let reconciler = {
        let service = service.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { service.run(shutdown).await })
    };

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => log::info!("Received Ctrl-C, shutting down"),
                Err(err) => log::error!("failed to listen for Ctrl-C: {err}"),
            }
            shutdown.cancel();
        });
    }

    let api = api::APIServer::new(service);
    let served = {
        let shutdown = shutdown.clone();
        api.listen(config.listen_addr.as_str(), async move {
            shutdown.cancelled().await
        })
        .await
    };
    if let Err(err) = &served {
        log::error!("API server failed on `{}`: {err}", config.listen_addr);
        shutdown.cancel();
    }

    reconciler.await?;
    served?;

    Ok(())
}
