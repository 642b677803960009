//! strato-scaler binary.
//!
//! Loads configuration, connects the hypervisor, cluster and queue
//! clients, and runs the autoscaler until interrupted. Exits non-zero if
//! configuration or any client fails to initialise.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use strato_cluster::KubeClusterClient;
use strato_hypervisor::ProxmoxClient;
use strato_queue::NatsWorkQueue;
use strato_scaler::{ScalerConfig, ScalerService};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("strato_scaler=info".parse()?),
        )
        .init();

    info!("strato scaler starting");

    let mut config = ScalerConfig::load()?;
    config.validate()?;
    let pattern = config.scaling.pattern()?;

    info!(
        prefix = pattern.prefix(),
        max_nodes = config.scaling.max_nodes,
        template = %config.scaling.template_name,
        "configuration loaded"
    );

    let hypervisor = Arc::new(ProxmoxClient::new(&config.hypervisor)?);
    info!(url = %config.hypervisor.url, "hypervisor client initialised");

    let cluster = Arc::new(KubeClusterClient::new().await?);
    info!("cluster client initialised");

    let queue = Arc::new(
        NatsWorkQueue::connect(&config.queue, i64::from(config.scaling.max_nodes)).await?,
    );
    info!(host = %config.queue.host, port = config.queue.port, "work queue initialised");

    let service = ScalerService::new(
        config.scaling,
        config.workers,
        pattern,
        hypervisor,
        cluster,
        queue,
    );

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown signal received"),
            Err(e) => error!(error = %e, "failed to listen for shutdown signal"),
        }
        shutdown.cancel();
    });

    service.run(cancel).await;

    info!("strato scaler stopped");
    Ok(())
}
