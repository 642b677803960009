//! Service assembly: wires the controller and the pipeline worker pool
//! under a single cancellation token.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use strato_cluster::ClusterClient;
use strato_core::NodePattern;
use strato_hypervisor::HypervisorClient;
use strato_queue::WorkQueue;

use crate::config::{ScalingConfig, WorkerConfig};
use crate::controller::Controller;
use crate::pipeline::{CreatePipeline, DestroyPipeline};
use crate::placement::{VictimStrategy, WeightedAllocation};

/// The assembled autoscaler.
pub struct ScalerService {
    config: Arc<ScalingConfig>,
    workers: WorkerConfig,
    pattern: NodePattern,
    hypervisor: Arc<dyn HypervisorClient>,
    cluster: Arc<dyn ClusterClient>,
    queue: Arc<dyn WorkQueue>,
    victim_strategy: Arc<dyn VictimStrategy>,
}

impl ScalerService {
    /// Assemble the service with the default victim strategy.
    pub fn new(
        config: ScalingConfig,
        workers: WorkerConfig,
        pattern: NodePattern,
        hypervisor: Arc<dyn HypervisorClient>,
        cluster: Arc<dyn ClusterClient>,
        queue: Arc<dyn WorkQueue>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            workers,
            pattern,
            hypervisor,
            cluster,
            queue,
            victim_strategy: Arc::new(WeightedAllocation::new()),
        }
    }

    /// Replace the victim-selection strategy.
    #[must_use]
    pub fn with_victim_strategy(mut self, strategy: Arc<dyn VictimStrategy>) -> Self {
        self.victim_strategy = strategy;
        self
    }

    /// Run until the token is cancelled. Workers finish the event in hand
    /// before exiting; unacked events redeliver on the next start.
    pub async fn run(self, cancel: CancellationToken) {
        let mut tasks = Vec::new();

        for id in 0..self.workers.create_concurrency.max(1) {
            let worker = CreatePipeline::new(
                id,
                Arc::clone(&self.config),
                self.pattern.clone(),
                Arc::clone(&self.hypervisor),
                Arc::clone(&self.cluster),
                Arc::clone(&self.queue),
            );
            let cancel = cancel.clone();
            tasks.push(tokio::spawn(async move { worker.run(cancel).await }));
        }

        let destroy_worker = DestroyPipeline::new(
            self.pattern.clone(),
            Arc::clone(&self.hypervisor),
            Arc::clone(&self.cluster),
            Arc::clone(&self.queue),
        );
        {
            let cancel = cancel.clone();
            tasks.push(tokio::spawn(async move { destroy_worker.run(cancel).await }));
        }

        let controller = Controller::new(
            Arc::clone(&self.config),
            self.pattern.clone(),
            Arc::clone(&self.hypervisor),
            Arc::clone(&self.cluster),
            Arc::clone(&self.queue),
            Arc::clone(&self.victim_strategy),
        );
        {
            let cancel = cancel.clone();
            tasks.push(tokio::spawn(async move { controller.run(cancel).await }));
        }

        info!(
            create_workers = self.workers.create_concurrency.max(1),
            "scaler service running"
        );

        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "service task panicked");
            }
        }

        info!("scaler service stopped");
    }
}
