//! DESTROY pipeline: cordon, evict, delete the node, remove the VM.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use strato_cluster::ClusterClient;
use strato_core::{NodePattern, ScaleEvent, ScaleKind};
use strato_hypervisor::HypervisorClient;
use strato_queue::WorkQueue;

use crate::error::{ScalerError, ScalerResult};

use super::{settle, CONSUME_RETRY_DELAY};

/// Worker that retires worker nodes.
///
/// Runs as a single consumer: the control loop emits at most one DESTROY
/// per tick and never alongside CREATEs, so there is nothing to parallelise.
pub struct DestroyPipeline {
    pattern: NodePattern,
    hypervisor: Arc<dyn HypervisorClient>,
    cluster: Arc<dyn ClusterClient>,
    queue: Arc<dyn WorkQueue>,
}

impl DestroyPipeline {
    /// Create the worker.
    pub fn new(
        pattern: NodePattern,
        hypervisor: Arc<dyn HypervisorClient>,
        cluster: Arc<dyn ClusterClient>,
        queue: Arc<dyn WorkQueue>,
    ) -> Self {
        Self {
            pattern,
            hypervisor,
            cluster,
            queue,
        }
    }

    /// Run the consumer loop until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        info!("destroy worker started");

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    info!("destroy worker shutting down");
                    break;
                }

                delivery = self.queue.consume(ScaleKind::Destroy) => match delivery {
                    Ok(delivery) => {
                        let result = self.decommission(delivery.event()).await;
                        settle(delivery, result).await;
                    }
                    Err(e) => {
                        error!(error = %e, "consume failed");
                        tokio::time::sleep(CONSUME_RETRY_DELAY).await;
                    }
                },
            }
        }
    }

    /// Execute one DESTROY event: cordon and drain the node, remove it from
    /// the cluster, then stop and destroy the backing VM.
    ///
    /// Every step treats "already gone" as success so a redelivered event
    /// resumes cleanly after a crash.
    pub async fn decommission(&self, event: &ScaleEvent) -> ScalerResult<()> {
        let name = event.node_name.as_str();
        if !self.pattern.matches(name) {
            return Err(ScalerError::Invariant(format!(
                "destroy target {name} does not match the owned pattern"
            )));
        }

        match self.cluster.cordon(name).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => debug!(node = %name, "node already gone, skipping cordon"),
            Err(e) => return Err(e.into()),
        }

        match self.cluster.evict_all_pods(name).await {
            Ok(summary) => {
                debug!(node = %name, evicted = summary.evicted, skipped = summary.skipped, "node drained");
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        self.cluster.delete_node(name).await?;

        match self.hypervisor.get_vm_by_name(name).await? {
            Some(vm) => {
                if let Err(e) = self.hypervisor.stop(&vm).await {
                    // A stop that races a dying guest is not fatal; the
                    // destroy below is the call that has to succeed.
                    warn!(vm = %vm.name, error = %e, "stop failed before destroy");
                }
                self.hypervisor.destroy(&vm).await?;
                info!(node = %name, vmid = vm.vmid, "worker node decommissioned");
            }
            None => {
                debug!(node = %name, "backing VM already gone");
            }
        }

        Ok(())
    }
}
