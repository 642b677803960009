//! CREATE pipeline: clone, start, and wait for the node to join.

use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use strato_cluster::ClusterClient;
use strato_core::{NodePattern, ScaleEvent, ScaleKind};
use strato_hypervisor::{CloudInit, HypervisorClient, HypervisorError, VmRef, VmStatus};
use strato_queue::WorkQueue;

use crate::config::ScalingConfig;
use crate::error::{ScalerError, ScalerResult};

use super::{settle, CONSUME_RETRY_DELAY, VM_START_TIMEOUT, VM_STATUS_POLL_INTERVAL};

/// Worker that turns CREATE events into ready cluster nodes.
pub struct CreatePipeline {
    id: usize,
    config: Arc<ScalingConfig>,
    pattern: NodePattern,
    hypervisor: Arc<dyn HypervisorClient>,
    cluster: Arc<dyn ClusterClient>,
    queue: Arc<dyn WorkQueue>,
}

impl CreatePipeline {
    /// Create a worker.
    pub fn new(
        id: usize,
        config: Arc<ScalingConfig>,
        pattern: NodePattern,
        hypervisor: Arc<dyn HypervisorClient>,
        cluster: Arc<dyn ClusterClient>,
        queue: Arc<dyn WorkQueue>,
    ) -> Self {
        Self {
            id,
            config,
            pattern,
            hypervisor,
            cluster,
            queue,
        }
    }

    /// Run the consumer loop until cancelled. The event in hand is always
    /// finished before the loop exits.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(worker_id = self.id, "create worker started");

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    info!(worker_id = self.id, "create worker shutting down");
                    break;
                }

                delivery = self.queue.consume(ScaleKind::Create) => match delivery {
                    Ok(delivery) => {
                        let result = self.provision(delivery.event()).await;
                        settle(delivery, result).await;
                    }
                    Err(e) => {
                        error!(worker_id = self.id, error = %e, "consume failed");
                        tokio::time::sleep(CONSUME_RETRY_DELAY).await;
                    }
                },
            }
        }
    }

    /// Execute one CREATE event: clone the template, start the VM, wait for
    /// the node to join the cluster.
    pub async fn provision(&self, event: &ScaleEvent) -> ScalerResult<()> {
        let name = event.node_name.as_str();
        let Some(target_host) = event.target_host.as_deref() else {
            return Err(ScalerError::Invariant(format!(
                "create event {name} has no target host"
            )));
        };
        if !self.pattern.matches(name) {
            return Err(ScalerError::Invariant(format!(
                "create target {name} does not match the owned pattern"
            )));
        }

        let cloud_init = CloudInit {
            user: self.config.cloud_init_user.clone(),
            ssh_keys: self.config.ssh_key.clone(),
        };

        let vm = match self
            .hypervisor
            .clone_template(&self.config.template_name, name, target_host, &cloud_init)
            .await
        {
            Ok(vm) => vm,
            Err(HypervisorError::NameCollision(_)) => self.recover_existing(name).await?,
            Err(e) => return Err(e.into()),
        };

        if self.hypervisor.vm_status(&vm).await? != VmStatus::Running {
            self.hypervisor.start(&vm).await?;
            self.wait_running(&vm).await?;
        }

        let joined = self
            .cluster
            .await_ready(name, self.config.wait_join())
            .await?;
        if !joined {
            self.teardown(&vm).await;
            return Err(ScalerError::JoinTimeout {
                node: name.to_owned(),
                timeout_secs: self.config.wait_join_secs,
            });
        }

        info!(node = %name, vmid = vm.vmid, host = %vm.host, "worker node provisioned");
        Ok(())
    }

    /// A clone hit an existing VM with our name. If it is an owned VM that
    /// is already running, a previous run of this event got that far before
    /// crashing and we can resume at the join wait; anything else is not
    /// ours to touch.
    async fn recover_existing(&self, name: &str) -> ScalerResult<VmRef> {
        let Some(vm) = self.hypervisor.get_vm_by_name(name).await? else {
            return Err(ScalerError::RemoteState(format!(
                "name collision for {name} but no such VM"
            )));
        };

        if self.hypervisor.vm_status(&vm).await? != VmStatus::Running {
            return Err(ScalerError::RemoteState(format!(
                "VM {name} exists but is not running"
            )));
        }

        info!(node = %name, vmid = vm.vmid, "resuming partially provisioned VM");
        Ok(vm)
    }

    async fn wait_running(&self, vm: &VmRef) -> ScalerResult<()> {
        let expires = Instant::now() + VM_START_TIMEOUT;

        loop {
            if self.hypervisor.vm_status(vm).await? == VmStatus::Running {
                return Ok(());
            }
            if Instant::now() + VM_STATUS_POLL_INTERVAL > expires {
                self.teardown(vm).await;
                return Err(ScalerError::StartTimeout {
                    node: vm.name.clone(),
                    timeout_secs: VM_START_TIMEOUT.as_secs(),
                });
            }
            tokio::time::sleep(VM_STATUS_POLL_INTERVAL).await;
        }
    }

    /// Roll back a partial VM. Best effort; anything left behind is swept
    /// by orphan reconciliation.
    async fn teardown(&self, vm: &VmRef) {
        warn!(vm = %vm.name, vmid = vm.vmid, "tearing down partial VM");
        if let Err(e) = self.hypervisor.stop(vm).await {
            warn!(vm = %vm.name, error = %e, "failed to stop partial VM");
        }
        if let Err(e) = self.hypervisor.destroy(vm).await {
            warn!(vm = %vm.name, error = %e, "failed to destroy partial VM");
        }
    }
}
