//! The control loop: sample cluster state on a tick and turn it into
//! scale events.
//!
//! A tick publishes either CREATE events or at most one DESTROY event,
//! never both, and a DESTROY is only considered while nothing is inflight.
//! Inflight counts come from the queue, not from process memory, so a
//! restarted scaler picks up exactly where the queue says it left off.

use std::collections::HashSet;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use strato_cluster::ClusterClient;
use strato_core::{NodePattern, ScaleKind};
use strato_hypervisor::HypervisorClient;
use strato_queue::{QueueError, WorkQueue};

use crate::accounting::{assess_scale_down, required_scale_events};
use crate::config::ScalingConfig;
use crate::error::ScalerResult;
use crate::placement::{assign_target_hosts, VictimStrategy};

/// The scaling decision engine.
pub struct Controller {
    config: Arc<ScalingConfig>,
    pattern: NodePattern,
    hypervisor: Arc<dyn HypervisorClient>,
    cluster: Arc<dyn ClusterClient>,
    queue: Arc<dyn WorkQueue>,
    victim_strategy: Arc<dyn VictimStrategy>,
}

impl Controller {
    /// Create a controller.
    pub fn new(
        config: Arc<ScalingConfig>,
        pattern: NodePattern,
        hypervisor: Arc<dyn HypervisorClient>,
        cluster: Arc<dyn ClusterClient>,
        queue: Arc<dyn WorkQueue>,
        victim_strategy: Arc<dyn VictimStrategy>,
    ) -> Self {
        Self {
            config,
            pattern,
            hypervisor,
            cluster,
            queue,
            victim_strategy,
        }
    }

    /// Drive ticks until cancelled. Client failures skip the tick and are
    /// never propagated.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut tick_no: u64 = 0;

        info!(
            poll_interval_secs = self.config.poll_interval_secs,
            max_nodes = self.config.max_nodes,
            strategy = self.victim_strategy.name(),
            "control loop started"
        );

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    info!("control loop shutting down");
                    break;
                }

                _ = ticker.tick() => {
                    tick_no += 1;
                    if let Err(e) = self.tick(tick_no).await {
                        warn!(tick = tick_no, error = %e, "tick failed, skipping");
                    }
                }
            }
        }
    }

    /// One pass of the decision engine.
    pub async fn tick(&self, tick_no: u64) -> ScalerResult<()> {
        if self.cluster.is_taint_blocked().await? {
            debug!("scheduling blocked by control-plane taint only, skipping tick");
            return Ok(());
        }

        let demand = self.cluster.unschedulable_demand().await?;
        let owned = self.cluster.list_owned_nodes(&self.pattern).await?;
        let inflight_creates = self.queue.depth(ScaleKind::Create).await?.inflight();

        if !demand.is_zero() {
            self.scale_up(demand, owned.len(), inflight_creates).await?;
            return Ok(());
        }

        let inflight_destroys = self.queue.depth(ScaleKind::Destroy).await?.inflight();
        if inflight_creates == 0 && inflight_destroys == 0 {
            self.scale_down(owned.len()).await?;
        }

        if tick_no % self.config.reconcile_every_ticks == 0 {
            self.reconcile_orphans().await?;
        }

        Ok(())
    }

    async fn scale_up(
        &self,
        demand: strato_core::UnschedulableDemand,
        owned_count: usize,
        inflight_creates: u64,
    ) -> ScalerResult<()> {
        let mut events = required_scale_events(
            &demand,
            owned_count,
            inflight_creates,
            &self.config,
            &self.pattern,
        );
        if events.is_empty() {
            debug!(
                cpu = demand.cpu,
                memory_bytes = demand.memory_bytes,
                inflight = inflight_creates,
                "demand already covered"
            );
            return Ok(());
        }

        let hosts = self.hypervisor.list_hosts().await?;
        let assigned = assign_target_hosts(&mut events, hosts, &self.config);
        let deferred = events.len() - assigned;
        if deferred > 0 {
            warn!(deferred, "no host has capacity for some events, deferring to next tick");
        }

        for event in events.into_iter().filter(|e| e.target_host.is_some()) {
            info!(event = %event, target = event.target_host.as_deref().unwrap_or(""), "publishing scale-up event");
            match self.queue.publish(&event).await {
                Ok(()) => {}
                Err(QueueError::Full(kind)) => {
                    warn!(kind = %kind, "queue full, deferring remaining events");
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(())
    }

    async fn scale_down(&self, owned_count: usize) -> ScalerResult<()> {
        let allocations = self.cluster.allocated_resources(&self.pattern).await?;

        let Some(mut event) = assess_scale_down(&allocations, owned_count, &self.config) else {
            return Ok(());
        };

        // Empty nodes are retired before anything the strategy would pick.
        let empty = self.cluster.list_empty_nodes(&self.pattern).await?;
        let victim = match empty.iter().map(|node| node.name.clone()).min() {
            Some(name) => name,
            None => match self.victim_strategy.select(&allocations) {
                Some(name) => name,
                None => return Ok(()),
            },
        };

        event.node_name = victim;
        info!(event = %event, "publishing scale-down event");
        self.queue.publish(&event).await?;
        Ok(())
    }

    /// Two-sided orphan sweep: VMs with no cluster node and cluster nodes
    /// with no backing VM.
    ///
    /// Only runs when both channels are fully drained, so nothing inflight
    /// can explain the mismatch. Per-object failures are logged and the
    /// sweep continues; the next cadence retries.
    pub async fn reconcile_orphans(&self) -> ScalerResult<()> {
        let creates = self.queue.depth(ScaleKind::Create).await?;
        let destroys = self.queue.depth(ScaleKind::Destroy).await?;
        if creates.inflight() != 0 || destroys.inflight() != 0 {
            debug!("queue not drained, skipping orphan reconciliation");
            return Ok(());
        }

        let vms = self.hypervisor.list_owned_vms(&self.pattern).await?;
        let nodes = self.cluster.list_owned_nodes(&self.pattern).await?;

        let node_names: HashSet<&str> = nodes.iter().map(|n| n.name.as_str()).collect();
        for vm in vms.iter().filter(|vm| !node_names.contains(vm.name.as_str())) {
            warn!(vm = %vm.name, vmid = vm.vmid, "destroying orphaned VM with no cluster node");
            if let Err(e) = self.hypervisor.stop(vm).await {
                warn!(vm = %vm.name, error = %e, "failed to stop orphaned VM");
            }
            if let Err(e) = self.hypervisor.destroy(vm).await {
                warn!(vm = %vm.name, error = %e, "failed to destroy orphaned VM");
            }
        }

        let vm_names: HashSet<&str> = vms.iter().map(|vm| vm.name.as_str()).collect();
        for node in nodes.iter().filter(|n| !vm_names.contains(n.name.as_str())) {
            warn!(node = %node.name, "removing cluster node with no backing VM");
            if let Err(e) = self.cluster.cordon(&node.name).await {
                warn!(node = %node.name, error = %e, "failed to cordon unbacked node");
                continue;
            }
            if let Err(e) = self.cluster.delete_node(&node.name).await {
                warn!(node = %node.name, error = %e, "failed to delete unbacked node");
            }
        }

        Ok(())
    }
}
