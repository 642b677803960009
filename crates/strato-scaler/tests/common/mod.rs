//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use strato_cluster::{ClusterClient, MockCluster};
use strato_core::{AllocatedResources, NodePattern};
use strato_hypervisor::{HypervisorClient, MockHypervisor, VmStatus};
use strato_queue::{MemoryWorkQueue, WorkQueue};
use strato_scaler::{Controller, CreatePipeline, DestroyPipeline, ScalingConfig, WeightedAllocation};

/// The whole scaler wired over in-memory fakes.
pub struct Harness {
    pub config: Arc<ScalingConfig>,
    pub pattern: NodePattern,
    pub hypervisor: Arc<MockHypervisor>,
    pub cluster: Arc<MockCluster>,
    pub queue: Arc<MemoryWorkQueue>,
}

impl Harness {
    pub fn new(config: ScalingConfig) -> Self {
        let pattern = config.pattern().expect("valid prefix");
        let capacity = config.max_nodes as usize;
        Self {
            config: Arc::new(config),
            pattern,
            hypervisor: Arc::new(MockHypervisor::with_default_hosts()),
            cluster: Arc::new(MockCluster::new()),
            queue: Arc::new(MemoryWorkQueue::new(capacity)),
        }
    }

    /// The standard test configuration: 2-core / 2 GiB nodes, capped at 3.
    pub fn default_config() -> ScalingConfig {
        ScalingConfig {
            node_cores: 2,
            node_memory_mib: 2048,
            max_nodes: 3,
            ..ScalingConfig::default()
        }
    }

    pub fn controller(&self) -> Controller {
        Controller::new(
            Arc::clone(&self.config),
            self.pattern.clone(),
            self.hypervisor.clone() as Arc<dyn HypervisorClient>,
            self.cluster.clone() as Arc<dyn ClusterClient>,
            self.queue.clone() as Arc<dyn WorkQueue>,
            Arc::new(WeightedAllocation::new()),
        )
    }

    pub fn create_pipeline(&self) -> CreatePipeline {
        CreatePipeline::new(
            0,
            Arc::clone(&self.config),
            self.pattern.clone(),
            self.hypervisor.clone() as Arc<dyn HypervisorClient>,
            self.cluster.clone() as Arc<dyn ClusterClient>,
            self.queue.clone() as Arc<dyn WorkQueue>,
        )
    }

    pub fn destroy_pipeline(&self) -> DestroyPipeline {
        DestroyPipeline::new(
            self.pattern.clone(),
            self.hypervisor.clone() as Arc<dyn HypervisorClient>,
            self.cluster.clone() as Arc<dyn ClusterClient>,
            self.queue.clone() as Arc<dyn WorkQueue>,
        )
    }

    /// Spawn a task standing in for the kubelet: every running owned VM
    /// registers itself as a ready, empty cluster node.
    pub fn spawn_kubelet(&self) -> tokio::task::JoinHandle<()> {
        let hypervisor = Arc::clone(&self.hypervisor);
        let cluster = Arc::clone(&self.cluster);
        let pattern = self.pattern.clone();
        tokio::spawn(async move {
            loop {
                let vms = hypervisor.list_owned_vms(&pattern).await.expect("mock");
                for vm in vms {
                    let running = hypervisor.vm_status(&vm).await.expect("mock") == VmStatus::Running;
                    if running && !cluster.contains_node(&vm.name) {
                        cluster.add_node(&vm.name, AllocatedResources::default());
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
    }
}
