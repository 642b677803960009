//! Kubernetes cluster client for the strato autoscaler.
//!
//! The autoscaler reads three things from the cluster — unmet resource
//! demand, the set of worker nodes it owns, and their allocations — and
//! performs three mutations: cordon, evict, delete. [`ClusterClient`]
//! captures that surface; [`KubeClusterClient`] implements it with the
//! Kubernetes API, and [`MockCluster`] backs the tests.

pub mod error;
mod kube_client;
mod mock;
mod quantity;
pub mod types;

pub use error::{ClusterError, ClusterResult};
pub use kube_client::KubeClusterClient;
pub use mock::MockCluster;
pub use quantity::parse_quantity;
pub use types::{EvictionSummary, WorkerNode};

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use strato_core::{AllocatedResources, NodePattern, UnschedulableDemand};

/// Trait for cluster API implementations.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Summed unmet requests across pods that failed scheduling for
    /// "Insufficient cpu" or "Insufficient memory".
    async fn unschedulable_demand(&self) -> ClusterResult<UnschedulableDemand>;

    /// Whether any unschedulable pod is blocked by the control-plane taint
    /// rather than a resource shortage.
    async fn is_taint_blocked(&self) -> ClusterResult<bool>;

    /// Worker nodes whose name matches the owned pattern.
    async fn list_owned_nodes(&self, pattern: &NodePattern) -> ClusterResult<Vec<WorkerNode>>;

    /// Per-owned-node sums of container resource requests.
    async fn allocated_resources(
        &self,
        pattern: &NodePattern,
    ) -> ClusterResult<HashMap<String, AllocatedResources>>;

    /// Owned nodes with no pods scheduled on them.
    async fn list_empty_nodes(&self, pattern: &NodePattern) -> ClusterResult<Vec<WorkerNode>>;

    /// Poll until the named node reports `Ready=True`, up to `deadline`.
    ///
    /// Returns `false` if the deadline expires first.
    async fn await_ready(&self, name: &str, deadline: Duration) -> ClusterResult<bool>;

    /// Mark a node unschedulable. Idempotent.
    async fn cordon(&self, name: &str) -> ClusterResult<()>;

    /// Evict every evictable pod from a node. DaemonSet-managed and mirror
    /// pods are skipped and counted in the summary.
    async fn evict_all_pods(&self, name: &str) -> ClusterResult<EvictionSummary>;

    /// Remove the node object from the cluster. A node that is already gone
    /// counts as success.
    async fn delete_node(&self, name: &str) -> ClusterResult<()>;
}
