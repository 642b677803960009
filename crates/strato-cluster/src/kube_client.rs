//! Kubernetes implementation of the cluster client.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{Api, DeleteParams, EvictParams, ListParams, Patch, PatchParams};
use kube::{Client, Config};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use strato_core::{AllocatedResources, NodePattern, UnschedulableDemand};

use crate::error::{ClusterError, ClusterResult};
use crate::quantity::parse_quantity;
use crate::types::{EvictionSummary, WorkerNode};
use crate::ClusterClient;

/// Scheduling-failure marker for the control-plane taint guard.
const CONTROL_PLANE_TAINT: &str = "untolerated taint {node-role.kubernetes.io/control-plane:";

/// How often `await_ready` re-reads the node object.
const READY_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Per-request deadline on every API call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Cluster client backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    /// Connect using the inferred Kubernetes configuration: kubeconfig when
    /// running outside the cluster, the service account when inside.
    pub async fn new() -> ClusterResult<Self> {
        let mut config = Config::infer()
            .await
            .map_err(|e| ClusterError::Config(format!("kubernetes config: {e}")))?;
        config.read_timeout = Some(REQUEST_TIMEOUT);
        config.connect_timeout = Some(Duration::from_secs(5));

        let client = Client::try_from(config)?;
        Ok(Self { client })
    }

    /// Wrap an existing client.
    #[must_use]
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    fn nodes(&self) -> Api<Node> {
        Api::all(self.client.clone())
    }

    fn all_pods(&self) -> Api<Pod> {
        Api::all(self.client.clone())
    }

    async fn pods_on_node(&self, name: &str) -> ClusterResult<Vec<Pod>> {
        let params = ListParams::default().fields(&format!("spec.nodeName={name}"));
        let pods = self.all_pods().list(&params).await?;
        Ok(pods.items)
    }

    /// Pods whose scheduling failed outright.
    async fn unschedulable_pods(&self) -> ClusterResult<Vec<Pod>> {
        let pods = self.all_pods().list(&ListParams::default()).await?;
        Ok(pods
            .items
            .into_iter()
            .filter(|pod| scheduling_failure_message(pod).is_some())
            .collect())
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn unschedulable_demand(&self) -> ClusterResult<UnschedulableDemand> {
        let mut cpu = 0.0;
        let mut memory = 0.0;

        for pod in self.unschedulable_pods().await? {
            let Some(message) = scheduling_failure_message(&pod) else {
                continue;
            };
            if message.contains("Insufficient cpu") {
                cpu += pod_requests(&pod, "cpu")?;
            }
            if message.contains("Insufficient memory") {
                memory += pod_requests(&pod, "memory")?;
            }
        }

        Ok(UnschedulableDemand {
            cpu,
            memory_bytes: memory as i64,
        })
    }

    async fn is_taint_blocked(&self) -> ClusterResult<bool> {
        for pod in self.unschedulable_pods().await? {
            if let Some(message) = scheduling_failure_message(&pod) {
                if message.contains(CONTROL_PLANE_TAINT) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    async fn list_owned_nodes(&self, pattern: &NodePattern) -> ClusterResult<Vec<WorkerNode>> {
        let nodes = self.nodes().list(&ListParams::default()).await?;
        Ok(nodes
            .items
            .iter()
            .filter_map(|node| {
                let name = node.metadata.name.as_deref()?;
                pattern.matches(name).then(|| WorkerNode {
                    name: name.to_owned(),
                    ready: node_ready(node),
                    unschedulable: node
                        .spec
                        .as_ref()
                        .and_then(|spec| spec.unschedulable)
                        .unwrap_or(false),
                })
            })
            .collect())
    }

    async fn allocated_resources(
        &self,
        pattern: &NodePattern,
    ) -> ClusterResult<HashMap<String, AllocatedResources>> {
        let mut allocations = HashMap::new();

        for node in self.list_owned_nodes(pattern).await? {
            let mut allocated = AllocatedResources::default();
            for pod in self.pods_on_node(&node.name).await? {
                allocated.cpu += pod_requests(&pod, "cpu")?;
                allocated.memory += pod_requests(&pod, "memory")?;
            }
            allocations.insert(node.name, allocated);
        }

        Ok(allocations)
    }

    async fn list_empty_nodes(&self, pattern: &NodePattern) -> ClusterResult<Vec<WorkerNode>> {
        let mut empty = Vec::new();
        for node in self.list_owned_nodes(pattern).await? {
            if self.pods_on_node(&node.name).await?.is_empty() {
                empty.push(node);
            }
        }
        Ok(empty)
    }

    async fn await_ready(&self, name: &str, deadline: Duration) -> ClusterResult<bool> {
        let nodes = self.nodes();
        let expires = Instant::now() + deadline;

        loop {
            if let Some(node) = nodes.get_opt(name).await? {
                if node_ready(&node) {
                    info!(node = %name, "node joined the cluster");
                    return Ok(true);
                }
            }

            if Instant::now() + READY_POLL_INTERVAL > expires {
                warn!(node = %name, timeout_secs = deadline.as_secs(), "node did not become ready");
                return Ok(false);
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }

    async fn cordon(&self, name: &str) -> ClusterResult<()> {
        let patch = serde_json::json!({"spec": {"unschedulable": true}});
        self.nodes()
            .patch(name, &PatchParams::default(), &Patch::Strategic(patch))
            .await?;
        debug!(node = %name, "node cordoned");
        Ok(())
    }

    async fn evict_all_pods(&self, name: &str) -> ClusterResult<EvictionSummary> {
        let mut summary = EvictionSummary::default();

        for pod in self.pods_on_node(name).await? {
            let Some(pod_name) = pod.metadata.name.clone() else {
                continue;
            };
            let namespace = pod
                .metadata
                .namespace
                .clone()
                .unwrap_or_else(|| "default".to_owned());

            if !is_evictable(&pod) {
                debug!(pod = %pod_name, namespace = %namespace, "skipping non-evictable pod");
                summary.skipped += 1;
                continue;
            }

            let pods: Api<Pod> = Api::namespaced(self.client.clone(), &namespace);
            match pods.evict(&pod_name, &EvictParams::default()).await {
                Ok(_) => summary.evicted += 1,
                Err(kube::Error::Api(response)) if response.code == 404 => {
                    // Already gone.
                }
                Err(e) => return Err(e.into()),
            }
        }

        info!(node = %name, evicted = summary.evicted, skipped = summary.skipped, "pods evicted");
        Ok(summary)
    }

    async fn delete_node(&self, name: &str) -> ClusterResult<()> {
        match self.nodes().delete(name, &DeleteParams::default()).await {
            Ok(_) => {
                info!(node = %name, "node deleted");
                Ok(())
            }
            Err(kube::Error::Api(response)) if response.code == 404 => {
                debug!(node = %name, "node already deleted");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// The `Unschedulable` condition message, if the pod failed scheduling.
fn scheduling_failure_message(pod: &Pod) -> Option<&str> {
    pod.status
        .as_ref()?
        .conditions
        .as_ref()?
        .iter()
        .find(|c| {
            c.type_ == "PodScheduled" && c.status == "False" && c.reason.as_deref() == Some("Unschedulable")
        })
        .and_then(|c| c.message.as_deref())
}

/// Sum a named resource across all container requests of a pod.
fn pod_requests(pod: &Pod, resource: &str) -> ClusterResult<f64> {
    let mut total = 0.0;
    let containers = pod.spec.as_ref().map(|s| s.containers.as_slice()).unwrap_or_default();

    for container in containers {
        let Some(requests) = container.resources.as_ref().and_then(|r| r.requests.as_ref()) else {
            continue;
        };
        if let Some(quantity) = requests.get(resource) {
            total += parse_quantity(&quantity.0)?;
        }
    }

    Ok(total)
}

fn node_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

/// Whether an eviction can be issued for this pod. DaemonSet-managed pods
/// are recreated immediately and mirror pods cannot be evicted at all.
fn is_evictable(pod: &Pod) -> bool {
    let managed_by_daemonset = pod
        .metadata
        .owner_references
        .as_ref()
        .is_some_and(|owners| owners.iter().any(|owner| owner.kind == "DaemonSet"));

    let mirror = pod
        .metadata
        .annotations
        .as_ref()
        .is_some_and(|annotations| annotations.contains_key("kubernetes.io/config.mirror"));

    !managed_by_daemonset && !mirror
}
