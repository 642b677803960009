//! In-memory cluster for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use strato_core::{AllocatedResources, NodePattern, UnschedulableDemand};

use crate::error::ClusterResult;
use crate::types::{EvictionSummary, WorkerNode};
use crate::ClusterClient;

#[derive(Debug, Clone)]
struct MockNode {
    ready: bool,
    unschedulable: bool,
    allocated: AllocatedResources,
    pod_count: usize,
}

/// Mock cluster for testing.
///
/// Safe to share across concurrently running workers; test code seeds
/// demand and nodes, flips readiness, and inspects the mutations the code
/// under test performed.
#[derive(Debug, Default)]
pub struct MockCluster {
    demand: Mutex<UnschedulableDemand>,
    taint_blocked: AtomicBool,
    nodes: DashMap<String, MockNode>,
    deleted: Mutex<Vec<String>>,
}

impl MockCluster {
    /// Create an empty cluster.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn demand(&self) -> MutexGuard<'_, UnschedulableDemand> {
        self.demand.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn deleted(&self) -> MutexGuard<'_, Vec<String>> {
        self.deleted.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Set the current unschedulable demand.
    pub fn set_demand(&self, demand: UnschedulableDemand) {
        *self.demand() = demand;
    }

    /// Flip the control-plane-taint guard.
    pub fn set_taint_blocked(&self, blocked: bool) {
        self.taint_blocked.store(blocked, Ordering::Release);
    }

    /// Add a ready node with the given allocation.
    pub fn add_node(&self, name: &str, allocated: AllocatedResources) {
        let pod_count = usize::from(!allocated.is_empty());
        self.nodes.insert(
            name.to_owned(),
            MockNode {
                ready: true,
                unschedulable: false,
                allocated,
                pod_count,
            },
        );
    }

    /// Add a node that has not joined yet.
    pub fn add_joining_node(&self, name: &str) {
        self.nodes.insert(
            name.to_owned(),
            MockNode {
                ready: false,
                unschedulable: false,
                allocated: AllocatedResources::default(),
                pod_count: 0,
            },
        );
    }

    /// Mark a node as ready.
    pub fn mark_ready(&self, name: &str) {
        if let Some(mut node) = self.nodes.get_mut(name) {
            node.ready = true;
        }
    }

    /// Whether the node exists.
    #[must_use]
    pub fn contains_node(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Whether the node is cordoned.
    #[must_use]
    pub fn is_cordoned(&self, name: &str) -> bool {
        self.nodes.get(name).is_some_and(|node| node.unschedulable)
    }

    /// Names of nodes removed via `delete_node`, in order.
    #[must_use]
    pub fn deleted_nodes(&self) -> Vec<String> {
        self.deleted().clone()
    }
}

#[async_trait]
impl ClusterClient for MockCluster {
    async fn unschedulable_demand(&self) -> ClusterResult<UnschedulableDemand> {
        Ok(*self.demand())
    }

    async fn is_taint_blocked(&self) -> ClusterResult<bool> {
        Ok(self.taint_blocked.load(Ordering::Acquire))
    }

    async fn list_owned_nodes(&self, pattern: &NodePattern) -> ClusterResult<Vec<WorkerNode>> {
        let mut nodes: Vec<WorkerNode> = self
            .nodes
            .iter()
            .filter(|entry| pattern.matches(entry.key()))
            .map(|entry| WorkerNode {
                name: entry.key().clone(),
                ready: entry.ready,
                unschedulable: entry.unschedulable,
            })
            .collect();
        nodes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(nodes)
    }

    async fn allocated_resources(
        &self,
        pattern: &NodePattern,
    ) -> ClusterResult<HashMap<String, AllocatedResources>> {
        Ok(self
            .nodes
            .iter()
            .filter(|entry| pattern.matches(entry.key()))
            .map(|entry| (entry.key().clone(), entry.allocated))
            .collect())
    }

    async fn list_empty_nodes(&self, pattern: &NodePattern) -> ClusterResult<Vec<WorkerNode>> {
        let nodes = self.list_owned_nodes(pattern).await?;
        Ok(nodes
            .into_iter()
            .filter(|node| {
                self.nodes
                    .get(&node.name)
                    .is_some_and(|entry| entry.pod_count == 0)
            })
            .collect())
    }

    async fn await_ready(&self, name: &str, deadline: Duration) -> ClusterResult<bool> {
        let expires = Instant::now() + deadline;
        loop {
            if self.nodes.get(name).is_some_and(|node| node.ready) {
                return Ok(true);
            }
            if Instant::now() >= expires {
                return Ok(false);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    async fn cordon(&self, name: &str) -> ClusterResult<()> {
        if let Some(mut node) = self.nodes.get_mut(name) {
            node.unschedulable = true;
        }
        Ok(())
    }

    async fn evict_all_pods(&self, name: &str) -> ClusterResult<EvictionSummary> {
        let Some(mut node) = self.nodes.get_mut(name) else {
            return Ok(EvictionSummary::default());
        };
        let evicted = node.pod_count;
        node.pod_count = 0;
        node.allocated = AllocatedResources::default();
        Ok(EvictionSummary { evicted, skipped: 0 })
    }

    async fn delete_node(&self, name: &str) -> ClusterResult<()> {
        self.nodes.remove(name);
        self.deleted().push(name.to_owned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn readiness_flip_unblocks_waiters() {
        let cluster = MockCluster::new();
        cluster.add_joining_node("kp-node-a");

        assert!(!cluster
            .await_ready("kp-node-a", Duration::from_millis(50))
            .await
            .unwrap());

        cluster.mark_ready("kp-node-a");
        assert!(cluster
            .await_ready("kp-node-a", Duration::from_millis(50))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn delete_records_order() {
        let cluster = MockCluster::new();
        cluster.add_node("a", AllocatedResources::default());
        cluster.add_node("b", AllocatedResources::default());

        cluster.delete_node("b").await.unwrap();
        cluster.delete_node("a").await.unwrap();

        assert_eq!(cluster.deleted_nodes(), vec!["b".to_owned(), "a".to_owned()]);
        assert!(!cluster.contains_node("a"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_registrations_are_all_visible() {
        use std::sync::Arc;

        let cluster = Arc::new(MockCluster::new());
        let pattern = NodePattern::new("kp-node").unwrap();

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cluster = Arc::clone(&cluster);
                let name = pattern.generate();
                tokio::spawn(async move {
                    cluster.add_node(&name, AllocatedResources::default());
                })
            })
            .collect();
        for task in tasks {
            task.await.expect("task");
        }

        let nodes = cluster.list_owned_nodes(&pattern).await.unwrap();
        assert_eq!(nodes.len(), 8);
    }
}
