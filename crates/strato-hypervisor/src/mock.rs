//! In-memory hypervisor for tests.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use strato_core::NodePattern;

use crate::error::{HypervisorError, HypervisorResult};
use crate::types::{CloudInit, HostInfo, HostStatus, VmRef, VmStatus};
use crate::HypervisorClient;

#[derive(Debug, Clone)]
struct MockVm {
    vm: VmRef,
    status: VmStatus,
}

/// Mock hypervisor fleet for testing.
///
/// Safe to share across concurrently running workers; test code seeds and
/// inspects the state through the helper methods.
#[derive(Debug)]
pub struct MockHypervisor {
    hosts: Mutex<Vec<HostInfo>>,
    vms: DashMap<String, MockVm>,
    next_vmid: AtomicU32,
}

impl Default for MockHypervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHypervisor {
    /// Create an empty fleet.
    #[must_use]
    pub fn new() -> Self {
        Self {
            hosts: Mutex::new(Vec::new()),
            vms: DashMap::new(),
            next_vmid: AtomicU32::new(100),
        }
    }

    /// Create a fleet with three identical online hosts, `host-01..03`.
    #[must_use]
    pub fn with_default_hosts() -> Self {
        let mock = Self::new();
        for i in 1..=3 {
            mock.add_host(HostInfo {
                id: format!("host-{i:02}"),
                cpu_free: 16.0,
                mem_free: 64 * 1024 * 1024 * 1024,
                status: HostStatus::Online,
            });
        }
        mock
    }

    fn hosts(&self) -> MutexGuard<'_, Vec<HostInfo>> {
        self.hosts.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Add a hypervisor host.
    pub fn add_host(&self, host: HostInfo) {
        self.hosts().push(host);
    }

    /// Insert a VM directly, bypassing the clone path.
    pub fn insert_vm(&self, name: &str, host: &str, status: VmStatus) -> VmRef {
        let vm = VmRef {
            vmid: self.next_vmid.fetch_add(1, Ordering::Relaxed),
            host: host.to_owned(),
            name: name.to_owned(),
        };
        self.vms
            .insert(name.to_owned(), MockVm { vm: vm.clone(), status });
        vm
    }

    /// Whether a VM with the given name exists.
    #[must_use]
    pub fn contains_vm(&self, name: &str) -> bool {
        self.vms.contains_key(name)
    }

    /// Number of VMs on the fleet.
    #[must_use]
    pub fn vm_count(&self) -> usize {
        self.vms.len()
    }

    /// Mark a VM as running, as a booted guest would.
    pub fn mark_running(&self, name: &str) {
        if let Some(mut entry) = self.vms.get_mut(name) {
            entry.status = VmStatus::Running;
        }
    }
}

#[async_trait]
impl HypervisorClient for MockHypervisor {
    async fn list_hosts(&self) -> HypervisorResult<Vec<HostInfo>> {
        Ok(self.hosts().clone())
    }

    async fn clone_template(
        &self,
        _template: &str,
        name: &str,
        target_host: &str,
        _cloud_init: &CloudInit,
    ) -> HypervisorResult<VmRef> {
        match self.vms.entry(name.to_owned()) {
            Entry::Occupied(_) => Err(HypervisorError::NameCollision(name.to_owned())),
            Entry::Vacant(slot) => {
                let vm = VmRef {
                    vmid: self.next_vmid.fetch_add(1, Ordering::Relaxed),
                    host: target_host.to_owned(),
                    name: name.to_owned(),
                };
                slot.insert(MockVm {
                    vm: vm.clone(),
                    status: VmStatus::Stopped,
                });
                Ok(vm)
            }
        }
    }

    async fn start(&self, vm: &VmRef) -> HypervisorResult<()> {
        let mut entry = self
            .vms
            .get_mut(&vm.name)
            .ok_or_else(|| HypervisorError::VmNotFound(vm.name.clone()))?;
        entry.status = VmStatus::Running;
        Ok(())
    }

    async fn stop(&self, vm: &VmRef) -> HypervisorResult<()> {
        let mut entry = self
            .vms
            .get_mut(&vm.name)
            .ok_or_else(|| HypervisorError::VmNotFound(vm.name.clone()))?;
        entry.status = VmStatus::Stopped;
        Ok(())
    }

    async fn destroy(&self, vm: &VmRef) -> HypervisorResult<()> {
        self.vms
            .remove(&vm.name)
            .map(|_| ())
            .ok_or_else(|| HypervisorError::VmNotFound(vm.name.clone()))
    }

    async fn vm_status(&self, vm: &VmRef) -> HypervisorResult<VmStatus> {
        self.vms
            .get(&vm.name)
            .map(|entry| entry.status)
            .ok_or_else(|| HypervisorError::VmNotFound(vm.name.clone()))
    }

    async fn get_vm_by_name(&self, name: &str) -> HypervisorResult<Option<VmRef>> {
        Ok(self.vms.get(name).map(|entry| entry.vm.clone()))
    }

    async fn list_owned_vms(&self, pattern: &NodePattern) -> HypervisorResult<Vec<VmRef>> {
        Ok(self
            .vms
            .iter()
            .filter(|entry| pattern.matches(&entry.vm.name))
            .map(|entry| entry.vm.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clone_rejects_duplicate_names() {
        let mock = MockHypervisor::with_default_hosts();
        let ci = CloudInit::default();

        mock.clone_template("template", "vm-1", "host-01", &ci)
            .await
            .unwrap();
        let err = mock
            .clone_template("template", "vm-1", "host-02", &ci)
            .await
            .unwrap_err();
        assert!(matches!(err, HypervisorError::NameCollision(_)));
    }

    #[tokio::test]
    async fn lifecycle_start_stop_destroy() {
        let mock = MockHypervisor::with_default_hosts();
        let vm = mock
            .clone_template("template", "vm-1", "host-01", &CloudInit::default())
            .await
            .unwrap();

        assert_eq!(mock.vm_status(&vm).await.unwrap(), VmStatus::Stopped);
        mock.start(&vm).await.unwrap();
        assert_eq!(mock.vm_status(&vm).await.unwrap(), VmStatus::Running);
        mock.stop(&vm).await.unwrap();
        mock.destroy(&vm).await.unwrap();
        assert!(!mock.contains_vm("vm-1"));
        assert!(mock.get_vm_by_name("vm-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn owned_listing_filters_by_pattern() {
        let mock = MockHypervisor::new();
        let pattern = NodePattern::new("kp-node").unwrap();

        mock.insert_vm(&pattern.generate(), "host-01", VmStatus::Running);
        mock.insert_vm("pet-vm", "host-01", VmStatus::Running);

        let owned = mock.list_owned_vms(&pattern).await.unwrap();
        assert_eq!(owned.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_clones_never_share_a_name() {
        use std::sync::Arc;

        let mock = Arc::new(MockHypervisor::with_default_hosts());

        let attempts: Vec<_> = (0..8)
            .map(|i| {
                let mock = Arc::clone(&mock);
                tokio::spawn(async move {
                    mock.clone_template("template", "vm-1", &format!("host-{:02}", i % 3 + 1), &CloudInit::default())
                        .await
                })
            })
            .collect();

        let mut created = 0;
        for attempt in attempts {
            if attempt.await.expect("task").is_ok() {
                created += 1;
            }
        }

        assert_eq!(created, 1);
        assert_eq!(mock.vm_count(), 1);
    }
}
