//! Hypervisor fleet client for the strato autoscaler.
//!
//! The autoscaler needs very little from the hypervisor: enumerate hosts
//! with their free capacity, clone a template VM onto a chosen host, drive
//! the VM's power state, and look VMs up by name. [`HypervisorClient`]
//! captures exactly that surface; [`ProxmoxClient`] implements it against
//! the Proxmox VE JSON API, and [`MockHypervisor`] backs the tests.

pub mod error;
mod mock;
mod proxmox;
pub mod types;

pub use error::{HypervisorError, HypervisorResult};
pub use mock::MockHypervisor;
pub use proxmox::{ProxmoxClient, ProxmoxConfig};
pub use types::{CloudInit, HostInfo, HostStatus, VmRef, VmStatus};

use async_trait::async_trait;
use strato_core::NodePattern;

/// Trait for hypervisor fleet implementations.
#[async_trait]
pub trait HypervisorClient: Send + Sync {
    /// Enumerate hypervisor hosts with their current free capacity.
    async fn list_hosts(&self) -> HypervisorResult<Vec<HostInfo>>;

    /// Clone the template VM onto `target_host` under the given name and
    /// apply the cloud-init payload.
    ///
    /// Returns [`HypervisorError::NameCollision`] if a VM with that name
    /// already exists, so callers can probe for crash-recovery.
    async fn clone_template(
        &self,
        template: &str,
        name: &str,
        target_host: &str,
        cloud_init: &CloudInit,
    ) -> HypervisorResult<VmRef>;

    /// Power a VM on.
    async fn start(&self, vm: &VmRef) -> HypervisorResult<()>;

    /// Power a VM off.
    async fn stop(&self, vm: &VmRef) -> HypervisorResult<()>;

    /// Delete a VM and its disks. The VM must be stopped.
    async fn destroy(&self, vm: &VmRef) -> HypervisorResult<()>;

    /// Current power state of a VM.
    async fn vm_status(&self, vm: &VmRef) -> HypervisorResult<VmStatus>;

    /// Look a VM up by its name, excluding templates.
    async fn get_vm_by_name(&self, name: &str) -> HypervisorResult<Option<VmRef>>;

    /// List all VMs whose name matches the owned pattern.
    async fn list_owned_vms(&self, pattern: &NodePattern) -> HypervisorResult<Vec<VmRef>>;
}
