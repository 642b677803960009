//! Hypervisor-facing types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A hypervisor host and its free capacity at snapshot time.
#[derive(Debug, Clone, PartialEq)]
pub struct HostInfo {
    /// Host identifier (the node name on the fleet).
    pub id: String,
    /// Free CPU, in cores.
    pub cpu_free: f64,
    /// Free memory, in bytes.
    pub mem_free: u64,
    /// Whether the host is reachable.
    pub status: HostStatus,
}

/// Reachability of a hypervisor host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostStatus {
    Online,
    Offline,
    Unknown,
}

impl HostStatus {
    /// Whether the host can take new VMs.
    #[must_use]
    pub const fn is_online(&self) -> bool {
        matches!(self, Self::Online)
    }
}

impl fmt::Display for HostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Handle to a VM on the fleet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmRef {
    /// Numeric VM identifier.
    pub vmid: u32,
    /// Host the VM lives on.
    pub host: String,
    /// VM name.
    pub name: String,
}

/// Power state of a VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmStatus {
    Running,
    Stopped,
    Unknown,
}

impl VmStatus {
    pub(crate) fn parse(s: &str) -> Self {
        match s {
            "running" => Self::Running,
            "stopped" => Self::Stopped,
            _ => Self::Unknown,
        }
    }
}

/// Cloud-init payload applied to a freshly cloned VM.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CloudInit {
    /// Login user created on first boot.
    pub user: String,
    /// SSH public keys authorised for the user.
    pub ssh_keys: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vm_status_parsing() {
        assert_eq!(VmStatus::parse("running"), VmStatus::Running);
        assert_eq!(VmStatus::parse("stopped"), VmStatus::Stopped);
        assert_eq!(VmStatus::parse("paused"), VmStatus::Unknown);
    }

    #[test]
    fn only_online_hosts_take_vms() {
        assert!(HostStatus::Online.is_online());
        assert!(!HostStatus::Offline.is_online());
        assert!(!HostStatus::Unknown.is_online());
    }
}
