//! Scale events, the unit of work on the queue.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of a scale event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleKind {
    /// Provision one new worker node.
    Create,
    /// Decommission one existing worker node.
    Destroy,
}

impl ScaleKind {
    /// Get the kind name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Destroy => "destroy",
        }
    }
}

impl fmt::Display for ScaleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single unit of provisioning or decommission work.
///
/// Events are born in the control loop, published to the work queue, and
/// consumed by exactly one pipeline worker. The node name doubles as the
/// event identity: for CREATE it is assigned before the event is published,
/// for DESTROY it names the victim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleEvent {
    /// Direction of the event.
    pub kind: ScaleKind,
    /// The worker node this event creates or destroys.
    pub node_name: String,
    /// Hypervisor host the new VM is placed on. Assigned by placement;
    /// always `None` for DESTROY.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_host: Option<String>,
}

impl ScaleEvent {
    /// Create a CREATE event for a freshly named node. Placement assigns
    /// the target host before the event is published.
    #[must_use]
    pub fn create(node_name: impl Into<String>) -> Self {
        Self {
            kind: ScaleKind::Create,
            node_name: node_name.into(),
            target_host: None,
        }
    }

    /// Create a DESTROY event for the given victim.
    #[must_use]
    pub fn destroy(node_name: impl Into<String>) -> Self {
        Self {
            kind: ScaleKind::Destroy,
            node_name: node_name.into(),
            target_host: None,
        }
    }

    /// Stable identity of this event.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.node_name
    }
}

impl fmt::Display for ScaleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.node_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_event_has_no_target_until_placed() {
        let event = ScaleEvent::create("kp-node-abc");
        assert_eq!(event.kind, ScaleKind::Create);
        assert!(event.target_host.is_none());
        assert_eq!(event.id(), "kp-node-abc");
    }

    #[test]
    fn serde_roundtrip() {
        let mut event = ScaleEvent::create("worker-1");
        event.target_host = Some("pve-01".to_owned());

        let json = serde_json::to_string(&event).unwrap();
        let parsed: ScaleEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, parsed);
    }

    #[test]
    fn destroy_serialises_without_target_host() {
        let event = ScaleEvent::destroy("worker-1");
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("target_host"));
    }

    #[test]
    fn kind_display() {
        assert_eq!(ScaleKind::Create.to_string(), "create");
        assert_eq!(ScaleKind::Destroy.to_string(), "destroy");
    }
}
