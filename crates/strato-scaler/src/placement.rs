//! Placement: host selection for new VMs and victim selection for
//! decommissions.

use std::collections::HashMap;

use tracing::debug;

use strato_core::{AllocatedResources, ScaleEvent, ScaleKind, MIB};
use strato_hypervisor::HostInfo;

use crate::config::ScalingConfig;

/// Assign each CREATE event in the batch a target hypervisor host.
///
/// Events are placed in order on the online host with the most free memory,
/// tie-broken by free CPU. After each assignment the new node's resources
/// are subtracted from the chosen host so the rest of the batch sees the
/// hypothetical post-placement view. Events that fit on no host are left
/// unassigned; the caller must not publish them.
///
/// Returns the number of events assigned.
pub fn assign_target_hosts(
    events: &mut [ScaleEvent],
    mut hosts: Vec<HostInfo>,
    config: &ScalingConfig,
) -> usize {
    let cores = f64::from(config.node_cores);
    let memory_bytes = config.node_memory_mib * 1024 * 1024;

    let mut assigned = 0;
    for event in events.iter_mut().filter(|e| e.kind == ScaleKind::Create) {
        let mut best: Option<usize> = None;
        for (index, host) in hosts.iter().enumerate() {
            if !host.status.is_online() {
                continue;
            }
            if host.cpu_free < cores || host.mem_free < memory_bytes {
                continue;
            }
            let better = match best {
                None => true,
                Some(current) => {
                    (host.mem_free, host.cpu_free) > (hosts[current].mem_free, hosts[current].cpu_free)
                }
            };
            if better {
                best = Some(index);
            }
        }

        match best {
            Some(index) => {
                let host = &mut hosts[index];
                event.target_host = Some(host.id.clone());
                host.cpu_free -= cores;
                host.mem_free -= memory_bytes;
                assigned += 1;
                debug!(event = %event, host = %host.id, "event placed");
            }
            None => {
                event.target_host = None;
            }
        }
    }

    assigned
}

/// Trait for victim-selection strategies.
pub trait VictimStrategy: Send + Sync {
    /// Pick the node to retire, or `None` when there are no candidates.
    fn select(&self, allocations: &HashMap<String, AllocatedResources>) -> Option<String>;

    /// Returns the strategy name.
    fn name(&self) -> &'static str;
}

/// Default victim strategy: lowest weighted allocation.
///
/// The weight is `cpu_cores + memory_bytes / MiB`, which biases towards
/// memory-light victims; empty nodes always win. Ties break
/// lexicographically on the node name.
#[derive(Debug, Default)]
pub struct WeightedAllocation;

impl WeightedAllocation {
    /// Creates the strategy.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn weight(allocated: &AllocatedResources) -> f64 {
        allocated.cpu + allocated.memory / MIB
    }
}

impl VictimStrategy for WeightedAllocation {
    fn select(&self, allocations: &HashMap<String, AllocatedResources>) -> Option<String> {
        // Empty nodes are retired before loaded ones regardless of weight.
        let empty = allocations
            .iter()
            .filter(|(_, allocated)| allocated.is_empty())
            .map(|(name, _)| name)
            .min();
        if let Some(name) = empty {
            return Some(name.clone());
        }

        allocations
            .iter()
            .min_by(|(a_name, a), (b_name, b)| {
                Self::weight(a)
                    .partial_cmp(&Self::weight(b))
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a_name.cmp(b_name))
            })
            .map(|(name, _)| name.clone())
    }

    fn name(&self) -> &'static str {
        "weighted_allocation"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strato_core::NodePattern;
    use strato_hypervisor::HostStatus;

    const GIB: u64 = 1024 * 1024 * 1024;

    fn host(id: &str, cpu_free: f64, mem_free: u64) -> HostInfo {
        HostInfo {
            id: id.to_owned(),
            cpu_free,
            mem_free,
            status: HostStatus::Online,
        }
    }

    fn config() -> ScalingConfig {
        ScalingConfig {
            node_cores: 2,
            node_memory_mib: 2048,
            ..ScalingConfig::default()
        }
    }

    fn create_batch(count: usize) -> Vec<ScaleEvent> {
        let pattern = NodePattern::new("kp-node").unwrap();
        (0..count).map(|_| ScaleEvent::create(pattern.generate())).collect()
    }

    #[test]
    fn identical_hosts_take_one_event_each() {
        let hosts = vec![
            host("host-01", 8.0, 16 * GIB),
            host("host-02", 8.0, 16 * GIB),
            host("host-03", 8.0, 16 * GIB),
        ];
        let mut events = create_batch(3);

        let assigned = assign_target_hosts(&mut events, hosts, &config());

        assert_eq!(assigned, 3);
        assert_eq!(events[0].target_host.as_deref(), Some("host-01"));
        assert_eq!(events[1].target_host.as_deref(), Some("host-02"));
        assert_eq!(events[2].target_host.as_deref(), Some("host-03"));
    }

    #[test]
    fn most_free_memory_wins() {
        let hosts = vec![
            host("host-01", 8.0, 4 * GIB),
            host("host-02", 8.0, 32 * GIB),
            host("host-03", 8.0, 8 * GIB),
        ];
        let mut events = create_batch(1);

        assign_target_hosts(&mut events, hosts, &config());
        assert_eq!(events[0].target_host.as_deref(), Some("host-02"));
    }

    #[test]
    fn free_cpu_breaks_memory_ties() {
        let hosts = vec![
            host("host-01", 4.0, 16 * GIB),
            host("host-02", 12.0, 16 * GIB),
        ];
        let mut events = create_batch(1);

        assign_target_hosts(&mut events, hosts, &config());
        assert_eq!(events[0].target_host.as_deref(), Some("host-02"));
    }

    #[test]
    fn batch_subtraction_moves_later_events_away() {
        // One big host and one small one: the second event must see the
        // big host's capacity reduced by the first placement.
        let hosts = vec![
            host("host-01", 8.0, 5 * GIB),
            host("host-02", 8.0, 4 * GIB),
        ];
        let mut events = create_batch(2);

        let assigned = assign_target_hosts(&mut events, hosts, &config());
        assert_eq!(assigned, 2);
        assert_eq!(events[0].target_host.as_deref(), Some("host-01"));
        assert_eq!(events[1].target_host.as_deref(), Some("host-02"));
    }

    #[test]
    fn offline_hosts_are_excluded() {
        let mut offline = host("host-01", 16.0, 64 * GIB);
        offline.status = HostStatus::Offline;
        let mut unknown = host("host-02", 16.0, 64 * GIB);
        unknown.status = HostStatus::Unknown;
        let hosts = vec![offline, unknown, host("host-03", 4.0, 4 * GIB)];
        let mut events = create_batch(1);

        assign_target_hosts(&mut events, hosts, &config());
        assert_eq!(events[0].target_host.as_deref(), Some("host-03"));
    }

    #[test]
    fn events_that_fit_nowhere_stay_unassigned() {
        let hosts = vec![host("host-01", 8.0, 3 * GIB)];
        let mut events = create_batch(2);

        let assigned = assign_target_hosts(&mut events, hosts, &config());

        assert_eq!(assigned, 1);
        assert_eq!(events[0].target_host.as_deref(), Some("host-01"));
        assert!(events[1].target_host.is_none());
    }

    #[test]
    fn assigned_hosts_had_capacity_after_prior_assignments() {
        // Quantified invariant: replaying the batch subtraction never
        // drives a host's free capacity negative.
        let hosts = vec![
            host("host-01", 4.0, 6 * GIB),
            host("host-02", 6.0, 5 * GIB),
        ];
        let mut events = create_batch(4);
        assign_target_hosts(&mut events, hosts.clone(), &config());

        let mut remaining: HashMap<String, (f64, u64)> = hosts
            .iter()
            .map(|h| (h.id.clone(), (h.cpu_free, h.mem_free)))
            .collect();
        for event in events.iter().filter(|e| e.target_host.is_some()) {
            let target = event.target_host.clone().unwrap();
            let entry = remaining.get_mut(&target).unwrap();
            entry.0 -= 2.0;
            entry.1 = entry
                .1
                .checked_sub(2048 * 1024 * 1024)
                .expect("placement exceeded host memory");
            assert!(entry.0 >= 0.0, "placement exceeded host CPU");
        }
    }

    fn allocations(figures: &[(&str, f64, f64)]) -> HashMap<String, AllocatedResources> {
        figures
            .iter()
            .map(|(name, cpu, memory)| {
                ((*name).to_owned(), AllocatedResources { cpu: *cpu, memory: *memory })
            })
            .collect()
    }

    #[test]
    fn least_allocated_node_is_the_victim() {
        let allocations = allocations(&[
            ("kp-node-163c3d58-4c4d-426d-baef-e0c30ecb5fcd", 1.0, 2048.0),
            ("kp-node-a4f77d63-a944-425d-a980-e7be925b8a6a", 1.0, 2048.0),
            ("kp-node-67944692-1de7-4bd0-ac8c-de6dc178cb38", 1.0, 1048.0),
        ]);

        let victim = WeightedAllocation::new().select(&allocations).unwrap();
        assert_eq!(victim, "kp-node-67944692-1de7-4bd0-ac8c-de6dc178cb38");
    }

    #[test]
    fn empty_nodes_are_always_preferred() {
        let allocations = allocations(&[
            ("kp-node-busy", 4.0, 8.0 * 1024.0 * 1024.0 * 1024.0),
            ("kp-node-idle", 0.0, 0.0),
        ]);

        let victim = WeightedAllocation::new().select(&allocations).unwrap();
        assert_eq!(victim, "kp-node-idle");
    }

    #[test]
    fn ties_break_lexicographically() {
        let allocations = allocations(&[("kp-node-b", 1.0, 1024.0), ("kp-node-a", 1.0, 1024.0)]);

        let victim = WeightedAllocation::new().select(&allocations).unwrap();
        assert_eq!(victim, "kp-node-a");
    }

    #[test]
    fn no_candidates_no_victim() {
        assert!(WeightedAllocation::new().select(&HashMap::new()).is_none());
    }

    #[test]
    fn victim_has_minimum_weight() {
        // Quantified invariant: the selected victim's weight is minimal.
        let allocations = allocations(&[
            ("a", 2.0, 512.0 * MIB),
            ("b", 0.5, 256.0 * MIB),
            ("c", 1.0, 128.0 * MIB),
        ]);

        let strategy = WeightedAllocation::new();
        let victim = strategy.select(&allocations).unwrap();
        let victim_weight = WeightedAllocation::weight(&allocations[&victim]);
        for allocated in allocations.values() {
            assert!(victim_weight <= WeightedAllocation::weight(allocated));
        }
    }
}
