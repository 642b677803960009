//! Resource accounting: the pure arithmetic behind scale decisions.
//!
//! Scale-up asks how many whole node equivalents the unmet demand amounts
//! to; scale-down asks whether the surviving nodes could absorb a victim's
//! allocation and still keep the configured headroom free. Neither function
//! performs I/O; the control loop feeds them snapshots.

use std::collections::HashMap;

use strato_core::{AllocatedResources, NodePattern, ScaleEvent, UnschedulableDemand};

use crate::config::ScalingConfig;

/// Compute the CREATE events required to absorb the unmet demand.
///
/// The shortfall is measured independently in CPU and memory node
/// equivalents (real division, rounded up) and the larger figure wins.
/// Events already inflight are subtracted, and the result is capped at the
/// headroom remaining under `max_nodes`. Each returned event carries a
/// freshly minted node name; placement assigns hosts afterwards.
pub fn required_scale_events(
    demand: &UnschedulableDemand,
    owned_count: usize,
    inflight_creates: u64,
    config: &ScalingConfig,
    pattern: &NodePattern,
) -> Vec<ScaleEvent> {
    if demand.is_zero() {
        return Vec::new();
    }

    let cpu_events = (demand.cpu / f64::from(config.node_cores)).ceil() as i64;
    let memory_events = (demand.memory_bytes as f64 / config.node_memory_bytes()).ceil() as i64;
    let required = cpu_events.max(memory_events);

    let net = required - inflight_creates as i64;
    let remaining = i64::from(config.max_nodes) - owned_count as i64 - inflight_creates as i64;
    let net = net.min(remaining);

    if net <= 0 {
        return Vec::new();
    }

    (0..net).map(|_| ScaleEvent::create(pattern.generate())).collect()
}

/// Assess whether retiring one worker is acceptable.
///
/// Acceptable iff, for CPU *and* memory independently: the total allocation
/// is non-zero (never flap to zero) and fits within the remaining nodes'
/// capacity with `load_headroom` still free. Returns a DESTROY event with
/// no victim assigned; victim selection fills it in.
pub fn assess_scale_down(
    allocations: &HashMap<String, AllocatedResources>,
    num_nodes: usize,
    config: &ScalingConfig,
) -> Option<ScaleEvent> {
    if num_nodes == 0 {
        return None;
    }

    let total_cpu: f64 = allocations.values().map(|a| a.cpu).sum();
    let total_memory: f64 = allocations.values().map(|a| a.memory).sum();

    let nodes_after = (num_nodes - 1) as f64;
    let cpu_ok = acceptable_for_resource(
        total_cpu,
        nodes_after * f64::from(config.node_cores),
        config.load_headroom,
    );
    let memory_ok = acceptable_for_resource(
        total_memory,
        nodes_after * config.node_memory_bytes(),
        config.load_headroom,
    );

    (cpu_ok && memory_ok).then(|| ScaleEvent::destroy(String::new()))
}

/// One resource axis of the scale-down assessment.
fn acceptable_for_resource(total_load: f64, capacity_after_removal: f64, headroom: f64) -> bool {
    total_load > 0.0 && total_load <= capacity_after_removal * (1.0 - headroom)
}
