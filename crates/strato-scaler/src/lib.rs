//! strato-scaler - elastic worker-node autoscaling for a Kubernetes
//! cluster running on a Proxmox fleet.
//!
//! The scaler is responsible for:
//!
//! - **Demand sensing**: summing the resource requests of pods the
//!   scheduler could not place
//! - **Scale arithmetic**: converting unmet demand into whole-node CREATE
//!   events, and judging when retiring a node leaves enough headroom
//! - **Placement**: spreading new VMs across hypervisor hosts and picking
//!   the lightest-loaded victim for decommission
//! - **The pipelines**: executing CREATE (clone, start, await join) and
//!   DESTROY (cordon, evict, delete, remove VM) against the external
//!   clients, driven by a durable work queue
//!
//! # Architecture
//!
//! The control loop samples cluster state every tick and publishes scale
//! events onto the queue; pipeline workers consume them. Because every
//! side-effecting transition flows through the queue with per-message
//! acknowledgement, a crashed scaler resumes its inflight work on restart
//! instead of double-provisioning.

pub mod accounting;
pub mod config;
pub mod controller;
pub mod error;
pub mod pipeline;
pub mod placement;
pub mod service;

pub use config::{ScalerConfig, ScalingConfig, WorkerConfig};
pub use controller::Controller;
pub use error::{ScalerError, ScalerResult};
pub use pipeline::{CreatePipeline, DestroyPipeline};
pub use placement::{VictimStrategy, WeightedAllocation};
pub use service::ScalerService;
