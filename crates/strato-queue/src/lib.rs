//! Durable scale-event queue for the strato autoscaler.
//!
//! All side-effecting scale work flows through this queue so that a crash
//! mid-provisioning resumes where it left off: events are delivered
//! at-least-once, acknowledged per message, and redelivered when a consumer
//! dies. The queue is partitioned into two channels by [`ScaleKind`] so a
//! flood of one direction cannot head-of-line-block the other, and it is
//! authoritative for inflight counts — the control loop reads
//! [`WorkQueue::depth`] instead of keeping its own ledger.
//!
//! [`NatsWorkQueue`] is the production implementation (JetStream work-queue
//! streams); [`MemoryWorkQueue`] serves tests and single-process runs.

pub mod error;
mod memory;
mod nats;
pub mod types;

pub use error::{QueueError, QueueResult};
pub use memory::MemoryWorkQueue;
pub use nats::{NatsWorkQueue, QueueConfig};
pub use types::{Acknowledge, Delivery, QueueDepth};

use async_trait::async_trait;

use strato_core::{ScaleEvent, ScaleKind};

/// Redeliveries before a message is dropped as poisonous.
pub const MAX_DELIVER: u32 = 5;

/// Trait for scale-event queue implementations.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Publish an event onto its kind's channel.
    ///
    /// Returns [`QueueError::Full`] when the channel is at its bound.
    async fn publish(&self, event: &ScaleEvent) -> QueueResult<()>;

    /// Receive the next event of the given kind, blocking until one is
    /// available. The returned [`Delivery`] must be terminated with
    /// [`Delivery::ack`] or [`Delivery::nack`].
    async fn consume(&self, kind: ScaleKind) -> QueueResult<Delivery>;

    /// Ready and unacknowledged message counts for a kind's channel.
    async fn depth(&self, kind: ScaleKind) -> QueueResult<QueueDepth>;
}
