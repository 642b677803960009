//! Delivery handle and depth figures.

use async_trait::async_trait;

use strato_core::ScaleEvent;

use crate::error::QueueResult;

/// Ready and unacknowledged counts for one channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueDepth {
    /// Messages waiting for a consumer.
    pub ready: u64,
    /// Messages delivered but not yet acknowledged.
    pub unacked: u64,
}

impl QueueDepth {
    /// Total events considered inflight by the control loop.
    #[must_use]
    pub const fn inflight(&self) -> u64 {
        self.ready + self.unacked
    }
}

/// Backend-specific acknowledgement of a single delivery.
#[async_trait]
pub trait Acknowledge: Send {
    /// The event was processed; remove it from the queue.
    async fn ack(self: Box<Self>) -> QueueResult<()>;

    /// The event was not processed. `requeue` schedules a redelivery;
    /// otherwise the message is dropped.
    async fn nack(self: Box<Self>, requeue: bool) -> QueueResult<()>;
}

/// One consumed message, owned exclusively by its worker until terminated
/// with [`Delivery::ack`] or [`Delivery::nack`].
pub struct Delivery {
    event: ScaleEvent,
    attempt: u32,
    acker: Box<dyn Acknowledge>,
}

impl Delivery {
    /// Assemble a delivery. Used by queue implementations.
    #[must_use]
    pub fn new(event: ScaleEvent, attempt: u32, acker: Box<dyn Acknowledge>) -> Self {
        Self { event, attempt, acker }
    }

    /// The delivered event.
    #[must_use]
    pub fn event(&self) -> &ScaleEvent {
        &self.event
    }

    /// Delivery attempt, starting at 1.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Acknowledge successful processing.
    pub async fn ack(self) -> QueueResult<()> {
        self.acker.ack().await
    }

    /// Reject the delivery, optionally requeueing it.
    pub async fn nack(self, requeue: bool) -> QueueResult<()> {
        self.acker.nack(requeue).await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("event", &self.event)
            .field("attempt", &self.attempt)
            .finish_non_exhaustive()
    }
}
