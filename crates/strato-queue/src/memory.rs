//! In-memory work queue.
//!
//! Serves the tests and single-process deployments. Semantics mirror the
//! broker implementation as far as a single process allows: per-message
//! ack, bounded redelivery on nack, bounded channel length. Redelivery on
//! consumer *death* is meaningless in-process, so it is not simulated.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::warn;

use strato_core::{ScaleEvent, ScaleKind};

use crate::error::{QueueError, QueueResult};
use crate::types::{Acknowledge, Delivery, QueueDepth};
use crate::{WorkQueue, MAX_DELIVER};

#[derive(Debug)]
struct Channel {
    kind: ScaleKind,
    pending: Mutex<VecDeque<(ScaleEvent, u32)>>,
    unacked: AtomicU64,
    notify: Notify,
    capacity: usize,
}

impl Channel {
    fn new(kind: ScaleKind, capacity: usize) -> Self {
        Self {
            kind,
            pending: Mutex::new(VecDeque::new()),
            unacked: AtomicU64::new(0),
            notify: Notify::new(),
            capacity,
        }
    }

    fn pending(&self) -> MutexGuard<'_, VecDeque<(ScaleEvent, u32)>> {
        self.pending.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn depth(&self) -> QueueDepth {
        QueueDepth {
            ready: self.pending().len() as u64,
            unacked: self.unacked.load(Ordering::Acquire),
        }
    }
}

/// In-memory implementation of [`WorkQueue`].
#[derive(Debug, Clone)]
pub struct MemoryWorkQueue {
    create: Arc<Channel>,
    destroy: Arc<Channel>,
}

impl MemoryWorkQueue {
    /// Create a queue with the given per-channel bound.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            create: Arc::new(Channel::new(ScaleKind::Create, capacity)),
            destroy: Arc::new(Channel::new(ScaleKind::Destroy, capacity)),
        }
    }

    fn channel(&self, kind: ScaleKind) -> &Arc<Channel> {
        match kind {
            ScaleKind::Create => &self.create,
            ScaleKind::Destroy => &self.destroy,
        }
    }
}

#[async_trait]
impl WorkQueue for MemoryWorkQueue {
    async fn publish(&self, event: &ScaleEvent) -> QueueResult<()> {
        let channel = self.channel(event.kind);
        {
            let mut pending = channel.pending();
            let inflight = pending.len() as u64 + channel.unacked.load(Ordering::Acquire);
            if inflight >= channel.capacity as u64 {
                return Err(QueueError::Full(event.kind));
            }
            pending.push_back((event.clone(), 1));
        }
        channel.notify.notify_one();
        Ok(())
    }

    async fn consume(&self, kind: ScaleKind) -> QueueResult<Delivery> {
        let channel = Arc::clone(self.channel(kind));
        loop {
            let notified = channel.notify.notified();
            if let Some((event, attempt)) = channel.pending().pop_front() {
                channel.unacked.fetch_add(1, Ordering::AcqRel);
                return Ok(Delivery::new(
                    event.clone(),
                    attempt,
                    Box::new(MemoryAcker {
                        channel: Arc::clone(&channel),
                        event,
                        attempt,
                    }),
                ));
            }
            notified.await;
        }
    }

    async fn depth(&self, kind: ScaleKind) -> QueueResult<QueueDepth> {
        Ok(self.channel(kind).depth())
    }
}

struct MemoryAcker {
    channel: Arc<Channel>,
    event: ScaleEvent,
    attempt: u32,
}

#[async_trait]
impl Acknowledge for MemoryAcker {
    async fn ack(self: Box<Self>) -> QueueResult<()> {
        self.channel.unacked.fetch_sub(1, Ordering::AcqRel);
        Ok(())
    }

    async fn nack(self: Box<Self>, requeue: bool) -> QueueResult<()> {
        self.channel.unacked.fetch_sub(1, Ordering::AcqRel);

        if requeue && self.attempt < MAX_DELIVER {
            self.channel
                .pending()
                .push_back((self.event, self.attempt + 1));
            self.channel.notify.notify_one();
        } else if requeue {
            warn!(
                event = %self.event,
                kind = %self.channel.kind,
                attempts = self.attempt,
                "dropping event after exhausting redeliveries"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_consume_ack() {
        let queue = MemoryWorkQueue::new(10);
        let event = ScaleEvent::create("kp-node-a");

        queue.publish(&event).await.unwrap();
        assert_eq!(queue.depth(ScaleKind::Create).await.unwrap().ready, 1);

        let delivery = queue.consume(ScaleKind::Create).await.unwrap();
        assert_eq!(delivery.event(), &event);
        assert_eq!(delivery.attempt(), 1);

        let depth = queue.depth(ScaleKind::Create).await.unwrap();
        assert_eq!(depth.ready, 0);
        assert_eq!(depth.unacked, 1);

        delivery.ack().await.unwrap();
        assert_eq!(queue.depth(ScaleKind::Create).await.unwrap().inflight(), 0);
    }

    #[tokio::test]
    async fn nack_requeues_with_incremented_attempt() {
        let queue = MemoryWorkQueue::new(10);
        queue.publish(&ScaleEvent::create("kp-node-a")).await.unwrap();

        let delivery = queue.consume(ScaleKind::Create).await.unwrap();
        delivery.nack(true).await.unwrap();

        let redelivered = queue.consume(ScaleKind::Create).await.unwrap();
        assert_eq!(redelivered.attempt(), 2);
        redelivered.nack(false).await.unwrap();

        assert_eq!(queue.depth(ScaleKind::Create).await.unwrap().inflight(), 0);
    }

    #[tokio::test]
    async fn redelivery_is_bounded() {
        let queue = MemoryWorkQueue::new(10);
        queue.publish(&ScaleEvent::create("kp-node-a")).await.unwrap();

        for _ in 0..MAX_DELIVER {
            let delivery = queue.consume(ScaleKind::Create).await.unwrap();
            delivery.nack(true).await.unwrap();
        }

        // The fifth nack drops the message instead of requeueing it.
        assert_eq!(queue.depth(ScaleKind::Create).await.unwrap().inflight(), 0);
    }

    #[tokio::test]
    async fn channels_are_partitioned_by_kind() {
        let queue = MemoryWorkQueue::new(10);
        queue.publish(&ScaleEvent::create("kp-node-a")).await.unwrap();
        queue.publish(&ScaleEvent::destroy("kp-node-b")).await.unwrap();

        assert_eq!(queue.depth(ScaleKind::Create).await.unwrap().ready, 1);
        assert_eq!(queue.depth(ScaleKind::Destroy).await.unwrap().ready, 1);

        let delivery = queue.consume(ScaleKind::Destroy).await.unwrap();
        assert_eq!(delivery.event().node_name, "kp-node-b");
        delivery.ack().await.unwrap();
    }

    #[tokio::test]
    async fn bounded_capacity_counts_unacked() {
        let queue = MemoryWorkQueue::new(2);
        queue.publish(&ScaleEvent::create("kp-node-a")).await.unwrap();
        queue.publish(&ScaleEvent::create("kp-node-b")).await.unwrap();

        assert!(matches!(
            queue.publish(&ScaleEvent::create("kp-node-c")).await,
            Err(QueueError::Full(ScaleKind::Create))
        ));

        // Consuming without acking keeps the channel full.
        let delivery = queue.consume(ScaleKind::Create).await.unwrap();
        assert!(matches!(
            queue.publish(&ScaleEvent::create("kp-node-c")).await,
            Err(QueueError::Full(ScaleKind::Create))
        ));

        delivery.ack().await.unwrap();
        queue.publish(&ScaleEvent::create("kp-node-c")).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn blocking_consume_wakes_on_publish() {
        let queue = MemoryWorkQueue::new(10);
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.consume(ScaleKind::Create).await })
        };

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        queue.publish(&ScaleEvent::create("kp-node-a")).await.unwrap();

        let delivery = tokio::time::timeout(std::time::Duration::from_secs(1), consumer)
            .await
            .expect("timeout")
            .expect("task")
            .expect("delivery");
        assert_eq!(delivery.event().node_name, "kp-node-a");
    }
}
