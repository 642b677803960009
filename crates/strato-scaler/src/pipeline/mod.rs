//! Pipeline workers: consume scale events and execute them.
//!
//! Each worker owns its delivery exclusively until it terminates it:
//! success acks, transient failure nacks with requeue (redelivery is
//! bounded by the queue), anything else drops the event with a log. All
//! recovery from crash restarts flows from the queue redelivering unacked
//! events, so every step must tolerate finding its work already done.

mod create;
mod destroy;

pub use create::CreatePipeline;
pub use destroy::DestroyPipeline;

use std::time::Duration;

use tracing::{error, info, warn};

use strato_queue::Delivery;

use crate::error::ScalerResult;

/// Deadline for a cloned VM to reach the running state.
pub(crate) const VM_START_TIMEOUT: Duration = Duration::from_secs(30);

/// How often VM power state is re-read while waiting for a start.
pub(crate) const VM_STATUS_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Pause after a failed consume before reconnecting to the queue.
pub(crate) const CONSUME_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Terminate a delivery according to the failure policy.
pub(crate) async fn settle(delivery: Delivery, result: ScalerResult<()>) {
    let event = delivery.event().clone();
    let attempt = delivery.attempt();

    let terminated = match result {
        Ok(()) => {
            info!(event = %event, "event completed");
            delivery.ack().await
        }
        Err(e) if e.is_transient() => {
            warn!(event = %event, attempt, error = %e, "transient failure, requeueing");
            delivery.nack(true).await
        }
        Err(e) => {
            error!(event = %event, attempt, error = %e, "permanent failure, dropping event");
            delivery.nack(false).await
        }
    };

    if let Err(e) = terminated {
        // The broker will redeliver after the ack wait expires.
        warn!(event = %event, error = %e, "failed to settle delivery");
    }
}
