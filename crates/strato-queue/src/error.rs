//! Error types for the work queue.

use thiserror::Error;

use strato_core::ScaleKind;

/// Result type alias using [`QueueError`].
pub type QueueResult<T> = Result<T, QueueError>;

/// Errors that can occur on the work queue.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Broker connection failed.
    #[error("queue connection error: {0}")]
    Connect(String),

    /// Stream or consumer setup failed.
    #[error("queue setup error: {0}")]
    Setup(String),

    /// Publishing failed.
    #[error("publish error: {0}")]
    Publish(String),

    /// Consuming failed.
    #[error("consume error: {0}")]
    Consume(String),

    /// Acknowledgement failed; the message will redeliver.
    #[error("ack error: {0}")]
    Ack(String),

    /// The channel is at its bound.
    #[error("queue full for {0} events")]
    Full(ScaleKind),

    /// A message could not be (de)serialised.
    #[error("serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),
}

impl QueueError {
    /// Whether retrying later can reasonably succeed.
    ///
    /// Everything on the queue is transient except a malformed message;
    /// a full channel drains as workers ack.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Serialisation(_))
    }
}
