//! NATS JetStream work queue.
//!
//! Each [`ScaleKind`] gets its own work-queue stream and durable pull
//! consumer, so messages are removed on ack, redelivered when a consumer
//! dies, and bounded both in count and in delivery attempts.

use std::time::Duration;

use async_nats::jetstream;
use async_nats::jetstream::consumer::pull::{Config as PullConfig, Stream as MessageStream};
use async_nats::jetstream::consumer::{AckPolicy, Consumer};
use async_nats::jetstream::stream::{Config as StreamConfig, DiscardPolicy, RetentionPolicy};
use async_nats::jetstream::AckKind;
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use strato_core::{ScaleEvent, ScaleKind};

use crate::error::{QueueError, QueueResult};
use crate::types::{Acknowledge, Delivery, QueueDepth};
use crate::{WorkQueue, MAX_DELIVER};

/// How long the broker waits for an ack before redelivering.
const ACK_WAIT: Duration = Duration::from_secs(30);

/// Redelivery delay after a nack.
const REDELIVERY_DELAY: Duration = Duration::from_secs(5);

/// Broker connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Broker host.
    #[serde(default = "default_host")]
    pub host: String,

    /// Broker port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Username, if the broker requires authentication.
    #[serde(default)]
    pub user: Option<String>,

    /// Password, if the broker requires authentication.
    #[serde(default)]
    pub password: Option<String>,
}

fn default_host() -> String {
    "localhost".to_owned()
}

const fn default_port() -> u16 {
    4222
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            user: None,
            password: None,
        }
    }
}

const fn subject(kind: ScaleKind) -> &'static str {
    match kind {
        ScaleKind::Create => "strato.scale.create",
        ScaleKind::Destroy => "strato.scale.destroy",
    }
}

const fn stream_name(kind: ScaleKind) -> &'static str {
    match kind {
        ScaleKind::Create => "STRATO_CREATE",
        ScaleKind::Destroy => "STRATO_DESTROY",
    }
}

const fn consumer_name(kind: ScaleKind) -> &'static str {
    match kind {
        ScaleKind::Create => "strato-create-worker",
        ScaleKind::Destroy => "strato-destroy-worker",
    }
}

struct KindChannel {
    consumer: Consumer<PullConfig>,
    messages: Mutex<Option<MessageStream>>,
}

/// JetStream implementation of [`WorkQueue`].
pub struct NatsWorkQueue {
    jetstream: jetstream::Context,
    create: KindChannel,
    destroy: KindChannel,
}

impl NatsWorkQueue {
    /// Connect to the broker and ensure streams and consumers exist.
    ///
    /// `capacity` bounds each channel's message count; it should be the
    /// configured maximum node count.
    pub async fn connect(config: &QueueConfig, capacity: i64) -> QueueResult<Self> {
        let url = format!("nats://{}:{}", config.host, config.port);

        let mut options = async_nats::ConnectOptions::new().name("strato-scaler");
        if let (Some(user), Some(password)) = (&config.user, &config.password) {
            options = options.user_and_password(user.clone(), password.clone());
        }

        let client = async_nats::connect_with_options(&url, options)
            .await
            .map_err(|e| QueueError::Connect(e.to_string()))?;
        info!(url = %url, "connected to broker");

        let jetstream = jetstream::new(client);
        let create = Self::channel(&jetstream, ScaleKind::Create, capacity).await?;
        let destroy = Self::channel(&jetstream, ScaleKind::Destroy, capacity).await?;

        Ok(Self {
            jetstream,
            create,
            destroy,
        })
    }

    async fn channel(
        jetstream: &jetstream::Context,
        kind: ScaleKind,
        capacity: i64,
    ) -> QueueResult<KindChannel> {
        let stream = jetstream
            .get_or_create_stream(StreamConfig {
                name: stream_name(kind).to_owned(),
                subjects: vec![subject(kind).to_owned()],
                retention: RetentionPolicy::WorkQueue,
                discard: DiscardPolicy::New,
                max_messages: capacity,
                ..StreamConfig::default()
            })
            .await
            .map_err(|e| QueueError::Setup(e.to_string()))?;

        let consumer = stream
            .get_or_create_consumer(
                consumer_name(kind),
                PullConfig {
                    durable_name: Some(consumer_name(kind).to_owned()),
                    ack_policy: AckPolicy::Explicit,
                    ack_wait: ACK_WAIT,
                    max_deliver: i64::from(MAX_DELIVER),
                    ..PullConfig::default()
                },
            )
            .await
            .map_err(|e| QueueError::Setup(e.to_string()))?;

        debug!(kind = %kind, stream = stream_name(kind), "channel ready");
        Ok(KindChannel {
            consumer,
            messages: Mutex::new(None),
        })
    }

    fn kind_channel(&self, kind: ScaleKind) -> &KindChannel {
        match kind {
            ScaleKind::Create => &self.create,
            ScaleKind::Destroy => &self.destroy,
        }
    }
}

#[async_trait]
impl WorkQueue for NatsWorkQueue {
    async fn publish(&self, event: &ScaleEvent) -> QueueResult<()> {
        let payload = serde_json::to_vec(event)?;

        let ack = self
            .jetstream
            .publish(subject(event.kind), payload.into())
            .await
            .map_err(|e| QueueError::Publish(e.to_string()))?;

        // Wait for the broker to confirm the message is stored.
        ack.await.map_err(|e| {
            let text = e.to_string();
            if text.contains("maximum messages exceeded") {
                QueueError::Full(event.kind)
            } else {
                QueueError::Publish(text)
            }
        })?;

        debug!(event = %event, "event published");
        Ok(())
    }

    async fn consume(&self, kind: ScaleKind) -> QueueResult<Delivery> {
        let channel = self.kind_channel(kind);
        let mut guard = channel.messages.lock().await;

        let messages = match guard.as_mut() {
            Some(messages) => messages,
            None => {
                let messages = channel
                    .consumer
                    .messages()
                    .await
                    .map_err(|e| QueueError::Consume(e.to_string()))?;
                guard.insert(messages)
            }
        };

        match messages.next().await {
            Some(Ok(message)) => {
                let event: ScaleEvent = serde_json::from_slice(&message.payload)?;
                let attempt = message
                    .info()
                    .map(|info| info.delivered.max(1) as u32)
                    .unwrap_or(1);
                Ok(Delivery::new(event, attempt, Box::new(NatsAcker { message })))
            }
            Some(Err(e)) => {
                // Drop the subscription; the next consume re-establishes it.
                *guard = None;
                Err(QueueError::Consume(e.to_string()))
            }
            None => {
                *guard = None;
                Err(QueueError::Consume("message stream closed".to_owned()))
            }
        }
    }

    async fn depth(&self, kind: ScaleKind) -> QueueResult<QueueDepth> {
        let mut consumer = self.kind_channel(kind).consumer.clone();
        let info = consumer
            .info()
            .await
            .map_err(|e| QueueError::Consume(e.to_string()))?;

        Ok(QueueDepth {
            ready: info.num_pending,
            unacked: info.num_ack_pending as u64,
        })
    }
}

struct NatsAcker {
    message: jetstream::Message,
}

#[async_trait]
impl Acknowledge for NatsAcker {
    async fn ack(self: Box<Self>) -> QueueResult<()> {
        self.message
            .ack()
            .await
            .map_err(|e| QueueError::Ack(e.to_string()))
    }

    async fn nack(self: Box<Self>, requeue: bool) -> QueueResult<()> {
        let ack_kind = if requeue {
            AckKind::Nak(Some(REDELIVERY_DELAY))
        } else {
            AckKind::Term
        };
        self.message
            .ack_with(ack_kind)
            .await
            .map_err(|e| QueueError::Ack(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_naming_is_partitioned() {
        assert_ne!(subject(ScaleKind::Create), subject(ScaleKind::Destroy));
        assert_ne!(stream_name(ScaleKind::Create), stream_name(ScaleKind::Destroy));
        assert_ne!(
            consumer_name(ScaleKind::Create),
            consumer_name(ScaleKind::Destroy)
        );
    }

    #[test]
    fn default_config_points_at_local_broker() {
        let config = QueueConfig::default();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 4222);
        assert!(config.user.is_none());
    }
}
