use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::PublishError;
use crate::reporter;
use crate::types::SignalEvent;

/// Fire-and-forget sink for discovered signals.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, event: &SignalEvent) -> Result<(), PublishError>;
}

/// Publishes each signal as a JSON message on a Redis pub/sub channel.
pub struct RedisPublisher {
    conn: ConnectionManager,
}

impl RedisPublisher {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).context("Failed to create Redis client")?;
        let conn = ConnectionManager::new(client)
            .await
            .context("Failed to connect to Redis")?;
        info!("Redis publisher connected to {url}");
        Ok(Self { conn })
    }
}

#[async_trait]
impl Publisher for RedisPublisher {
    async fn publish(&self, topic: &str, event: &SignalEvent) -> Result<(), PublishError> {
        let payload = serde_json::to_string(event)?;
        let mut conn = self.conn.clone();
        let receivers: i64 = conn.publish(topic, payload).await?;
        debug!(topic = topic, receivers, "Published {}", event.value);
        Ok(())
    }
}

/// Writes each signal as a JSON line on stdout. Used for dry runs.
pub struct StdoutPublisher;

#[async_trait]
impl Publisher for StdoutPublisher {
    async fn publish(&self, topic: &str, event: &SignalEvent) -> Result<(), PublishError> {
        reporter::report_signal(topic, event)?;
        Ok(())
    }
}

/// Publish one event, bounded by `timeout` and interrupted by shutdown.
///
/// The caller has already marked the signal as seen, so any error here means
/// the signal is not delivered; nothing retries it.
pub async fn deliver(
    publisher: &dyn Publisher,
    topic: &str,
    event: &SignalEvent,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<(), PublishError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(PublishError::Cancelled),
        res = tokio::time::timeout(timeout, publisher.publish(topic, event)) => {
            match res {
                Ok(inner) => inner,
                Err(_) => Err(PublishError::Timeout(timeout)),
            }
        }
    }
}
