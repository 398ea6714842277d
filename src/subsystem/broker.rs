//! Message broker subsystem: Redis pub/sub topics and list-backed work queues.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use redis::aio::MultiplexedConnection;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::BrokerConfig;
use crate::error::SubsystemError;
use crate::lifecycle::context::Context;
use crate::subsystem::cache::{connect_redis, ping};
use crate::subsystem::{Constructor, Subsystem};

pub struct Broker {
    conn: RwLock<Option<MultiplexedConnection>>,
    namespace: String,
}

impl Broker {
    pub async fn connect(ctx: &Context, config: &BrokerConfig) -> Result<Self, SubsystemError> {
        let (_client, conn) = connect_redis(
            ctx,
            &config.url,
            Duration::from_secs(config.connect_timeout_secs),
            &config.retry,
            "broker",
        )
        .await?;

        tracing::info!(namespace = %config.namespace, "Broker connected");
        Ok(Self {
            conn: RwLock::new(Some(conn)),
            namespace: config.namespace.clone(),
        })
    }

    fn connection(&self) -> Result<MultiplexedConnection, SubsystemError> {
        self.conn.read().clone().ok_or(SubsystemError::Closed)
    }

    fn topic(&self, name: &str) -> String {
        format!("{}:topic:{}", self.namespace, name)
    }

    fn queue(&self, name: &str) -> String {
        format!("{}:queue:{}", self.namespace, name)
    }

    /// Publish a JSON message; returns the number of subscribers that received it.
    pub async fn publish<T: Serialize + Sync>(
        &self,
        topic: &str,
        message: &T,
    ) -> Result<u64, SubsystemError> {
        let payload = serde_json::to_string(message)?;
        let mut conn = self.connection()?;
        let receivers: u64 = redis::cmd("PUBLISH")
            .arg(self.topic(topic))
            .arg(payload)
            .query_async(&mut conn)
            .await?;
        tracing::debug!(topic, receivers, "Message published");
        Ok(receivers)
    }

    /// Push a JSON message onto a work queue; returns the queue length.
    pub async fn enqueue<T: Serialize + Sync>(
        &self,
        queue: &str,
        message: &T,
    ) -> Result<u64, SubsystemError> {
        let payload = serde_json::to_string(message)?;
        let mut conn = self.connection()?;
        let length: u64 = redis::cmd("LPUSH")
            .arg(self.queue(queue))
            .arg(payload)
            .query_async(&mut conn)
            .await?;
        Ok(length)
    }

    /// Pop the oldest message from a work queue, if any.
    pub async fn dequeue<T: DeserializeOwned>(&self, queue: &str) -> Result<Option<T>, SubsystemError> {
        let mut conn = self.connection()?;
        let raw: Option<String> = redis::cmd("RPOP")
            .arg(self.queue(queue))
            .query_async(&mut conn)
            .await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl Subsystem for Broker {
    async fn health_check(&self, _ctx: &Context) -> Result<(), SubsystemError> {
        let mut conn = self.connection()?;
        ping(&mut conn).await
    }

    async fn close(&self) -> Result<(), SubsystemError> {
        self.conn.write().take();
        tracing::info!("Broker connection closed");
        Ok(())
    }
}

#[async_trait]
impl Constructor for BrokerConfig {
    async fn construct(&self, ctx: &Context) -> Result<Arc<dyn Subsystem>, SubsystemError> {
        Ok(Arc::new(Broker::connect(ctx, self).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancelled_context_aborts_connect() {
        let ctx = Context::background();
        ctx.cancel();
        let config = BrokerConfig {
            url: "redis://127.0.0.1:1".into(),
            ..BrokerConfig::default()
        };
        let result = Broker::connect(&ctx, &config).await;
        assert!(matches!(result, Err(SubsystemError::Cancelled)));
    }
}
