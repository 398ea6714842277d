//! Cache subsystem backed by Redis.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use redis::aio::MultiplexedConnection;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::{CacheConfig, RetryConfig};
use crate::error::SubsystemError;
use crate::lifecycle::context::Context;
use crate::resilience::retry_connect;
use crate::subsystem::{Constructor, Subsystem};

/// Open a client and establish one multiplexed connection, retrying with backoff.
pub(crate) async fn connect_redis(
    ctx: &Context,
    url: &str,
    connect_timeout: Duration,
    retry: &RetryConfig,
    name: &str,
) -> Result<(redis::Client, MultiplexedConnection), SubsystemError> {
    let client = redis::Client::open(url)
        .map_err(|e| SubsystemError::InvalidConfig(format!("{name} url: {e}")))?;

    let client_ref = &client;
    let conn = retry_connect(ctx, retry, name, || async move {
        match tokio::time::timeout(connect_timeout, client_ref.get_multiplexed_tokio_connection())
            .await
        {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(e)) => Err(SubsystemError::Redis(e)),
            Err(_) => Err(SubsystemError::Timeout(connect_timeout)),
        }
    })
    .await?;

    Ok((client, conn))
}

/// `PING` over a cloned connection.
pub(crate) async fn ping(conn: &mut MultiplexedConnection) -> Result<(), SubsystemError> {
    let reply: String = redis::cmd("PING").query_async(conn).await?;
    if reply == "PONG" {
        Ok(())
    } else {
        Err(SubsystemError::Unavailable(format!("unexpected PING reply: {reply}")))
    }
}

pub struct Cache {
    conn: RwLock<Option<MultiplexedConnection>>,
    key_prefix: String,
    default_ttl: Duration,
}

impl Cache {
    pub async fn connect(ctx: &Context, config: &CacheConfig) -> Result<Self, SubsystemError> {
        let (_client, conn) = connect_redis(
            ctx,
            &config.url,
            Duration::from_secs(config.connect_timeout_secs),
            &config.retry,
            "cache",
        )
        .await?;

        tracing::info!(prefix = %config.key_prefix, "Cache connected");
        Ok(Self {
            conn: RwLock::new(Some(conn)),
            key_prefix: config.key_prefix.clone(),
            default_ttl: Duration::from_secs(config.default_ttl_secs),
        })
    }

    fn connection(&self) -> Result<MultiplexedConnection, SubsystemError> {
        self.conn.read().clone().ok_or(SubsystemError::Closed)
    }

    fn key(&self, key: &str) -> String {
        namespaced(&self.key_prefix, key)
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, SubsystemError> {
        let mut conn = self.connection()?;
        let value: Option<String> = redis::cmd("GET")
            .arg(self.key(key))
            .query_async(&mut conn)
            .await?;
        Ok(value)
    }

    /// Store `value` with `ttl`, or the configured default TTL.
    pub async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), SubsystemError> {
        let mut conn = self.connection()?;
        let ttl = ttl.unwrap_or(self.default_ttl).as_secs().max(1);
        redis::cmd("SET")
            .arg(self.key(key))
            .arg(value)
            .arg("EX")
            .arg(ttl)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    /// Remove `key`; returns whether it existed.
    pub async fn delete(&self, key: &str) -> Result<bool, SubsystemError> {
        let mut conn = self.connection()?;
        let removed: i64 = redis::cmd("DEL")
            .arg(self.key(key))
            .query_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, SubsystemError> {
        match self.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn set_json<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), SubsystemError> {
        let raw = serde_json::to_string(value)?;
        self.set(key, &raw, ttl).await
    }
}

fn namespaced(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}:{key}")
    }
}

#[async_trait]
impl Subsystem for Cache {
    async fn health_check(&self, _ctx: &Context) -> Result<(), SubsystemError> {
        let mut conn = self.connection()?;
        ping(&mut conn).await
    }

    async fn close(&self) -> Result<(), SubsystemError> {
        // Dropping the last clone of the multiplexed connection shuts its driver task down.
        self.conn.write().take();
        tracing::info!("Cache connection closed");
        Ok(())
    }
}

#[async_trait]
impl Constructor for CacheConfig {
    async fn construct(&self, ctx: &Context) -> Result<Arc<dyn Subsystem>, SubsystemError> {
        Ok(Arc::new(Cache::connect(ctx, self).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_prefix() {
        assert_eq!(namespaced("", "user:1"), "user:1");
        assert_eq!(namespaced("app", "user:1"), "app:user:1");
    }

    #[tokio::test]
    async fn test_invalid_url_is_a_config_error() {
        let config = CacheConfig {
            url: "not-a-redis-url".into(),
            ..CacheConfig::default()
        };
        let result = Cache::connect(&Context::background(), &config).await;
        assert!(matches!(result, Err(SubsystemError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_unreachable_server_fails() {
        let config = CacheConfig {
            url: "redis://127.0.0.1:1".into(),
            connect_timeout_secs: 1,
            retry: RetryConfig {
                max_attempts: 1,
                base_delay_ms: 1,
                max_delay_ms: 1,
            },
            ..CacheConfig::default()
        };
        assert!(Cache::connect(&Context::background(), &config).await.is_err());
    }
}
