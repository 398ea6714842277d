//! Relational database subsystem backed by a deadpool-postgres pool.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod, Runtime};

use crate::config::DatabaseConfig;
use crate::error::SubsystemError;
use crate::lifecycle::context::Context;
use crate::resilience::retry_connect;
use crate::subsystem::{Constructor, Subsystem};

/// Snapshot of pool utilisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub max_size: usize,
    pub size: usize,
    pub available: usize,
    pub waiting: usize,
}

pub struct Database {
    pool: Pool,
}

impl Database {
    /// Build the pool and prove it works by checking out one connection.
    pub async fn connect(ctx: &Context, config: &DatabaseConfig) -> Result<Self, SubsystemError> {
        let pg_config = config
            .url
            .parse::<tokio_postgres::Config>()
            .map_err(|e| SubsystemError::InvalidConfig(format!("database url: {e}")))?;

        let manager = Manager::from_config(
            pg_config,
            tokio_postgres::NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );

        let timeout = Duration::from_secs(config.connect_timeout_secs);
        let pool = Pool::builder(manager)
            .max_size(config.max_connections)
            .runtime(Runtime::Tokio1)
            .wait_timeout(Some(timeout))
            .create_timeout(Some(timeout))
            .recycle_timeout(Some(timeout))
            .build()
            .map_err(|e| SubsystemError::InvalidConfig(format!("database pool: {e}")))?;

        let pool_ref = &pool;
        retry_connect(ctx, &config.retry, "database", || async move {
            let _conn = pool_ref.get().await?;
            Ok::<(), SubsystemError>(())
        })
        .await?;

        tracing::info!(max_connections = config.max_connections, "Database pool ready");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Check out a connection from the pool.
    pub async fn connection(&self) -> Result<deadpool_postgres::Object, SubsystemError> {
        if self.pool.is_closed() {
            return Err(SubsystemError::Closed);
        }
        Ok(self.pool.get().await?)
    }

    pub fn status(&self) -> PoolStatus {
        let status = self.pool.status();
        PoolStatus {
            max_size: status.max_size,
            size: status.size,
            available: status.available,
            waiting: status.waiting,
        }
    }
}

#[async_trait]
impl Subsystem for Database {
    async fn health_check(&self, _ctx: &Context) -> Result<(), SubsystemError> {
        let client = self.connection().await?;
        client.simple_query("SELECT 1").await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), SubsystemError> {
        self.pool.close();
        tracing::info!("Database pool closed");
        Ok(())
    }
}

#[async_trait]
impl Constructor for DatabaseConfig {
    async fn construct(&self, ctx: &Context) -> Result<Arc<dyn Subsystem>, SubsystemError> {
        Ok(Arc::new(Database::connect(ctx, self).await?))
    }
}
