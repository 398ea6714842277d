//! Shared outbound HTTP client.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::Dispatch;

use crate::config::HttpClientConfig;
use crate::error::SubsystemError;
use crate::lifecycle::context::Context;
use crate::subsystem::logger::Logger;
use crate::subsystem::{Constructor, Handles, Subsystem, SubsystemKind};

pub struct HttpClient {
    client: RwLock<Option<reqwest::Client>>,
    health_url: Option<String>,
    /// Logger dispatch, wired in after construction.
    dispatch: RwLock<Option<Dispatch>>,
}

impl HttpClient {
    pub fn new(config: &HttpClientConfig) -> Result<Self, SubsystemError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .user_agent(config.user_agent.clone())
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .build()?;

        Ok(Self {
            client: RwLock::new(Some(client)),
            health_url: config.health_url.clone(),
            dispatch: RwLock::new(None),
        })
    }

    /// A clone of the underlying client; clones share one connection pool.
    pub fn client(&self) -> Result<reqwest::Client, SubsystemError> {
        self.client.read().clone().ok_or(SubsystemError::Closed)
    }

    pub fn get(&self, url: &str) -> Result<reqwest::RequestBuilder, SubsystemError> {
        Ok(self.client()?.get(url))
    }

    pub fn post(&self, url: &str) -> Result<reqwest::RequestBuilder, SubsystemError> {
        Ok(self.client()?.post(url))
    }

    /// Send a request built from this client and log its outcome.
    pub async fn send(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, SubsystemError> {
        let client = self.client()?;
        let request = request.build()?;
        let method = request.method().clone();
        let url = request.url().clone();

        let started = Instant::now();
        let result = client.execute(request).await;
        let elapsed = started.elapsed();

        self.log(|| match &result {
            Ok(response) => tracing::debug!(
                %method,
                %url,
                status = response.status().as_u16(),
                elapsed_ms = elapsed.as_millis() as u64,
                "Outbound request completed"
            ),
            Err(e) => tracing::warn!(%method, %url, error = %e, "Outbound request failed"),
        });

        Ok(result?)
    }

    fn log(&self, f: impl FnOnce()) {
        match self.dispatch.read().as_ref() {
            Some(dispatch) => tracing::dispatcher::with_default(dispatch, f),
            None => f(),
        }
    }
}

#[async_trait]
impl Subsystem for HttpClient {
    fn attach(&self, peers: &Handles) {
        if let Some(logger) = peers.get::<Logger>(SubsystemKind::Logger) {
            *self.dispatch.write() = Some(logger.dispatch().clone());
        }
    }

    async fn health_check(&self, _ctx: &Context) -> Result<(), SubsystemError> {
        let client = self.client()?;
        if let Some(url) = &self.health_url {
            client.get(url).send().await?.error_for_status()?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), SubsystemError> {
        // Idle pooled connections are released with the last client clone.
        self.client.write().take();
        self.log(|| tracing::info!("HTTP client closed"));
        Ok(())
    }
}

#[async_trait]
impl Constructor for HttpClientConfig {
    async fn construct(&self, _ctx: &Context) -> Result<Arc<dyn Subsystem>, SubsystemError> {
        Ok(Arc::new(HttpClient::new(self)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_closed_client_rejects_requests() {
        let client = HttpClient::new(&HttpClientConfig::default()).unwrap();
        assert!(client.health_check(&Context::background()).await.is_ok());

        client.close().await.unwrap();
        assert!(matches!(client.client(), Err(SubsystemError::Closed)));
        assert!(matches!(
            client.health_check(&Context::background()).await,
            Err(SubsystemError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_attach_picks_up_logger_dispatch() {
        let logger = Logger::new(&crate::config::LoggerConfig {
            install_global: false,
            ..Default::default()
        })
        .unwrap();
        let mut peers = Handles::new();
        peers.insert(SubsystemKind::Logger, Arc::new(logger));

        let client = HttpClient::new(&HttpClientConfig::default()).unwrap();
        assert!(client.dispatch.read().is_none());
        client.attach(&peers);
        assert!(client.dispatch.read().is_some());
    }
}
